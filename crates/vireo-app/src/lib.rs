//! Application framework for the Vireo rendering runtime.
//!
//! This crate provides a trait-based application framework that handles:
//! - Window creation and GPU context initialization
//! - Swapchain creation and rebuilding on resize
//! - Frame synchronization
//! - Deferred resource retirement
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use vireo_app::{run_app, AppConfig, AppContext, FrameContext, GpuContext, RenderApp};
//! use vireo_render::PipelineDesc;
//!
//! struct MyApp {
//!     vertex: Vec<u32>,
//!     fragment: Vec<u32>,
//! }
//!
//! impl RenderApp<GpuContext> for MyApp {
//!     fn pipeline(&self, _config: &AppConfig) -> PipelineDesc {
//!         PipelineDesc::new(self.vertex.clone(), self.fragment.clone())
//!     }
//!
//!     fn draw(
//!         &mut self,
//!         ctx: &mut AppContext<GpuContext>,
//!         frame: &FrameContext,
//!     ) -> anyhow::Result<()> {
//!         // Record draw calls
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let app = MyApp { vertex: Vec::new(), fragment: Vec::new() };
//!     run_app(AppConfig::new("My App"), app)
//! }
//! ```

mod app;
mod config;
mod context;
mod frame;
mod runner;
mod session;
mod sync;

pub use app::RenderApp;
pub use config::AppConfig;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::run_app;
pub use session::{FrameStats, Session};
pub use sync::{AcquiredFrame, FrameOutcome, FrameState, FrameSynchronizer, SkipReason, Transition};

// Re-export commonly used types for convenience
pub use vireo_gpu::{GpuContext, GpuContextBuilder};
pub use vireo_render::Camera;
pub use winit::event::WindowEvent;
