//! Core types for the Vireo rendering runtime.
//!
//! This crate provides the plain-data types shared between the GPU layer,
//! the render resources and the application framework:
//! - Vertex records matching the shader binary contract
//! - Per-frame uniform data
//! - Render modes and backend selection
//! - Pixel region validation for texture uploads

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    BackendKind, PixelRegion, RenderMode, SpriteVertex, UniformFrameData, Vertex,
};

/// Runtime-wide constants
pub mod constants {
    /// Descriptor binding of the combined image sampler.
    pub const TEXTURE_BINDING: u32 = 0;
    /// Descriptor binding of the per-frame uniform buffer.
    pub const UNIFORM_BINDING: u32 = 1;
    /// Frames the CPU may record ahead of the GPU.
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
    /// Upper bound on frame slots regardless of swapchain size.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
}
