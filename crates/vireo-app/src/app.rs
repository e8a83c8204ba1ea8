//! `RenderApp` trait definition.

use vireo_gpu::RenderDevice;
use vireo_render::PipelineDesc;
use winit::event::WindowEvent;

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Trait for Vireo applications.
///
/// The session owns the device, the presentation surface, the pipelines and
/// the frame loop; the application supplies the shaders and the per-frame
/// draw content. `draw`, `event` and `resize` are only ever called between a
/// successful image acquisition and the matching present, never while the
/// surface is being rebuilt.
pub trait RenderApp<D: RenderDevice> {
    /// Shader pair and fixed-function state of the session's pipelines.
    fn pipeline(&self, config: &AppConfig) -> PipelineDesc;

    /// Upload initial assets.
    ///
    /// Called once after the device, the surface and the pipelines exist.
    /// An error aborts session startup.
    #[allow(unused_variables)]
    fn load(&mut self, ctx: &mut AppContext<D>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Record this frame's draw calls.
    ///
    /// The command buffer in `frame` is inside the render pass with the
    /// active pipeline and the descriptor set of `frame.image_index` bound.
    /// [`AppContext::bind_texture`] fails here; replace the bound texture
    /// from `load`, `event` or `resize` instead.
    fn draw(&mut self, ctx: &mut AppContext<D>, frame: &FrameContext) -> anyhow::Result<()>;

    /// Handle a platform event.
    ///
    /// Events are queued as they arrive and delivered before the next
    /// `draw`. Default implementation does nothing.
    #[allow(unused_variables)]
    fn event(&mut self, ctx: &mut AppContext<D>, event: &WindowEvent) {}

    /// Called once after each surface rebuild, before the next `draw`.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn resize(&mut self, ctx: &mut AppContext<D>, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release application resources.
    ///
    /// Called during shutdown with the device idle.
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext<D>) {}
}
