//! Per-frame context for rendering.

use ash::vk;

/// Context for the current frame being rendered.
///
/// Only exists between a successful image acquisition and the matching
/// present. The command buffer is already inside the render pass with the
/// active pipeline and this image's descriptor set bound.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Command buffer for recording draw commands.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swap image. Selects the uniform slot and the
    /// descriptor set.
    pub image_index: u32,
    /// Frame slot the command buffer belongs to.
    pub slot: usize,
    /// Extent of the swap image.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Number of frames submitted before this one.
    pub frame_number: u64,
}

impl FrameContext {
    /// Width over height of the swap image.
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }
}
