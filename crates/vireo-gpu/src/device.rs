//! Backend interface.
//!
//! Everything above this crate (presentation surface, binder, uploader and
//! the frame loop) talks to the GPU only through [`RenderDevice`]. The
//! Vulkan implementation lives on [`GpuContext`](crate::GpuContext); tests
//! drive the same code through a bookkeeping double.
//!
//! Every `create_*` has a matching `destroy_*`. Handles passed to a device
//! must have been created by that same device and not yet destroyed.

use ash::vk;
use gpu_allocator::MemoryLocation;
use vireo_core::BackendKind;

use crate::error::Result;
use crate::pipeline::GraphicsPipelineConfig;
use crate::surface::SurfaceCapabilities;
use crate::swapchain::SwapchainDesc;

/// A buffer together with whatever memory backs it.
pub trait DeviceBuffer {
    fn handle(&self) -> vk::Buffer;
    fn size(&self) -> u64;
}

/// An image together with whatever memory backs it.
pub trait DeviceImage {
    fn handle(&self) -> vk::Image;
    fn format(&self) -> vk::Format;
    fn extent(&self) -> vk::Extent3D;
}

/// Optional device features that were actually enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceFeatures {
    /// Maximum sampler anisotropy, if anisotropic filtering is enabled.
    pub max_anisotropy: Option<f32>,
    /// Non-solid polygon modes are available for wireframe pipelines.
    pub wireframe: bool,
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// An image was acquired; the semaphore will be signaled.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed and nothing was acquired.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    /// Whether the surface must be rebuilt before the next frame.
    pub const fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// Device-local image description.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// Sampler description.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplerDesc {
    /// Anisotropy level; `None` disables anisotropic filtering.
    pub anisotropy: Option<f32>,
}

/// One descriptor set layout binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// One descriptor write into a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    UniformBuffer {
        binding: u32,
        buffer: vk::Buffer,
        range: u64,
    },
    CombinedImageSampler {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

/// A queue submission of one command buffer.
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stage that waits.
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
}

impl Submission {
    /// A submission with no semaphores, optionally fenced.
    pub const fn standalone(command_buffer: vk::CommandBuffer, fence: Option<vk::Fence>) -> Self {
        Self {
            command_buffer,
            wait: None,
            signal: None,
            fence,
        }
    }
}

/// A command recorded into a command buffer.
#[derive(Debug, Clone, Copy)]
pub enum Command<'a> {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        clear_depth: f32,
    },
    EndRenderPass,
    /// Viewport and scissor covering the whole extent.
    SetViewport(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    BindVertexBuffer(vk::Buffer),
    /// 32-bit indices.
    BindIndexBuffer(vk::Buffer),
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &'a [u8],
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    /// Copy into mip 0 of a color image in `TRANSFER_DST_OPTIMAL`.
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        width: u32,
        height: u32,
        row_length: u32,
    },
    ImageBarrier {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BufferBarrier {
        buffer: vk::Buffer,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    },
}

/// The rendering backend.
///
/// Waits use an infinite timeout. Destroy calls never fail; backend errors
/// during destruction are logged.
pub trait RenderDevice {
    type Buffer: DeviceBuffer;
    type Image: DeviceImage;

    fn backend(&self) -> BackendKind;

    /// Current drawable size of the target window in pixels.
    fn drawable_extent(&self) -> vk::Extent2D;
    fn features(&self) -> DeviceFeatures;
    fn surface_capabilities(&self) -> Result<SurfaceCapabilities>;
    /// Best supported depth attachment format.
    fn depth_format(&self) -> Result<vk::Format>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireStatus>;
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentStatus>;

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self::Buffer>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    /// Write into host-visible memory.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Read from host-visible memory.
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn create_image(&self, desc: &ImageDesc, name: &str) -> Result<Self::Image>;
    fn destroy_image(&self, image: Self::Image);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    /// Destroys the pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>>;
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    /// Command pool on the graphics queue family with resettable buffers.
    fn create_command_pool(&self, transient: bool) -> Result<vk::CommandPool>;
    /// Destroys the pool and every command buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, one_time: bool)
        -> Result<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn record(&self, command_buffer: vk::CommandBuffer, command: Command<'_>);

    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;

    /// Submit to the graphics queue.
    fn submit(&self, submission: &Submission) -> Result<()>;
    fn queue_wait_idle(&self) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;

    /// Destroy the logical device, the presentation surface and the
    /// instance, in that order. Every other object must already be gone.
    fn shutdown(&mut self);
}
