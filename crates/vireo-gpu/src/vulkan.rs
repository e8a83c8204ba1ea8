//! [`RenderDevice`] implementation for the Vulkan context.

use crate::command;
use crate::context::GpuContext;
use crate::descriptors::{self, DescriptorPool};
use crate::device::{
    AcquireStatus, Command, DescriptorBinding, DescriptorWrite, DeviceFeatures, ImageDesc,
    PresentStatus, RenderDevice, SamplerDesc, Submission,
};
use crate::error::Result;
use crate::image;
use crate::memory::{GpuBuffer, GpuImage};
use crate::pipeline::{self, GraphicsPipelineConfig};
use crate::render_pass;
use crate::surface::SurfaceCapabilities;
use crate::swapchain::{self, SwapchainDesc};
use crate::sync;
use ash::vk;
use gpu_allocator::MemoryLocation;
use vireo_core::BackendKind;

impl RenderDevice for GpuContext {
    type Buffer = GpuBuffer;
    type Image = GpuImage;

    fn backend(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn drawable_extent(&self) -> vk::Extent2D {
        let (width, height) = self.target.drawable_size();
        vk::Extent2D { width, height }
    }

    fn features(&self) -> DeviceFeatures {
        self.features
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        // SAFETY: surface and physical device belong to this context.
        unsafe { SurfaceCapabilities::query(&self.surface_loader, self.physical_device, self.surface) }
    }

    fn depth_format(&self) -> Result<vk::Format> {
        // SAFETY: handles belong to this context.
        unsafe { image::find_depth_format(&self.instance, self.physical_device) }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        // SAFETY: surface and loader belong to this context.
        unsafe {
            swapchain::create_swapchain(
                &self.swapchain_loader,
                self.surface,
                desc,
                self.queue_families,
            )
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: the caller owns the swapchain and has waited for idle.
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireStatus> {
        // SAFETY: handles were created by this context.
        unsafe { swapchain::acquire_next_image(&self.swapchain_loader, swapchain, signal) }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentStatus> {
        // SAFETY: handles were created by this context.
        unsafe {
            swapchain::present(
                &self.swapchain_loader,
                self.present_queue,
                swapchain,
                image_index,
                wait,
            )
        }
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.allocator.lock().create_buffer(size, usage, location, name)
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        self.allocator.lock().free_buffer(buffer);
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.write_bytes(offset, data)
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, len: usize) -> Result<Vec<u8>> {
        buffer.read_bytes(offset, len)
    }

    fn create_image(&self, desc: &ImageDesc, name: &str) -> Result<GpuImage> {
        self.allocator.lock().create_image(desc, name)
    }

    fn destroy_image(&self, image: GpuImage) {
        self.allocator.lock().free_image(image);
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        // SAFETY: the image was created on this device.
        unsafe { image::create_image_view(&self.device, image, format, aspect) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        // SAFETY: the caller owns the view and no pending work uses it.
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler> {
        let anisotropy = desc.anisotropy.filter(|_| self.features.max_anisotropy.is_some());
        // SAFETY: device is alive.
        unsafe { image::create_sampler(&self.device, anisotropy) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        // SAFETY: the caller owns the sampler.
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        // SAFETY: device is alive.
        unsafe { render_pass::create_render_pass(&self.device, color_format, depth_format) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: the caller owns the render pass.
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        // SAFETY: render pass and views were created on this device.
        unsafe { render_pass::create_framebuffer(&self.device, render_pass, attachments, extent) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: the caller owns the framebuffer.
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        // SAFETY: device is alive.
        unsafe { descriptors::create_descriptor_set_layout(&self.device, bindings) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        // SAFETY: the caller owns the layout.
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        // SAFETY: set layouts were created on this device.
        unsafe { pipeline::create_pipeline_layout(&self.device, set_layouts, push_constant_ranges) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        // SAFETY: the caller owns the layout.
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> Result<vk::Pipeline> {
        // SAFETY: layout and render pass were created on this device.
        unsafe { pipeline::create_graphics_pipeline(&self.device, config, layout, render_pass) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: the caller owns the pipeline.
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        // SAFETY: device is alive.
        let pool = unsafe { DescriptorPool::new(&self.device, max_sets, pool_sizes)? };
        Ok(pool.handle())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: the caller owns the pool and no pending work uses its sets.
        unsafe { DescriptorPool::from_raw(pool).destroy(&self.device) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        // SAFETY: pool and layouts were created on this device.
        unsafe { DescriptorPool::from_raw(pool).allocate(&self.device, layouts) }
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        // SAFETY: the set and every referenced resource belong to this device.
        unsafe { descriptors::write_descriptor_set(&self.device, set, writes) };
    }

    fn create_command_pool(&self, transient: bool) -> Result<vk::CommandPool> {
        // SAFETY: the graphics family exists on this device.
        unsafe {
            command::create_command_pool(&self.device, self.queue_families.graphics, transient)
        }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: the caller owns the pool and no buffer from it is pending.
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        // SAFETY: pool was created on this device.
        unsafe { command::allocate_command_buffers(&self.device, pool, count) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]) {
        // SAFETY: buffers came from `pool` and are not pending.
        unsafe { self.device.free_command_buffers(pool, command_buffers) };
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        // SAFETY: the buffer's pool allows individual resets.
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, one_time: bool) -> Result<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        // SAFETY: the buffer was allocated on this device.
        unsafe { command::begin_command_buffer(&self.device, command_buffer, flags) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        // SAFETY: the buffer is recording.
        unsafe { command::end_command_buffer(&self.device, command_buffer) }
    }

    fn record(&self, cmd: vk::CommandBuffer, command: Command<'_>) {
        let device = &self.device;
        // SAFETY: `cmd` is recording and every handle in `command` was
        // created on this device.
        unsafe {
            match command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_color,
                    clear_depth,
                } => {
                    let clear_values = [
                        vk::ClearValue {
                            color: vk::ClearColorValue {
                                float32: clear_color,
                            },
                        },
                        vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: clear_depth,
                                stencil: 0,
                            },
                        },
                    ];
                    let begin_info = vk::RenderPassBeginInfo::default()
                        .render_pass(render_pass)
                        .framebuffer(framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D::default(),
                            extent,
                        })
                        .clear_values(&clear_values);
                    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                }
                Command::EndRenderPass => device.cmd_end_render_pass(cmd),
                Command::SetViewport(extent) => {
                    let viewport = vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: extent.width as f32,
                        height: extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D::default(),
                        extent,
                    };
                    device.cmd_set_viewport(cmd, 0, &[viewport]);
                    device.cmd_set_scissor(cmd, 0, &[scissor]);
                }
                Command::BindPipeline(pipeline) => {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                }
                Command::BindDescriptorSet { layout, set } => {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        0,
                        &[set],
                        &[],
                    );
                }
                Command::BindVertexBuffer(buffer) => {
                    device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
                }
                Command::BindIndexBuffer(buffer) => {
                    device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32);
                }
                Command::PushConstants {
                    layout,
                    stages,
                    data,
                } => device.cmd_push_constants(cmd, layout, stages, 0, data),
                Command::Draw {
                    vertex_count,
                    instance_count,
                } => device.cmd_draw(cmd, vertex_count, instance_count, 0, 0),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                } => device.cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0),
                Command::CopyBuffer {
                    src,
                    dst,
                    src_offset,
                    dst_offset,
                    size,
                } => {
                    let region = vk::BufferCopy {
                        src_offset,
                        dst_offset,
                        size,
                    };
                    device.cmd_copy_buffer(cmd, src, dst, &[region]);
                }
                Command::CopyBufferToImage {
                    src,
                    dst,
                    width,
                    height,
                    row_length,
                } => {
                    let region = vk::BufferImageCopy::default()
                        .buffer_offset(0)
                        .buffer_row_length(row_length)
                        .buffer_image_height(0)
                        .image_subresource(
                            vk::ImageSubresourceLayers::default()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .mip_level(0)
                                .base_array_layer(0)
                                .layer_count(1),
                        )
                        .image_extent(vk::Extent3D {
                            width,
                            height,
                            depth: 1,
                        });
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        src,
                        dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                Command::ImageBarrier {
                    image,
                    aspect,
                    old_layout,
                    new_layout,
                } => match image::transition_masks(old_layout, new_layout) {
                    Ok(masks) => {
                        let barrier = vk::ImageMemoryBarrier::default()
                            .old_layout(old_layout)
                            .new_layout(new_layout)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(image)
                            .subresource_range(
                                vk::ImageSubresourceRange::default()
                                    .aspect_mask(aspect)
                                    .base_mip_level(0)
                                    .level_count(1)
                                    .base_array_layer(0)
                                    .layer_count(1),
                            )
                            .src_access_mask(masks.src_access)
                            .dst_access_mask(masks.dst_access);
                        device.cmd_pipeline_barrier(
                            cmd,
                            masks.src_stage,
                            masks.dst_stage,
                            vk::DependencyFlags::empty(),
                            &[],
                            &[],
                            &[barrier],
                        );
                    }
                    Err(e) => tracing::error!("Skipping image barrier: {e}"),
                },
                Command::BufferBarrier {
                    buffer,
                    src_stage,
                    src_access,
                    dst_stage,
                    dst_access,
                } => {
                    let barrier = vk::BufferMemoryBarrier::default()
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE);
                    device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
            }
        }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        // SAFETY: device is alive.
        unsafe { sync::create_semaphore(&self.device) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: the caller owns the semaphore and no pending work waits on it.
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        // SAFETY: device is alive.
        unsafe { sync::create_fence(&self.device, signaled) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: the caller owns the fence and no pending submit signals it.
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        // SAFETY: fence was created on this device.
        unsafe { sync::wait_for_fence(&self.device, fence, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        // SAFETY: fence was created on this device and is not pending.
        unsafe { sync::reset_fence(&self.device, fence) }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        // SAFETY: fence was created on this device.
        let signaled = unsafe { self.device.get_fence_status(fence)? };
        Ok(signaled)
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        // SAFETY: every handle in the submission was created on this device.
        unsafe { command::submit_command_buffer(&self.device, self.graphics_queue, submission) }
    }

    fn queue_wait_idle(&self) -> Result<()> {
        // SAFETY: the graphics queue belongs to this device.
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_idle(&self) -> Result<()> {
        // SAFETY: device is alive.
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn shutdown(&mut self) {
        self.destroy();
    }
}
