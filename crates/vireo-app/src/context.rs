//! Application context.

use anyhow::Context as _;
use ash::vk;
use bytemuck::Pod;
use tracing::{debug, info, warn};
use vireo_core::{PixelRegion, RenderMode, UniformFrameData};
use vireo_gpu::{DeferredDeletionQueue, GpuError, RenderDevice, Result};
use vireo_render::{
    Mesh, PipelineBinder, PipelineDesc, PresentationSurface, StreamingUploader, SurfaceState,
    Texture, Uploader,
};

use crate::config::AppConfig;
use crate::frame::FrameContext;

/// Resources shared by the session and the application callbacks.
///
/// Owns the device and every object built on it except the frame
/// synchronization primitives.
pub struct AppContext<D: RenderDevice> {
    device: D,
    config: AppConfig,
    surface: PresentationSurface<D>,
    binder: PipelineBinder<D>,
    uploader: Uploader,
    streaming: StreamingUploader<D>,
    retired: DeferredDeletionQueue<D::Buffer>,
    frame_number: u64,
    /// Set while the application records inside the render pass.
    drawing: bool,
    quit_requested: bool,
}

impl<D: RenderDevice> AppContext<D> {
    /// Build the uploader, the presentation surface, the pipelines and the
    /// streaming path. On failure everything created so far is released
    /// and the device is shut down.
    pub(crate) fn new(mut device: D, config: AppConfig, desc: PipelineDesc) -> anyhow::Result<Self> {
        let uploader = match Uploader::new(&device).context("creating upload resources") {
            Ok(uploader) => uploader,
            Err(err) => {
                device.shutdown();
                return Err(err);
            }
        };

        let mut surface = PresentationSurface::new(config.vsync);
        let binder = match Self::create_binder(&device, &config, &uploader, &mut surface, desc) {
            Ok(binder) => binder,
            Err(err) => {
                if let Err(e) = surface.destroy(&device) {
                    warn!("Surface teardown after failed startup: {e}");
                }
                uploader.destroy(&device);
                device.shutdown();
                return Err(err);
            }
        };

        let streaming = match StreamingUploader::new(&device).context("creating streaming uploader")
        {
            Ok(streaming) => streaming,
            Err(err) => {
                binder.destroy(&device);
                if let Err(e) = surface.destroy(&device) {
                    warn!("Surface teardown after failed startup: {e}");
                }
                uploader.destroy(&device);
                device.shutdown();
                return Err(err);
            }
        };

        Ok(Self {
            retired: DeferredDeletionQueue::new(config.frames_in_flight),
            device,
            config,
            surface,
            binder,
            uploader,
            streaming,
            frame_number: 0,
            drawing: false,
            quit_requested: false,
        })
    }

    fn create_binder(
        device: &D,
        config: &AppConfig,
        uploader: &Uploader,
        surface: &mut PresentationSurface<D>,
        mut desc: PipelineDesc,
    ) -> anyhow::Result<PipelineBinder<D>> {
        if !surface
            .create(device, device.drawable_extent())
            .context("creating presentation surface")?
        {
            info!("Window has no drawable area, deferring surface creation");
        }

        if config.wireframe && !desc.modes.contains(&RenderMode::Wireframe) {
            desc.modes.push(RenderMode::Wireframe);
        }
        let mut binder = PipelineBinder::new(device, uploader, desc, config.max_descriptor_sets)
            .context("creating descriptor and pipeline layouts")?;
        if let Some(state) = surface.state() {
            if let Err(err) = binder.build(device, state) {
                binder.destroy(device);
                return Err(err).context("building pipelines");
            }
        }
        Ok(binder)
    }

    pub const fn device(&self) -> &D {
        &self.device
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    pub const fn surface(&self) -> &PresentationSurface<D> {
        &self.surface
    }

    pub const fn surface_state(&self) -> Option<&SurfaceState<D>> {
        self.surface.state()
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.surface.extent()
    }

    /// Get the aspect ratio (width / height), 1.0 without a surface.
    pub fn aspect_ratio(&self) -> f32 {
        self.surface.state().map_or(1.0, SurfaceState::aspect_ratio)
    }

    pub const fn binder(&self) -> &PipelineBinder<D> {
        &self.binder
    }

    pub const fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Frames submitted before the current one.
    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Upload a mesh through a blocking staging copy.
    pub fn upload_mesh<V: Pod>(
        &self,
        vertices: &[V],
        indices: &[u32],
        name: &str,
    ) -> Result<Mesh<D>> {
        self.uploader
            .upload_mesh(&self.device, vertices, indices, name)
    }

    /// Upload a texture through a blocking staging copy.
    pub fn upload_texture(
        &self,
        pixels: &[u8],
        region: PixelRegion,
        format: vk::Format,
        name: &str,
    ) -> Result<Texture<D>> {
        self.uploader
            .upload_texture(&self.device, pixels, region, format, name)
    }

    /// Replace the texture bound to every descriptor set.
    ///
    /// Fails inside [`RenderApp::draw`](crate::RenderApp::draw): the set of
    /// the frame being recorded is already bound there. The rejected
    /// texture is destroyed.
    pub fn bind_texture(&mut self, texture: Texture<D>) -> Result<()> {
        if self.drawing {
            texture.destroy(&self.device);
            return Err(GpuError::InvalidState(
                "bind_texture while recording a frame; bind from load, event or resize".into(),
            ));
        }
        self.binder.bind_texture(&self.device, texture)
    }

    /// Refresh the bound texture in place through the persistent staging
    /// path. Waits only for the previous streamed copy.
    pub fn stream_bound_texture(&mut self, pixels: &[u8], region: PixelRegion) -> Result<()> {
        let Some(texture) = self.binder.texture() else {
            return Err(GpuError::InvalidState("no texture is bound".into()));
        };
        self.streaming
            .stream_texture(&self.device, texture, pixels, region)
    }

    /// Overwrite part of a device-local buffer through the persistent
    /// staging path.
    pub fn stream_buffer(&mut self, dst: &D::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        self.streaming.stream_buffer(&self.device, dst, offset, data)
    }

    pub const fn streaming(&self) -> &StreamingUploader<D> {
        &self.streaming
    }

    /// Write this frame's uniform block.
    pub fn write_uniforms(&self, frame: &FrameContext, data: &UniformFrameData) -> Result<()> {
        self.binder
            .write_uniforms(&self.device, frame.image_index, data)
    }

    pub fn push_constants(&self, frame: &FrameContext, data: &[u8]) -> Result<()> {
        self.binder
            .record_push_constants(&self.device, frame.command_buffer, data)
    }

    /// Record a draw of `mesh`. Empty meshes record nothing.
    pub fn draw_mesh(&self, frame: &FrameContext, mesh: &Mesh<D>, instances: u32) {
        mesh.record_draw(&self.device, frame.command_buffer, instances);
    }

    /// Switch the pipeline used from the next bind on.
    pub fn set_mode(&mut self, mode: RenderMode) -> bool {
        self.binder.set_mode(mode)
    }

    /// Switch between fill and wireframe, if both were compiled.
    pub fn toggle_mode(&mut self) -> RenderMode {
        let next = self.binder.mode().toggled();
        self.binder.set_mode(next);
        self.binder.mode()
    }

    pub const fn mode(&self) -> RenderMode {
        self.binder.mode()
    }

    /// Destroy `buffer` once no frame in flight can still read it.
    pub fn retire_buffer(&mut self, buffer: D::Buffer) {
        self.retired.queue(buffer, self.frame_number);
    }

    /// Retire both buffers of a mesh.
    pub fn destroy_mesh(&mut self, mesh: Mesh<D>) {
        let (vertices, indices) = mesh.into_buffers();
        self.retire_buffer(vertices);
        if let Some(indices) = indices {
            self.retire_buffer(indices);
        }
    }

    /// Buffers waiting for their frames to complete.
    pub fn retired_count(&self) -> usize {
        self.retired.pending_count()
    }

    /// Ask the session to stop after the current frame.
    pub fn request_quit(&mut self) {
        self.quit_requested = true;
    }

    pub const fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Match the retirement delay to the live frames in flight.
    pub(crate) fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.retired.set_frames_in_flight(frames_in_flight);
    }

    pub(crate) fn set_drawing(&mut self, drawing: bool) {
        self.drawing = drawing;
    }

    pub(crate) fn set_frame_number(&mut self, frame_number: u64) {
        self.frame_number = frame_number;
    }

    /// Release retired buffers whose frames have completed.
    pub(crate) fn process_retired(&mut self) {
        let device = &self.device;
        let released = self
            .retired
            .process(self.frame_number, |buffer| device.destroy_buffer(buffer));
        if released > 0 {
            debug!("Released {released} retired buffers");
        }
    }

    /// Tear down the pipelines, rebuild the surface for the window's
    /// current size and rebuild the pipelines against it.
    ///
    /// Returns `false` when the window has no drawable area; the surface is
    /// then left empty.
    pub(crate) fn rebuild_surface(&mut self) -> Result<bool> {
        let extent = self.device.drawable_extent();
        self.device.wait_idle()?;
        self.binder.release(&self.device);
        let ready = if self.surface.is_ready() {
            self.surface.rebuild(&self.device, extent)?
        } else {
            self.surface.create(&self.device, extent)?
        };
        if let Some(state) = self.surface.state() {
            self.binder.build(&self.device, state)?;
        }
        Ok(ready)
    }

    /// Destroy every resource in reverse dependency order and hand back the
    /// device. The device must be idle.
    pub(crate) fn release(self) -> D {
        let Self {
            device,
            mut surface,
            binder,
            uploader,
            streaming,
            mut retired,
            ..
        } = self;

        retired.flush(|buffer| device.destroy_buffer(buffer));
        binder.destroy(&device);
        if let Err(e) = surface.destroy(&device) {
            warn!("Surface teardown failed: {e}");
        }
        if let Err(e) = streaming.destroy(&device) {
            warn!("Streaming uploader teardown failed: {e}");
        }
        uploader.destroy(&device);
        device
    }
}
