//! Presentation surface ownership.
//!
//! [`SurfaceState`] holds everything whose validity is tied to one
//! swapchain: the swap images and their views, the depth attachment, the
//! render pass and one framebuffer per swap image. It is created and
//! destroyed as a whole; [`PresentationSurface`] rebuilds it on resize.

use ash::vk;
use tracing::{debug, info};
use vireo_gpu::image::aspect_for;
use vireo_gpu::swapchain::is_degenerate;
use vireo_gpu::{DeviceImage, GpuError, ImageDesc, RenderDevice, Result, SwapchainDesc};

/// One swapchain and everything bound to it.
pub struct SurfaceState<D: RenderDevice> {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_image: D::Image,
    depth_view: vk::ImageView,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    desc: SwapchainDesc,
    depth_format: vk::Format,
}

impl<D: RenderDevice> SurfaceState<D> {
    pub const fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub const fn depth_view(&self) -> vk::ImageView {
        self.depth_view
    }

    pub const fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub const fn format(&self) -> vk::SurfaceFormatKHR {
        self.desc.surface_format
    }

    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.desc.present_mode
    }

    /// Number of swap images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Width over height.
    pub fn aspect_ratio(&self) -> f32 {
        self.desc.extent.width as f32 / self.desc.extent.height as f32
    }

    fn create(device: &D, desc: SwapchainDesc) -> Result<Self> {
        let depth_format = device.depth_format()?;
        let (swapchain, images) = device.create_swapchain(&desc)?;

        let mut partial = Partial::<D> {
            swapchain,
            views: Vec::with_capacity(images.len()),
            depth_image: None,
            depth_view: None,
            render_pass: None,
            framebuffers: Vec::with_capacity(images.len()),
        };
        if let Err(err) = partial.populate(device, &images, &desc, depth_format) {
            partial.release(device);
            return Err(err);
        }

        match partial {
            Partial {
                swapchain,
                views,
                depth_image: Some(depth_image),
                depth_view: Some(depth_view),
                render_pass: Some(render_pass),
                framebuffers,
            } => Ok(Self {
                swapchain,
                images,
                views,
                depth_image,
                depth_view,
                render_pass,
                framebuffers,
                desc,
                depth_format,
            }),
            partial => {
                partial.release(device);
                Err(GpuError::InvalidState("incomplete surface state".into()))
            }
        }
    }

    /// Release every handle in reverse creation order. The device must be
    /// idle with respect to this surface.
    fn destroy(self, device: &D) {
        for framebuffer in self.framebuffers.into_iter().rev() {
            device.destroy_framebuffer(framebuffer);
        }
        device.destroy_render_pass(self.render_pass);
        device.destroy_image_view(self.depth_view);
        device.destroy_image(self.depth_image);
        for view in self.views.into_iter().rev() {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.swapchain);
    }
}

/// Surface state under construction; released in reverse on failure.
struct Partial<D: RenderDevice> {
    swapchain: vk::SwapchainKHR,
    views: Vec<vk::ImageView>,
    depth_image: Option<D::Image>,
    depth_view: Option<vk::ImageView>,
    render_pass: Option<vk::RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<D: RenderDevice> Partial<D> {
    fn populate(
        &mut self,
        device: &D,
        images: &[vk::Image],
        desc: &SwapchainDesc,
        depth_format: vk::Format,
    ) -> Result<()> {
        let color_format = desc.surface_format.format;
        for &image in images {
            self.views.push(device.create_image_view(
                image,
                color_format,
                vk::ImageAspectFlags::COLOR,
            )?);
        }

        let depth_image = self.depth_image.insert(device.create_image(
            &ImageDesc {
                extent: desc.extent,
                format: depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            "depth_attachment",
        )?);
        let depth_view = *self.depth_view.insert(device.create_image_view(
            depth_image.handle(),
            depth_format,
            aspect_for(depth_format),
        )?);

        let render_pass = *self
            .render_pass
            .insert(device.create_render_pass(color_format, depth_format)?);

        for &view in &self.views {
            self.framebuffers.push(device.create_framebuffer(
                render_pass,
                &[view, depth_view],
                desc.extent,
            )?);
        }
        Ok(())
    }

    fn release(self, device: &D) {
        for framebuffer in self.framebuffers.into_iter().rev() {
            device.destroy_framebuffer(framebuffer);
        }
        if let Some(render_pass) = self.render_pass {
            device.destroy_render_pass(render_pass);
        }
        if let Some(view) = self.depth_view {
            device.destroy_image_view(view);
        }
        if let Some(image) = self.depth_image {
            device.destroy_image(image);
        }
        for view in self.views.into_iter().rev() {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.swapchain);
    }
}

/// Owner of the current [`SurfaceState`], if any.
///
/// A degenerate extent (minimized window) leaves the surface empty; the
/// frame loop skips submission until a later `create` succeeds.
pub struct PresentationSurface<D: RenderDevice> {
    state: Option<SurfaceState<D>>,
    vsync: bool,
    generation: u64,
}

impl<D: RenderDevice> PresentationSurface<D> {
    pub const fn new(vsync: bool) -> Self {
        Self {
            state: None,
            vsync,
            generation: 0,
        }
    }

    /// Build the surface for `extent_hint`.
    ///
    /// Returns `Ok(false)` without touching the swapchain when the window or
    /// the surface reports a zero-sized extent.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn create(&mut self, device: &D, extent_hint: vk::Extent2D) -> Result<bool> {
        if self.state.is_some() {
            return Err(GpuError::InvalidState(
                "presentation surface already created".into(),
            ));
        }
        if is_degenerate(extent_hint) {
            debug!(
                "Deferring surface creation for {}x{}",
                extent_hint.width, extent_hint.height
            );
            return Ok(false);
        }

        let caps = device.surface_capabilities()?;
        let Some(desc) = SwapchainDesc::choose(&caps, extent_hint, self.vsync)? else {
            debug!("Surface reports a zero-sized extent, deferring");
            return Ok(false);
        };

        let state = SurfaceState::create(device, desc)?;
        self.generation += 1;
        info!(
            "Surface ready: {}x{}, {:?}, {:?}, {} images",
            desc.extent.width,
            desc.extent.height,
            desc.surface_format.format,
            desc.present_mode,
            state.image_count()
        );
        self.state = Some(state);
        Ok(true)
    }

    /// Wait for the device to go idle and release the current state.
    pub fn destroy(&mut self, device: &D) -> Result<()> {
        if let Some(state) = self.state.take() {
            device.wait_idle()?;
            state.destroy(device);
        }
        Ok(())
    }

    /// `destroy` followed by `create`. Pipelines built against the old
    /// state must be rebuilt afterwards.
    pub fn rebuild(&mut self, device: &D, extent_hint: vk::Extent2D) -> Result<bool> {
        self.destroy(device)?;
        self.create(device, extent_hint)
    }

    pub const fn state(&self) -> Option<&SurfaceState<D>> {
        self.state.as_ref()
    }

    pub const fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.state.as_ref().map(SurfaceState::extent)
    }

    /// Incremented on every successful `create`.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn vsync(&self) -> bool {
        self.vsync
    }
}
