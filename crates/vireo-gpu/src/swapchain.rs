//! Swapchain selection policy and creation.

use crate::device::{AcquireStatus, PresentStatus};
use crate::error::{GpuError, Result};
use crate::instance::QueueFamilies;
use crate::surface::SurfaceCapabilities;
use ash::vk;

/// Everything needed to create a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainDesc {
    /// Pick format, present mode, extent and image count for a surface.
    ///
    /// Returns `Ok(None)` when either the window or the surface reports a
    /// zero side, in which case no swapchain may be created.
    pub fn choose(
        caps: &SurfaceCapabilities,
        extent_hint: vk::Extent2D,
        vsync: bool,
    ) -> Result<Option<Self>> {
        if is_degenerate(extent_hint) {
            return Ok(None);
        }
        let surface_format = select_surface_format(&caps.formats)
            .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".into()))?;
        let extent = calculate_extent(&caps.capabilities, extent_hint.width, extent_hint.height);
        if is_degenerate(extent) {
            return Ok(None);
        }

        Ok(Some(Self {
            surface_format,
            present_mode: select_present_mode(&caps.present_modes, vsync),
            extent,
            image_count: select_image_count(&caps.capabilities),
            pre_transform: caps.capabilities.current_transform,
        }))
    }
}

/// Whether an extent has a zero side (minimized window).
pub const fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    // Prefer mailbox, then immediate, then FIFO which is always supported
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, clamped to the maximum (0 means unbounded).
pub const fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Create a swapchain and fetch its images.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn create_swapchain(
    loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    desc: &SwapchainDesc,
    families: QueueFamilies,
) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
    let family_indices = [families.graphics, families.present];
    let mut create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(desc.image_count)
        .image_format(desc.surface_format.format)
        .image_color_space(desc.surface_format.color_space)
        .image_extent(desc.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(desc.pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(desc.present_mode)
        .clipped(true);

    create_info = if families.is_unified() {
        create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    } else {
        create_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&family_indices)
    };

    // SAFETY: handles are valid per the caller's contract.
    unsafe {
        let swapchain = loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        match loader.get_swapchain_images(swapchain) {
            Ok(images) => Ok((swapchain, images)),
            Err(e) => {
                loader.destroy_swapchain(swapchain, None);
                Err(GpuError::SwapchainCreation(e.to_string()))
            }
        }
    }
}

/// Acquire the next image with an infinite timeout.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn acquire_next_image(
    loader: &ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    semaphore: vk::Semaphore,
) -> Result<AcquireStatus> {
    // SAFETY: handles are valid per the caller's contract.
    let result =
        unsafe { loader.acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null()) };

    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireStatus::Acquired {
            image_index,
            suboptimal,
        }),
        // Nothing was acquired and the semaphore stays unsignaled.
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Present an image.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn present(
    loader: &ash::khr::swapchain::Device,
    queue: vk::Queue,
    swapchain: vk::SwapchainKHR,
    image_index: u32,
    wait_semaphore: vk::Semaphore,
) -> Result<PresentStatus> {
    let swapchains = [swapchain];
    let image_indices = [image_index];
    let wait_semaphores = [wait_semaphore];

    let present_info = vk::PresentInfoKHR::default()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);

    // SAFETY: handles are valid per the caller's contract.
    match unsafe { loader.queue_present(queue, &present_info) } {
        Ok(false) => Ok(PresentStatus::Optimal),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}
