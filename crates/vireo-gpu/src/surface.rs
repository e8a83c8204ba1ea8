//! Presentation surface queries.
//!
//! The surface itself is created and destroyed by
//! [`GpuContext`](crate::GpuContext) since its lifetime sits between the
//! logical device and the instance.

use crate::error::Result;
use crate::swapchain::{select_present_mode, select_surface_format};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// A window the runtime can present into.
pub trait PresentTarget: HasDisplayHandle + HasWindowHandle {
    /// Current drawable size in physical pixels. Zero while minimized.
    fn drawable_size(&self) -> (u32, u32);
}

/// Surface capabilities query result.
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Query capabilities of `surface` on `physical_device`.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn query(
        loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        // SAFETY: handles are valid per the caller's contract.
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }

    /// Get the recommended surface format.
    pub fn recommended_format(&self) -> Option<vk::SurfaceFormatKHR> {
        select_surface_format(&self.formats)
    }

    /// Get the recommended present mode.
    pub fn recommended_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, vsync)
    }
}
