//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers enabled when requested and installed.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance able to present to `display`.
///
/// Missing validation layers are skipped with a warning.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Vireo")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
    let mut extension_names: Vec<*const c_char> =
        ash_window::enumerate_required_extensions(display)
            .map_err(|e| GpuError::ExtensionNotSupported(format!("presentation: {e}")))?
            .to_vec();

    #[cfg(target_os = "macos")]
    {
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extension_names.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
    }

    let layers = if enable_validation {
        // SAFETY: entry is valid per the caller's contract.
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available
                    .iter()
                    .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        vec![]
    };

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    // SAFETY: every pointer in create_info outlives this call.
    let instance = unsafe { entry.create_instance(&create_info, None)? };

    if !layers.is_empty() {
        tracing::info!("Validation layers enabled");
    }

    Ok(instance)
}

/// Queue family facts relevant to presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub supports_present: bool,
}

/// Resolved graphics and present queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Both roles are served by one family.
    pub const fn is_unified(&self) -> bool {
        self.graphics == self.present
    }
}

/// Pick queue families, preferring one family that does both.
pub fn resolve_queue_families(families: &[QueueFamilyInfo]) -> Option<QueueFamilies> {
    let is_graphics = |f: &QueueFamilyInfo| f.flags.contains(vk::QueueFlags::GRAPHICS);

    if let Some(index) = families
        .iter()
        .position(|f| is_graphics(f) && f.supports_present)
    {
        let index = index as u32;
        return Some(QueueFamilies {
            graphics: index,
            present: index,
        });
    }

    let graphics = families.iter().position(is_graphics)?;
    let present = families.iter().position(|f| f.supports_present)?;
    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// Everything needed to decide whether a physical device can be used.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub supports_swapchain: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    /// Why this device cannot be used, if it cannot.
    pub fn rejection(&self) -> Option<&'static str> {
        if !self
            .queue_families
            .iter()
            .any(|f| f.flags.contains(vk::QueueFlags::GRAPHICS))
        {
            return Some("no graphics queue family");
        }
        if !self.queue_families.iter().any(|f| f.supports_present) {
            return Some("no queue family can present to the surface");
        }
        if !self.supports_swapchain {
            return Some("swapchain extension missing");
        }
        if self.surface_format_count == 0 {
            return Some("no surface formats");
        }
        if self.present_mode_count == 0 {
            return Some("no present modes");
        }
        None
    }

    pub fn qualifies(&self) -> bool {
        self.rejection().is_none()
    }
}

/// Index of the first qualifying candidate in enumeration order.
pub fn first_qualifying(candidates: &[DeviceCandidate]) -> Option<usize> {
    candidates.iter().position(DeviceCandidate::qualifies)
}

/// Query the facts needed to qualify a physical device.
///
/// # Safety
/// All handles must be valid and belong to `instance`.
pub unsafe fn query_candidate(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    // SAFETY: handles are valid per the caller's contract.
    unsafe {
        let properties = instance.get_physical_device_properties(physical_device);
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let queue_families = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let supports_present = surface_loader
                    .get_physical_device_surface_support(physical_device, index as u32, surface)
                    .unwrap_or(false);
                QueueFamilyInfo {
                    flags: family.queue_flags,
                    supports_present,
                }
            })
            .collect();

        let supports_swapchain = instance
            .enumerate_device_extension_properties(physical_device)?
            .iter()
            .any(|ext| {
                ext.extension_name_as_c_str()
                    .is_ok_and(|n| n == ash::khr::swapchain::NAME)
            });

        let surface_format_count = surface_loader
            .get_physical_device_surface_formats(physical_device, surface)
            .map_or(0, |formats| formats.len());
        let present_mode_count = surface_loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .map_or(0, |modes| modes.len());

        Ok(DeviceCandidate {
            name,
            queue_families,
            supports_swapchain,
            surface_format_count,
            present_mode_count,
        })
    }
}

/// Select the first physical device that can render to and present on
/// `surface`.
///
/// # Safety
/// All handles must be valid and belong to `instance`.
pub unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    // SAFETY: instance is valid per the caller's contract.
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let mut candidates = Vec::with_capacity(devices.len());
    for &device in &devices {
        // SAFETY: device was just enumerated from instance.
        let candidate = unsafe { query_candidate(instance, surface_loader, surface, device)? };
        if let Some(reason) = candidate.rejection() {
            tracing::debug!("Skipping GPU {}: {}", candidate.name, reason);
        }
        candidates.push(candidate);
    }

    let index = first_qualifying(&candidates).ok_or(GpuError::NoSuitableDevice)?;
    let families =
        resolve_queue_families(&candidates[index].queue_families).ok_or(GpuError::NoSuitableDevice)?;

    Ok((devices[index], families))
}
