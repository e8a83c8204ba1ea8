//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Device type (discrete, integrated, ...)
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Anisotropic sampling feature
    pub supports_sampler_anisotropy: bool,
    /// Maximum anisotropy the sampler accepts
    pub max_sampler_anisotropy: f32,
    /// Line/point polygon modes
    pub supports_fill_mode_non_solid: bool,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Largest 2D image dimension
    pub max_image_dimension_2d: u32,
    /// Largest push constant block in bytes
    pub max_push_constants_size: u32,

    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: caller guarantees both handles are valid.
        let (properties, features, memory_properties, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_features(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(CStr::to_string_lossy)
            .map(|name| name.into_owned())
            .unwrap_or_default();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,

            supports_sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            supports_fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,

            device_local_memory_mb,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            max_push_constants_size: properties.limits.max_push_constants_size,

            available_extensions,
        }
    }

    /// Whether the device exposes a named extension.
    pub fn has_extension(&self, name: &CStr) -> bool {
        name.to_str()
            .is_ok_and(|name| self.available_extensions.contains(name))
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}
