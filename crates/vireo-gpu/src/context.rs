//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::device::DeviceFeatures;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, pick_physical_device, QueueFamilies};
use crate::memory::GpuAllocator;
use crate::surface::PresentTarget;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Main GPU context: instance, presentation surface, device and queues.
///
/// Objects are destroyed in reverse order of creation by [`Self::destroy`],
/// which `Drop` also calls.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) features: DeviceFeatures,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) queue_families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,

    pub(crate) target: Arc<dyn PresentTarget>,
    destroyed: bool,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the presentation surface.
    pub const fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the graphics queue.
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue.
    pub const fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the resolved queue families.
    pub const fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Tear down the device, the surface and the instance.
    ///
    /// Every object created through this context must already be destroyed.
    /// Calling this more than once is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        // SAFETY: the caller has destroyed every child object; waiting idle
        // guarantees no queued work still references the device.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("Device wait idle failed during teardown: {e}");
            }

            // Allocator memory blocks must go before the device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    wireframe: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Vireo".to_string(),
            enable_validation: cfg!(debug_assertions),
            wireframe: false,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Request non-solid fill modes for wireframe pipelines.
    #[must_use]
    pub const fn wireframe(mut self, enable: bool) -> Self {
        self.wireframe = enable;
        self
    }

    /// Build the GPU context for a window.
    pub fn build(self, target: Arc<dyn PresentTarget>) -> Result<GpuContext> {
        let display = target
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("display handle: {e}")))?
            .as_raw();
        let window = target
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("window handle: {e}")))?
            .as_raw();

        // SAFETY: loading the system Vulkan library has no preconditions.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        // SAFETY: entry was just loaded.
        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, display)? };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        // SAFETY: the handles come from a live window kept alive by `target`.
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display, window, None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                // SAFETY: nothing was created from the instance yet.
                unsafe { instance.destroy_instance(None) };
                return Err(GpuError::SurfaceCreation(e.to_string()));
            }
        };

        // SAFETY: instance and surface are valid; on failure both are
        // destroyed before returning.
        match unsafe { self.create_device(&instance, &surface_loader, surface) } {
            Ok((physical_device, device, capabilities, features, queue_families)) => {
                let device = Arc::new(device);
                // SAFETY: all handles were just created.
                let allocator =
                    match unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) } {
                        Ok(allocator) => allocator,
                        Err(e) => {
                            // SAFETY: nothing was created from the device yet.
                            unsafe {
                                device.destroy_device(None);
                                surface_loader.destroy_surface(surface, None);
                                instance.destroy_instance(None);
                            }
                            return Err(e);
                        }
                    };

                let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
                // SAFETY: families were resolved for this device.
                let (graphics_queue, present_queue) = unsafe {
                    (
                        device.get_device_queue(queue_families.graphics, 0),
                        device.get_device_queue(queue_families.present, 0),
                    )
                };

                Ok(GpuContext {
                    entry,
                    instance,
                    surface_loader,
                    surface,
                    physical_device,
                    device,
                    swapchain_loader,
                    capabilities,
                    features,
                    allocator: Mutex::new(allocator),
                    queue_families,
                    graphics_queue,
                    present_queue,
                    target,
                    destroyed: false,
                })
            }
            Err(e) => {
                // SAFETY: no device exists; surface and instance are unused.
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Pick a physical device and create the logical device.
    unsafe fn create_device(
        &self,
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(
        vk::PhysicalDevice,
        ash::Device,
        GpuCapabilities,
        DeviceFeatures,
        QueueFamilies,
    )> {
        // SAFETY: handles are valid per the caller's contract.
        let (physical_device, families) =
            unsafe { pick_physical_device(instance, surface_loader, surface)? };
        // SAFETY: physical_device was just enumerated.
        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let mut unique_families = vec![families.graphics];
        if !families.is_unified() {
            unique_families.push(families.present);
        }

        let queue_priority = 1.0_f32;
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(std::slice::from_ref(&queue_priority))
            })
            .collect();

        #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
        let mut extension_names: Vec<*const c_char> = vec![ash::khr::swapchain::NAME.as_ptr()];
        #[cfg(target_os = "macos")]
        if capabilities.has_extension(ash::khr::portability_subset::NAME) {
            extension_names.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        let anisotropy = capabilities.supports_sampler_anisotropy;
        let wireframe = self.wireframe && capabilities.supports_fill_mode_non_solid;
        if self.wireframe && !wireframe {
            tracing::warn!("Wireframe requested but fill_mode_non_solid is unsupported");
        }

        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(anisotropy)
            .fill_mode_non_solid(wireframe);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&enabled_features);

        // SAFETY: every pointer in device_create_info outlives this call.
        let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

        let features = DeviceFeatures {
            max_anisotropy: anisotropy.then_some(capabilities.max_sampler_anisotropy),
            wireframe,
        };
        tracing::debug!(
            "Queue families: graphics={} present={} features={:?}",
            families.graphics,
            families.present,
            features
        );

        Ok((physical_device, device, capabilities, features, families))
    }
}
