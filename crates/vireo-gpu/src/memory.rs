//! GPU memory management.

use crate::device::{DeviceBuffer, DeviceImage, ImageDesc};
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Allocate a buffer.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: the device outlives the allocator.
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        // SAFETY: buffer was just created on this device.
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the buffer has no memory bound and is unused.
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(GpuError::AllocationFailed(format!("{name}: {e}")));
            }
        };

        // SAFETY: allocation satisfies the buffer's requirements.
        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.release(allocation);
            // SAFETY: the buffer is unused.
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Free a buffer and its allocation.
    pub fn free_buffer(&mut self, mut buffer: GpuBuffer) {
        if let Some(allocation) = buffer.allocation.take() {
            self.release(allocation);
        }
        // SAFETY: the caller hands over ownership; nothing references it.
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
    }

    /// Allocate a device-local 2D image.
    pub fn create_image(&mut self, desc: &ImageDesc, name: &str) -> Result<GpuImage> {
        let extent = vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        };
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: the device outlives the allocator.
        let image = unsafe { self.device.create_image(&create_info, None)? };
        // SAFETY: image was just created on this device.
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the image has no memory bound and is unused.
                unsafe { self.device.destroy_image(image, None) };
                return Err(GpuError::AllocationFailed(format!("{name}: {e}")));
            }
        };

        // SAFETY: allocation satisfies the image's requirements.
        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            self.release(allocation);
            // SAFETY: the image is unused.
            unsafe { self.device.destroy_image(image, None) };
            return Err(e.into());
        }

        Ok(GpuImage {
            image,
            allocation: Some(allocation),
            format: desc.format,
            extent,
        })
    }

    /// Free an image and its allocation.
    pub fn free_image(&mut self, mut image: GpuImage) {
        if let Some(allocation) = image.allocation.take() {
            self.release(allocation);
        }
        // SAFETY: the caller hands over ownership; nothing references it.
        unsafe { self.device.destroy_image(image.image, None) };
    }

    fn release(&mut self, allocation: Allocation) {
        match self.allocator() {
            Ok(allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    tracing::warn!("Failed to free GPU allocation: {e}");
                }
            }
            Err(e) => tracing::warn!("{e}"),
        }
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations are freed and logged as leaks.
    pub fn shutdown(&mut self) {
        // Dropping the inner allocator releases its device memory blocks
        drop(self.allocator.take());
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Host pointer to the mapped memory, if host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    fn checked_range(&self, offset: u64, len: usize) -> Result<usize> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Range {offset}..{end} exceeds buffer of {} bytes",
                self.size
            )));
        }
        usize::try_from(offset).map_err(|_| GpuError::InvalidState("Offset overflow".into()))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        let offset = self.checked_range(offset, data.len())?;

        // SAFETY: the range was checked against the mapped allocation size.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset), data.len());
        }
        Ok(())
    }

    /// Read raw bytes at the given offset (must be host-visible).
    pub fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        let offset = self.checked_range(offset, len)?;

        let mut out = vec![0u8; len];
        // SAFETY: the range was checked against the mapped allocation size.
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }
}

impl DeviceBuffer for GpuBuffer {
    fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// A GPU image with its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

impl DeviceImage for GpuImage {
    fn handle(&self) -> vk::Image {
        self.image
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn extent(&self) -> vk::Extent3D {
        self.extent
    }
}
