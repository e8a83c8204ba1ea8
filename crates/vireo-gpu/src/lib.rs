//! Vulkan device layer for the Vireo rendering runtime.
//!
//! This crate provides:
//! - The [`RenderDevice`] backend interface driven by the render resources
//!   and the frame loop
//! - Vulkan instance, surface and device setup ([`GpuContext`])
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Command, synchronization, descriptor and pipeline helpers
//! - Swapchain selection policy
//! - Deferred resource deletion

pub mod capabilities;
pub mod command;
pub mod context;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
mod vulkan;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use deferred::DeferredDeletionQueue;
pub use descriptors::{DescriptorPool, DescriptorSetLayoutBuilder};
pub use device::{
    AcquireStatus, Command, DescriptorBinding, DescriptorWrite, DeviceBuffer, DeviceFeatures,
    DeviceImage, ImageDesc, PresentStatus, RenderDevice, SamplerDesc, Submission,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipelineConfig, VertexLayout};
pub use surface::{PresentTarget, SurfaceCapabilities};
pub use swapchain::SwapchainDesc;

pub use gpu_allocator::MemoryLocation;
