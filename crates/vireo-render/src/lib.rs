//! Backend-generic rendering resources for the Vireo runtime.
//!
//! This crate provides:
//! - The presentation surface and its rebuild cycle
//! - Descriptor and pipeline binding
//! - Blocking staging uploads and persistent streaming uploads
//! - Mesh and texture ownership
//! - Camera and view management
//!
//! Every type is generic over [`vireo_gpu::RenderDevice`] and owns its
//! handles explicitly: each has a `destroy` that must be called with the
//! device that created it.

pub mod binder;
pub mod camera;
pub mod mesh;
pub mod streaming;
pub mod surface;
pub mod texture;
pub mod upload;

pub use binder::{DescriptorLayoutDesc, PipelineBinder, PipelineDesc, PipelineResource};
pub use camera::Camera;
pub use mesh::Mesh;
pub use streaming::StreamingUploader;
pub use surface::{PresentationSurface, SurfaceState};
pub use texture::Texture;
pub use upload::{packed_region, Uploader};
