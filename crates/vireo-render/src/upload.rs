//! Blocking staging uploads.
//!
//! Every call allocates a host-visible staging buffer, records a one-shot
//! copy into device-local memory, waits on the uploader's own fence and
//! frees the staging buffer before returning. The destination is either
//! fully written or destroyed before the error is returned.

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use tracing::debug;
use vireo_core::PixelRegion;
use vireo_gpu::image::texel_size;
use vireo_gpu::{
    Command, DeviceBuffer, DeviceImage, GpuError, ImageDesc, RenderDevice, Result, Submission,
};

use crate::mesh::Mesh;
use crate::texture::Texture;

/// One-shot transfer path with a dedicated command buffer and fence.
#[derive(Debug)]
pub struct Uploader {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl Uploader {
    pub fn new<D: RenderDevice>(device: &D) -> Result<Self> {
        let pool = device.create_command_pool(true)?;
        let command_buffer = match device.allocate_command_buffers(pool, 1) {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            Ok(_) => {
                device.destroy_command_pool(pool);
                return Err(GpuError::InvalidState("no upload command buffer".into()));
            }
            Err(err) => {
                device.destroy_command_pool(pool);
                return Err(err);
            }
        };
        let fence = match device.create_fence(false) {
            Ok(fence) => fence,
            Err(err) => {
                device.destroy_command_pool(pool);
                return Err(err);
            }
        };
        Ok(Self {
            pool,
            command_buffer,
            fence,
        })
    }

    /// Record with `record`, submit, and block until the copy has finished.
    fn submit_and_wait<D: RenderDevice>(
        &self,
        device: &D,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<()> {
        let cb = self.command_buffer;
        device.reset_command_buffer(cb)?;
        device.begin_command_buffer(cb, true)?;
        record(cb);
        device.end_command_buffer(cb)?;
        device.submit(&Submission::standalone(cb, Some(self.fence)))?;
        device.wait_for_fence(self.fence)?;
        device.reset_fence(self.fence)
    }

    /// Copy `data` into a new device-local buffer with `usage`.
    ///
    /// The destination also carries `TRANSFER_DST` and `TRANSFER_SRC` so it
    /// can be refreshed by a streaming upload and read back.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn upload_buffer<D: RenderDevice>(
        &self,
        device: &D,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<D::Buffer> {
        if data.is_empty() {
            return Err(GpuError::Upload(format!("{name}: empty source")));
        }
        let size = data.len() as u64;

        let staging = device.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name}_staging"),
        )?;
        let result = device
            .create_buffer(
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::GpuOnly,
                name,
            )
            .and_then(|dst| {
                let copied = device.write_buffer(&staging, 0, data).and_then(|()| {
                    self.submit_and_wait(device, |cb| {
                        device.record(
                            cb,
                            Command::CopyBuffer {
                                src: staging.handle(),
                                dst: dst.handle(),
                                src_offset: 0,
                                dst_offset: 0,
                                size,
                            },
                        );
                    })
                });
                match copied {
                    Ok(()) => Ok(dst),
                    Err(err) => {
                        device.destroy_buffer(dst);
                        Err(err)
                    }
                }
            });
        device.destroy_buffer(staging);

        if result.is_ok() {
            debug!("Uploaded {size} bytes to '{name}'");
        }
        result
    }

    /// Upload a vertex array.
    pub fn upload_vertices<D: RenderDevice, V: Pod>(
        &self,
        device: &D,
        vertices: &[V],
        name: &str,
    ) -> Result<D::Buffer> {
        self.upload_buffer(
            device,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            name,
        )
    }

    /// Upload 32-bit indices.
    pub fn upload_indices<D: RenderDevice>(
        &self,
        device: &D,
        indices: &[u32],
        name: &str,
    ) -> Result<D::Buffer> {
        self.upload_buffer(
            device,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            name,
        )
    }

    /// Upload a vertex array and, when `indices` is non-empty, an index
    /// buffer.
    pub fn upload_mesh<D: RenderDevice, V: Pod>(
        &self,
        device: &D,
        vertices: &[V],
        indices: &[u32],
        name: &str,
    ) -> Result<Mesh<D>> {
        let vertex_buffer = self.upload_vertices(device, vertices, &format!("{name}_vertices"))?;
        let index_buffer = if indices.is_empty() {
            None
        } else {
            match self.upload_indices(device, indices, &format!("{name}_indices")) {
                Ok(buffer) => Some(buffer),
                Err(err) => {
                    device.destroy_buffer(vertex_buffer);
                    return Err(err);
                }
            }
        };
        Ok(Mesh {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    /// Copy a CPU pixel buffer into a new sampled image.
    ///
    /// The image goes `UNDEFINED -> TRANSFER_DST_OPTIMAL` before the copy
    /// and `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL` after it.
    /// Padded rows are described by `region.pitch`.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn upload_texture<D: RenderDevice>(
        &self,
        device: &D,
        pixels: &[u8],
        region: PixelRegion,
        format: vk::Format,
        name: &str,
    ) -> Result<Texture<D>> {
        let texel = texel_size(format).ok_or(GpuError::UnsupportedFormat(format))?;
        if texel != region.texel_size {
            return Err(GpuError::Upload(format!(
                "{name}: {format:?} has {texel}-byte texels, source has {}",
                region.texel_size
            )));
        }
        region.validate(pixels.len())?;
        let source = &pixels[..region.required_len() as usize];

        let staging = device.create_buffer(
            source.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name}_staging"),
        )?;
        let result = self.fill_image(device, &staging, source, region, format, name);
        device.destroy_buffer(staging);

        if result.is_ok() {
            debug!(
                "Uploaded {}x{} {:?} texture '{name}'",
                region.width, region.height, format
            );
        }
        result
    }

    fn fill_image<D: RenderDevice>(
        &self,
        device: &D,
        staging: &D::Buffer,
        source: &[u8],
        region: PixelRegion,
        format: vk::Format,
        name: &str,
    ) -> Result<Texture<D>> {
        device.write_buffer(staging, 0, source)?;
        let image = device.create_image(
            &ImageDesc {
                extent: vk::Extent2D {
                    width: region.width,
                    height: region.height,
                },
                format,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            },
            name,
        )?;

        let copied = self.submit_and_wait(device, |cb| {
            record_image_copy(
                device,
                cb,
                staging.handle(),
                image.handle(),
                region,
                vk::ImageLayout::UNDEFINED,
            );
        });
        if let Err(err) = copied {
            device.destroy_image(image);
            return Err(err);
        }

        match device.create_image_view(image.handle(), format, vk::ImageAspectFlags::COLOR) {
            Ok(view) => Ok(Texture { image, view }),
            Err(err) => {
                device.destroy_image(image);
                Err(err)
            }
        }
    }

    /// Copy `len` bytes of a device buffer back to the host.
    ///
    /// Diagnostic path: blocks on a fence and allocates a readback buffer.
    pub fn read_back_buffer<D: RenderDevice>(
        &self,
        device: &D,
        buffer: &D::Buffer,
        len: usize,
    ) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let size = len as u64;
        if size > buffer.size() {
            return Err(GpuError::Upload(format!(
                "readback of {size} bytes from a {}-byte buffer",
                buffer.size()
            )));
        }
        let readback = device.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "readback",
        )?;
        let result = self
            .submit_and_wait(device, |cb| {
                device.record(
                    cb,
                    Command::CopyBuffer {
                        src: buffer.handle(),
                        dst: readback.handle(),
                        src_offset: 0,
                        dst_offset: 0,
                        size,
                    },
                );
            })
            .and_then(|()| device.read_buffer(&readback, 0, len));
        device.destroy_buffer(readback);
        result
    }

    /// Release the fence and the command pool.
    pub fn destroy<D: RenderDevice>(self, device: &D) {
        device.destroy_fence(self.fence);
        device.destroy_command_pool(self.pool);
    }
}

/// Record a full-image copy from `staging`, surrounded by the layout
/// transitions into and back out of `TRANSFER_DST_OPTIMAL`.
pub(crate) fn record_image_copy<D: RenderDevice>(
    device: &D,
    cb: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    region: PixelRegion,
    from: vk::ImageLayout,
) {
    device.record(
        cb,
        Command::ImageBarrier {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: from,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
    );
    device.record(
        cb,
        Command::CopyBufferToImage {
            src: staging,
            dst: image,
            width: region.width,
            height: region.height,
            row_length: region.row_length(),
        },
    );
    device.record(
        cb,
        Command::ImageBarrier {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
    );
}

/// Tightly packed region for an image of `format`.
pub fn packed_region(width: u32, height: u32, format: vk::Format) -> Result<PixelRegion> {
    let texel = texel_size(format).ok_or(GpuError::UnsupportedFormat(format))?;
    Ok(PixelRegion::packed(width, height, texel))
}

/// Whether `texture` can take `region` in place.
pub(crate) fn matches_texture<D: RenderDevice>(texture: &Texture<D>, region: PixelRegion) -> bool {
    let extent = texture.image.extent();
    extent.width == region.width
        && extent.height == region.height
        && texel_size(texture.image.format()) == Some(region.texel_size)
}
