//! Persistent staging for high-frequency updates.
//!
//! One mapped staging buffer, one command buffer and one fence are kept
//! alive across calls. A call returns as soon as the copy is submitted; the
//! next call waits on the previous fence before touching the staging memory
//! again, so the CPU never overwrites bytes the GPU is still copying.

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::debug;
use vireo_core::PixelRegion;
use vireo_gpu::{Command, DeviceBuffer, DeviceImage, GpuError, RenderDevice, Result, Submission};

use crate::texture::Texture;
use crate::upload::{matches_texture, record_image_copy};

/// Stages that may read a streamed buffer.
const BUFFER_READ_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_INPUT.as_raw()
        | vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw(),
);

const BUFFER_READ_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::VERTEX_ATTRIBUTE_READ.as_raw()
        | vk::AccessFlags::INDEX_READ.as_raw()
        | vk::AccessFlags::UNIFORM_READ.as_raw()
        | vk::AccessFlags::SHADER_READ.as_raw(),
);

/// Reusable, fence-gated staging path.
pub struct StreamingUploader<D: RenderDevice> {
    staging: Option<D::Buffer>,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    /// Set once a copy is queued; the fence is only waited on while set.
    in_flight: bool,
    submissions: u64,
}

impl<D: RenderDevice> StreamingUploader<D> {
    /// Create the command buffer and fence. Staging memory is allocated on
    /// first use and grown on demand.
    pub fn new(device: &D) -> Result<Self> {
        let pool = device.create_command_pool(false)?;
        let command_buffer = match device.allocate_command_buffers(pool, 1) {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            Ok(_) => {
                device.destroy_command_pool(pool);
                return Err(GpuError::InvalidState("no streaming command buffer".into()));
            }
            Err(err) => {
                device.destroy_command_pool(pool);
                return Err(err);
            }
        };
        // Signaled so the first call does not wait.
        let fence = match device.create_fence(true) {
            Ok(fence) => fence,
            Err(err) => {
                device.destroy_command_pool(pool);
                return Err(err);
            }
        };
        Ok(Self {
            staging: None,
            pool,
            command_buffer,
            fence,
            in_flight: false,
            submissions: 0,
        })
    }

    /// Block until the previous copy has finished, then make sure the
    /// staging buffer can hold `len` bytes.
    fn reclaim(&mut self, device: &D, len: u64) -> Result<vk::Buffer> {
        if self.in_flight {
            device.wait_for_fence(self.fence)?;
            self.in_flight = false;
        }

        let capacity = self.staging.as_ref().map_or(0, DeviceBuffer::size);
        if capacity < len {
            if let Some(old) = self.staging.take() {
                device.destroy_buffer(old);
            }
            let size = len.next_power_of_two();
            debug!("Growing streaming staging buffer to {size} bytes");
            self.staging = Some(device.create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "streaming_staging",
            )?);
        }
        match &self.staging {
            Some(staging) => Ok(staging.handle()),
            None => Err(GpuError::InvalidState("streaming staging missing".into())),
        }
    }

    fn write_staging(&self, device: &D, data: &[u8]) -> Result<()> {
        match &self.staging {
            Some(staging) => device.write_buffer(staging, 0, data),
            None => Err(GpuError::InvalidState("streaming staging missing".into())),
        }
    }

    fn submit(&mut self, device: &D, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let cb = self.command_buffer;
        device.reset_command_buffer(cb)?;
        device.begin_command_buffer(cb, true)?;
        record(cb);
        device.end_command_buffer(cb)?;
        device.reset_fence(self.fence)?;
        // A rejected submit leaves the fence unsignaled with nothing queued
        // to signal it, so it must not be waited on.
        device.submit(&Submission::standalone(cb, Some(self.fence)))?;
        self.in_flight = true;
        self.submissions += 1;
        Ok(())
    }

    /// Overwrite `dst` at `offset` with `data` without waiting for the copy.
    ///
    /// Buffer barriers order the copy after earlier reads of `dst` and before
    /// later vertex, index, uniform and shader reads.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn stream_buffer(
        &mut self,
        device: &D,
        dst: &D::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as u64;
        if offset.checked_add(size).map_or(true, |end| end > dst.size()) {
            return Err(GpuError::Upload(format!(
                "stream of {size} bytes at {offset} overruns a {}-byte buffer",
                dst.size()
            )));
        }

        let staging = self.reclaim(device, size)?;
        self.write_staging(device, data)?;

        let dst = dst.handle();
        self.submit(device, |cb| {
            device.record(
                cb,
                Command::BufferBarrier {
                    buffer: dst,
                    src_stage: BUFFER_READ_STAGES,
                    src_access: BUFFER_READ_ACCESS,
                    dst_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_access: vk::AccessFlags::TRANSFER_WRITE,
                },
            );
            device.record(
                cb,
                Command::CopyBuffer {
                    src: staging,
                    dst,
                    src_offset: 0,
                    dst_offset: offset,
                    size,
                },
            );
            device.record(
                cb,
                Command::BufferBarrier {
                    buffer: dst,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_stage: BUFFER_READ_STAGES,
                    dst_access: BUFFER_READ_ACCESS,
                },
            );
        })
    }

    /// Refresh a texture in place: `SHADER_READ_ONLY -> TRANSFER_DST`,
    /// copy, `TRANSFER_DST -> SHADER_READ_ONLY`. The region must describe an
    /// image of the texture's size and texel size.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn stream_texture(
        &mut self,
        device: &D,
        texture: &Texture<D>,
        pixels: &[u8],
        region: PixelRegion,
    ) -> Result<()> {
        if !matches_texture(texture, region) {
            return Err(GpuError::Upload(format!(
                "streamed region {}x{} does not match a {}x{} {:?} texture",
                region.width,
                region.height,
                texture.width(),
                texture.height(),
                texture.format()
            )));
        }
        region.validate(pixels.len())?;
        let source = &pixels[..region.required_len() as usize];

        let staging = self.reclaim(device, source.len() as u64)?;
        self.write_staging(device, source)?;

        let image = texture.image().handle();
        self.submit(device, |cb| {
            record_image_copy(
                device,
                cb,
                staging,
                image,
                region,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })
    }

    /// Block until the last submitted copy has finished.
    pub fn flush(&mut self, device: &D) -> Result<()> {
        if self.in_flight {
            device.wait_for_fence(self.fence)?;
            self.in_flight = false;
        }
        Ok(())
    }

    /// Whether the last submitted copy has finished.
    pub fn is_idle(&self, device: &D) -> Result<bool> {
        if !self.in_flight {
            return Ok(true);
        }
        device.fence_signaled(self.fence)
    }

    /// Copies submitted so far.
    pub const fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Current staging capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.staging.as_ref().map_or(0, DeviceBuffer::size)
    }

    /// Wait for the last copy, then release everything.
    pub fn destroy(self, device: &D) -> Result<()> {
        let waited = if self.in_flight {
            device.wait_for_fence(self.fence)
        } else {
            Ok(())
        };
        if let Some(staging) = self.staging {
            device.destroy_buffer(staging);
        }
        device.destroy_fence(self.fence);
        device.destroy_command_pool(self.pool);
        waited
    }
}
