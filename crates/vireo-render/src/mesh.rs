//! Device-local geometry.

use ash::vk;
use vireo_gpu::{Command, DeviceBuffer, RenderDevice};

/// Vertex buffer with an optional 32-bit index buffer.
pub struct Mesh<D: RenderDevice> {
    pub(crate) vertex_buffer: D::Buffer,
    pub(crate) index_buffer: Option<D::Buffer>,
    pub(crate) vertex_count: u32,
    pub(crate) index_count: u32,
}

impl<D: RenderDevice> Mesh<D> {
    pub fn vertex_buffer(&self) -> &D::Buffer {
        &self.vertex_buffer
    }

    pub const fn index_buffer(&self) -> Option<&D::Buffer> {
        self.index_buffer.as_ref()
    }

    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    pub const fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    /// Bind the buffers and draw `instances` copies.
    ///
    /// A mesh with nothing to draw records nothing.
    pub fn record_draw(&self, device: &D, command_buffer: vk::CommandBuffer, instances: u32) {
        if instances == 0 {
            return;
        }
        match &self.index_buffer {
            Some(indices) if self.index_count > 0 => {
                device.record(
                    command_buffer,
                    Command::BindVertexBuffer(self.vertex_buffer.handle()),
                );
                device.record(command_buffer, Command::BindIndexBuffer(indices.handle()));
                device.record(
                    command_buffer,
                    Command::DrawIndexed {
                        index_count: self.index_count,
                        instance_count: instances,
                    },
                );
            }
            None if self.vertex_count > 0 => {
                device.record(
                    command_buffer,
                    Command::BindVertexBuffer(self.vertex_buffer.handle()),
                );
                device.record(
                    command_buffer,
                    Command::Draw {
                        vertex_count: self.vertex_count,
                        instance_count: instances,
                    },
                );
            }
            _ => tracing::trace!("Skipping draw of an empty mesh"),
        }
    }

    /// Give up ownership of the buffers, e.g. to retire them once the
    /// frames that still read them have completed.
    pub fn into_buffers(self) -> (D::Buffer, Option<D::Buffer>) {
        (self.vertex_buffer, self.index_buffer)
    }

    /// Release both buffers. No pending GPU work may reference them.
    pub fn destroy(self, device: &D) {
        if let Some(indices) = self.index_buffer {
            device.destroy_buffer(indices);
        }
        device.destroy_buffer(self.vertex_buffer);
    }
}
