//! Scripted driver behavior and the operation log.

use crate::ledger::HandleKind;
use ash::vk;
use vireo_gpu::{AcquireStatus, PresentStatus};

/// Forced result for one acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireScript {
    OutOfDate,
    Suboptimal,
    /// Fail with a driver error.
    DeviceLost,
}

/// Operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    CreateBuffer,
    CreateImage,
    CreateImageView,
    CreateSwapchain,
    CreatePipeline,
    AllocateDescriptorSets,
    Submit,
}

/// One observable device operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create(HandleKind, u64),
    Destroy(HandleKind, u64),
    CreateSwapchain { extent: vk::Extent2D, images: u32 },
    Acquire(AcquireStatus),
    Present {
        image_index: u32,
        status: PresentStatus,
    },
    Submit {
        command_buffer: u64,
        fence: Option<u64>,
    },
    WaitFence(u64),
    ResetFence(u64),
    ResetCommandBuffer(u64),
    BeginCommandBuffer(u64),
    WriteBuffer {
        buffer: u64,
        len: usize,
    },
    ReadBuffer {
        buffer: u64,
        len: usize,
    },
    UpdateDescriptor {
        set: u64,
        binding: u32,
        target: u64,
    },
    QueueWaitIdle,
    WaitIdle,
    Shutdown,
}

impl Op {
    /// Whether this operation blocks on the whole queue or device.
    pub const fn is_full_wait(&self) -> bool {
        matches!(self, Self::QueueWaitIdle | Self::WaitIdle)
    }
}
