//! Command buffer management.

use crate::device::Submission;
use crate::error::Result;
use ash::vk;

/// Create a command pool whose buffers can be reset individually.
///
/// # Safety
/// The device must be valid and the queue family must exist.
pub unsafe fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
    transient: bool,
) -> Result<vk::CommandPool> {
    let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
    if transient {
        flags |= vk::CommandPoolCreateFlags::TRANSIENT;
    }
    let create_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(flags);

    // SAFETY: device is valid per the caller's contract.
    let pool = unsafe { device.create_command_pool(&create_info, None)? };
    Ok(pool)
}

/// Allocate primary command buffers.
///
/// # Safety
/// The device and pool must be valid.
pub unsafe fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    // SAFETY: handles are valid per the caller's contract.
    let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
    Ok(buffers)
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    // SAFETY: handles are valid per the caller's contract.
    unsafe { device.begin_command_buffer(cmd, &begin_info)? };
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    // SAFETY: handles are valid per the caller's contract.
    unsafe { device.end_command_buffer(cmd)? };
    Ok(())
}

/// Submit one command buffer to a queue.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit_command_buffer(
    device: &ash::Device,
    queue: vk::Queue,
    submission: &Submission,
) -> Result<()> {
    let command_buffers = [submission.command_buffer];
    let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
    let signal_semaphores: Vec<_> = submission.signal.into_iter().collect();

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores);

    // SAFETY: handles are valid per the caller's contract.
    unsafe {
        device.queue_submit(
            queue,
            &[submit_info],
            submission.fence.unwrap_or_else(vk::Fence::null),
        )?;
    }
    Ok(())
}
