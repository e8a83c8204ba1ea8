//! Frame synchronization.
//!
//! [`FrameSynchronizer`] runs one acquire, record, submit, present cycle at
//! a time over a small ring of frame slots. Each slot owns an
//! image-available semaphore, an in-flight fence and a command buffer; each
//! swap image owns a render-finished semaphore.

use std::collections::VecDeque;
use std::fmt;

use ash::vk;
use tracing::{debug, trace};
use vireo_core::constants::MAX_FRAMES_IN_FLIGHT;
use vireo_gpu::{AcquireStatus, GpuError, PresentStatus, RenderDevice, Result, Submission};
use vireo_render::SurfaceState;

/// Transitions kept for diagnostics.
const HISTORY_LEN: usize = 64;

/// Where the synchronizer is in the frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    /// The surface must be rebuilt before the next acquire.
    Rebuilding,
}

impl FrameState {
    /// Whether the cycle allows moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Acquiring | Self::Rebuilding)
                | (Self::Acquiring, Self::Recording | Self::Rebuilding)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Presenting)
                | (Self::Presenting, Self::Idle | Self::Rebuilding)
                | (Self::Rebuilding, Self::Idle)
        )
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a cycle drew nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The window has no drawable area.
    ZeroExtent,
    /// The presentation engine rejected the acquire; the surface was
    /// rebuilt instead.
    OutOfDate,
}

/// Result of one frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped(SkipReason),
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub frame: u64,
    pub from: FrameState,
    pub to: FrameState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} -> {}", self.frame, self.from, self.to)
    }
}

/// Image handed out by [`FrameSynchronizer::begin`], recording in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredFrame {
    pub slot: usize,
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    /// The presentation engine asked for a rebuild after this frame.
    pub suboptimal: bool,
}

struct FrameSlot {
    image_available: vk::Semaphore,
    in_flight: vk::Fence,
    command_buffer: vk::CommandBuffer,
}

/// Per-frame synchronization primitives and the cycle state machine.
pub struct FrameSynchronizer {
    pool: vk::CommandPool,
    /// Configured frames in flight; the live count never exceeds the swap
    /// image count.
    requested: usize,
    slots: Vec<FrameSlot>,
    render_finished: Vec<vk::Semaphore>,
    /// Slot whose fence guards each swap image's last submission.
    images_in_flight: Vec<Option<usize>>,
    current: usize,
    state: FrameState,
    rebuild_after_present: bool,
    frame_number: u64,
    history: VecDeque<Transition>,
}

impl FrameSynchronizer {
    /// Create `frames_in_flight` slots, clamped to the swap image count of
    /// `surface` when there is one. Without a surface the clamp is applied
    /// by the first [`Self::rebuilt`] that has one.
    pub fn new<D: RenderDevice>(
        device: &D,
        frames_in_flight: usize,
        surface: Option<&SurfaceState<D>>,
    ) -> Result<Self> {
        let requested = frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        let count = slot_count(requested, surface);

        let mut frames = Self {
            pool: device.create_command_pool(false)?,
            requested,
            slots: Vec::with_capacity(count),
            render_finished: Vec::new(),
            images_in_flight: Vec::new(),
            current: 0,
            state: FrameState::Idle,
            rebuild_after_present: false,
            frame_number: 0,
            history: VecDeque::with_capacity(HISTORY_LEN),
        };
        if let Err(err) = frames.init(device, count, surface) {
            frames.destroy(device);
            return Err(err);
        }
        debug!("Frame synchronizer ready with {count} frames in flight");
        Ok(frames)
    }

    fn init<D: RenderDevice>(
        &mut self,
        device: &D,
        count: usize,
        surface: Option<&SurfaceState<D>>,
    ) -> Result<()> {
        self.add_slots(device, count)?;
        self.attach(device, surface)
    }

    fn add_slots<D: RenderDevice>(&mut self, device: &D, count: usize) -> Result<()> {
        let command_buffers = device.allocate_command_buffers(self.pool, count as u32)?;
        for command_buffer in command_buffers {
            let image_available = device.create_semaphore()?;
            let in_flight = match device.create_fence(true) {
                Ok(fence) => fence,
                Err(err) => {
                    device.destroy_semaphore(image_available);
                    return Err(err);
                }
            };
            self.slots.push(FrameSlot {
                image_available,
                in_flight,
                command_buffer,
            });
        }
        Ok(())
    }

    /// Grow or shrink the slot ring to `count`. The device must be idle.
    fn resize_slots<D: RenderDevice>(&mut self, device: &D, count: usize) -> Result<()> {
        if count == self.slots.len() {
            return Ok(());
        }
        while self.slots.len() > count {
            if let Some(slot) = self.slots.pop() {
                device.destroy_fence(slot.in_flight);
                device.destroy_semaphore(slot.image_available);
                device.free_command_buffers(self.pool, &[slot.command_buffer]);
            }
        }
        if self.slots.len() < count {
            self.add_slots(device, count - self.slots.len())?;
        }
        self.current %= self.slots.len().max(1);
        debug!("Frames in flight now {}", self.slots.len());
        Ok(())
    }

    /// Match the per-image semaphores to `surface`. The device must be idle.
    fn attach<D: RenderDevice>(
        &mut self,
        device: &D,
        surface: Option<&SurfaceState<D>>,
    ) -> Result<()> {
        for semaphore in self.render_finished.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        self.images_in_flight.clear();
        let Some(surface) = surface else {
            return Ok(());
        };
        for _ in 0..surface.image_count() {
            self.render_finished.push(device.create_semaphore()?);
        }
        self.images_in_flight = vec![None; surface.image_count()];
        Ok(())
    }

    fn transition(&mut self, next: FrameState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(GpuError::InvalidState(format!(
                "frame {}: illegal transition {} -> {next}",
                self.frame_number, self.state
            )));
        }
        trace!("frame {}: {} -> {next}", self.frame_number, self.state);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            frame: self.frame_number,
            from: self.state,
            to: next,
        });
        self.state = next;
        Ok(())
    }

    /// Wait for the current slot, acquire an image and open its command
    /// buffer.
    ///
    /// Returns `None` when the surface is out of date; the synchronizer is
    /// then in [`FrameState::Rebuilding`] and the slot's fence is untouched.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin<D: RenderDevice>(
        &mut self,
        device: &D,
        surface: &SurfaceState<D>,
    ) -> Result<Option<AcquiredFrame>> {
        if self.render_finished.len() != surface.image_count() {
            return Err(GpuError::InvalidState(
                "frame synchronizer not attached to the current surface".into(),
            ));
        }
        let current = self.current;
        let (image_available, in_flight, command_buffer) = {
            let slot = &self.slots[current];
            (slot.image_available, slot.in_flight, slot.command_buffer)
        };

        device.wait_for_fence(in_flight)?;
        self.transition(FrameState::Acquiring)?;

        let (image_index, suboptimal) =
            match device.acquire_next_image(surface.swapchain(), image_available)? {
                AcquireStatus::OutOfDate => {
                    debug!("Acquire reported an out-of-date surface");
                    self.transition(FrameState::Rebuilding)?;
                    return Ok(None);
                }
                AcquireStatus::Acquired {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
            };

        let index = image_index as usize;
        if index >= self.images_in_flight.len() {
            return Err(GpuError::InvalidState(format!(
                "acquired image {image_index} of {}",
                self.images_in_flight.len()
            )));
        }
        // Another slot may still be rendering into this image.
        if let Some(other) = self.images_in_flight[index] {
            if other != current {
                device.wait_for_fence(self.slots[other].in_flight)?;
            }
        }
        self.images_in_flight[index] = Some(current);

        // Only reset once work is certain to be submitted.
        device.reset_fence(in_flight)?;
        device.reset_command_buffer(command_buffer)?;
        device.begin_command_buffer(command_buffer, true)?;
        if suboptimal {
            self.rebuild_after_present = true;
        }
        self.transition(FrameState::Recording)?;

        Ok(Some(AcquiredFrame {
            slot: current,
            image_index,
            command_buffer,
            suboptimal,
        }))
    }

    /// Close, submit and present a frame opened by [`Self::begin`].
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn finish<D: RenderDevice>(
        &mut self,
        device: &D,
        surface: &SurfaceState<D>,
        frame: AcquiredFrame,
    ) -> Result<PresentStatus> {
        if self.state != FrameState::Recording {
            return Err(GpuError::InvalidState(format!(
                "finish called while {}",
                self.state
            )));
        }
        let slot = &self.slots[frame.slot];
        let (image_available, in_flight) = (slot.image_available, slot.in_flight);
        let render_finished = self.render_finished[frame.image_index as usize];

        device.end_command_buffer(frame.command_buffer)?;
        device.submit(&Submission {
            command_buffer: frame.command_buffer,
            wait: Some((
                image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(render_finished),
            fence: Some(in_flight),
        })?;
        self.transition(FrameState::Submitted)?;

        self.transition(FrameState::Presenting)?;
        let status = device.present(surface.swapchain(), frame.image_index, render_finished)?;

        self.current = (self.current + 1) % self.slots.len();
        self.frame_number += 1;
        if status.needs_rebuild() || std::mem::take(&mut self.rebuild_after_present) {
            debug!("Present reported {status:?}, scheduling rebuild");
            self.transition(FrameState::Rebuilding)?;
        } else {
            self.transition(FrameState::Idle)?;
        }
        Ok(status)
    }

    /// Schedule a rebuild before the next acquire, e.g. after a resize.
    pub fn request_rebuild(&mut self) -> Result<()> {
        match self.state {
            FrameState::Rebuilding => Ok(()),
            _ => self.transition(FrameState::Rebuilding),
        }
    }

    /// Return to [`FrameState::Idle`] once the surface has been rebuilt (or
    /// dropped, if the window has no drawable area). The device must be
    /// idle.
    pub fn rebuilt<D: RenderDevice>(
        &mut self,
        device: &D,
        surface: Option<&SurfaceState<D>>,
    ) -> Result<()> {
        self.attach(device, surface)?;
        if surface.is_some() {
            self.resize_slots(device, slot_count(self.requested, surface))?;
        }
        self.rebuild_after_present = false;
        if self.state == FrameState::Rebuilding {
            self.transition(FrameState::Idle)?;
        }
        Ok(())
    }

    pub const fn state(&self) -> FrameState {
        self.state
    }

    pub fn needs_rebuild(&self) -> bool {
        self.state == FrameState::Rebuilding
    }

    /// Frames submitted so far.
    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next [`Self::begin`] will use.
    pub const fn current_slot(&self) -> usize {
        self.current
    }

    /// Fence guarding the last submission of `slot`.
    pub fn fence(&self, slot: usize) -> Option<vk::Fence> {
        self.slots.get(slot).map(|s| s.in_flight)
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    /// Release every primitive. The device must be idle.
    pub fn destroy<D: RenderDevice>(mut self, device: &D) {
        for semaphore in self.render_finished.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        for slot in self.slots.drain(..) {
            device.destroy_fence(slot.in_flight);
            device.destroy_semaphore(slot.image_available);
        }
        // Frees the command buffers with it.
        device.destroy_command_pool(self.pool);
    }
}

/// Slots for `requested` frames in flight on `surface`.
fn slot_count<D: RenderDevice>(requested: usize, surface: Option<&SurfaceState<D>>) -> usize {
    surface.map_or(requested, |s| requested.min(s.image_count()).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_cycle_is_allowed() {
        let cycle = [
            FrameState::Idle,
            FrameState::Acquiring,
            FrameState::Recording,
            FrameState::Submitted,
            FrameState::Presenting,
            FrameState::Idle,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn rebuild_edges() {
        assert!(FrameState::Acquiring.can_transition_to(FrameState::Rebuilding));
        assert!(FrameState::Presenting.can_transition_to(FrameState::Rebuilding));
        assert!(FrameState::Idle.can_transition_to(FrameState::Rebuilding));
        assert!(FrameState::Rebuilding.can_transition_to(FrameState::Idle));
        assert!(!FrameState::Recording.can_transition_to(FrameState::Rebuilding));
        assert!(!FrameState::Rebuilding.can_transition_to(FrameState::Acquiring));
    }

    #[test]
    fn no_shortcuts_through_the_cycle() {
        assert!(!FrameState::Idle.can_transition_to(FrameState::Recording));
        assert!(!FrameState::Acquiring.can_transition_to(FrameState::Submitted));
        assert!(!FrameState::Recording.can_transition_to(FrameState::Presenting));
        assert!(!FrameState::Submitted.can_transition_to(FrameState::Idle));
    }

    #[test]
    fn transition_display() {
        let transition = Transition {
            frame: 3,
            from: FrameState::Acquiring,
            to: FrameState::Rebuilding,
        };
        assert_eq!(transition.to_string(), "#3 Acquiring -> Rebuilding");
    }
}
