//! Frames-in-flight synchronization.
//!
//! [`FrameSynchronizer`] owns [`MAX_FRAMES_IN_FLIGHT`] frame slots, each a
//! semaphore/semaphore/fence triple, plus a map from swapchain image to the
//! slot whose submission last rendered it.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. begin_frame:        wait slot fence (bounded), acquire image (signals acquire semaphore)
//! 2. track_image:        wait the fence of whichever slot last rendered the image,
//!                        then claim the image for this slot
//! 3. (caller writes per-image uniforms)
//! 4. submit_and_present: reset slot fence, submit (wait acquire, signal complete + fence),
//!                        present (wait complete), advance the frame counter
//! ```
//!
//! A slot fence is reset only right before its submission, so a frame aborted
//! after step 1 leaves the fence signaled and the next wait on it returns
//! immediately. A frame dropped between steps 1 and 4 goes through
//! [`FrameSynchronizer::abandon_frame`] so its acquire semaphore is not reused
//! while still signaled.

use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use renderer_rhi::{AcquireOutcome, FrameSubmit, Gpu, PresentOutcome};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{RendererError, RendererResult};

/// Where a frame slot is in its cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    /// The slot's previous work is known to be complete.
    #[default]
    Idle,
    /// An image was acquired for this slot and nothing is submitted yet.
    Acquiring,
    /// Work was submitted; presentation has not been queued.
    Submitted,
    /// Presentation was queued; the fence has not been observed since.
    PresentPending,
}

struct FrameSlot {
    acquire: vk::Semaphore,
    complete: vk::Semaphore,
    in_flight: vk::Fence,
    state: SlotState,
}

/// An acquired image, valid until the matching
/// [`submit_and_present`](FrameSynchronizer::submit_and_present).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTicket {
    pub slot: usize,
    pub image_index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStart {
    Ready(FrameTicket),
    /// Nothing was acquired; the swapchain must be recreated before the next frame.
    Stale,
}

/// Bounds the CPU to [`MAX_FRAMES_IN_FLIGHT`] unretired submissions and keeps
/// two submissions from rendering the same swapchain image concurrently.
///
/// # Thread Safety
///
/// Driven from the render thread only; GPU progress is observed through fences.
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    /// Swapchain image index -> slot whose fence guards it.
    image_slots: Vec<Option<usize>>,
    frame_counter: u64,
    timeout: Duration,
}

impl FrameSynchronizer {
    /// Creates the frame slots. Fences start signaled so the first wait returns.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore or fence creation fails; anything created
    /// before the failure is destroyed.
    pub fn new(gpu: &mut dyn Gpu, image_count: usize, timeout: Duration) -> RendererResult<Self> {
        let mut sync = Self {
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            image_slots: vec![None; image_count],
            frame_counter: 0,
            timeout,
        };

        for i in 0..MAX_FRAMES_IN_FLIGHT {
            match Self::create_slot(gpu) {
                Ok(slot) => sync.slots.push(slot),
                Err(e) => {
                    sync.destroy(gpu);
                    return Err(e);
                }
            }
            debug!("Created frame slot {}", i);
        }

        info!(
            "Frame synchronizer created with {} frames in flight, {} swapchain image(s)",
            MAX_FRAMES_IN_FLIGHT, image_count
        );
        Ok(sync)
    }

    fn create_slot(gpu: &mut dyn Gpu) -> RendererResult<FrameSlot> {
        let acquire = gpu.create_semaphore()?;
        let complete = match gpu.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                gpu.destroy_semaphore(acquire);
                return Err(e.into());
            }
        };
        let in_flight = match gpu.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                gpu.destroy_semaphore(complete);
                gpu.destroy_semaphore(acquire);
                return Err(e.into());
            }
        };
        Ok(FrameSlot {
            acquire,
            complete,
            in_flight,
            state: SlotState::Idle,
        })
    }

    /// Slot used by the next frame: `frame_counter mod N`.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    /// Slot currently guarding swapchain image `image_index`, if any.
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.image_slots.get(image_index as usize).copied().flatten()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the current slot's previous submission, then acquires an image.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::DeviceUnresponsive`] when the fence wait or the
    /// acquire exceeds the timeout.
    pub fn begin_frame(&mut self, gpu: &mut dyn Gpu) -> RendererResult<FrameStart> {
        let slot = self.current_slot();
        let timeout = self.timeout;

        gpu.wait_for_fence(self.slots[slot].in_flight, timeout)?;
        self.slots[slot].state = SlotState::Idle;

        match gpu.acquire_next_image(self.slots[slot].acquire, timeout)? {
            AcquireOutcome::Stale => {
                warn!("Swapchain out of date during acquire");
                Ok(FrameStart::Stale)
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if image_index as usize >= self.image_slots.len() {
                    return Err(RendererError::Init(format!(
                        "acquired image {} but only {} are tracked",
                        image_index,
                        self.image_slots.len()
                    )));
                }
                self.slots[slot].state = SlotState::Acquiring;
                Ok(FrameStart::Ready(FrameTicket {
                    slot,
                    image_index,
                    suboptimal,
                }))
            }
        }
    }

    /// Makes sure no other slot's unretired work still targets the image, then
    /// claims it for the ticket's slot.
    ///
    /// Must run before anything indexed by `image_index` is written on the CPU.
    pub fn track_image(&mut self, gpu: &mut dyn Gpu, ticket: &FrameTicket) -> RendererResult<()> {
        let index = ticket.image_index as usize;
        if let Some(owner) = self.image_slots[index]
            && owner != ticket.slot
        {
            gpu.wait_for_fence(self.slots[owner].in_flight, self.timeout)?;
            self.slots[owner].state = SlotState::Idle;
        }
        self.image_slots[index] = Some(ticket.slot);
        Ok(())
    }

    /// Submits the image's prebuilt command buffer and queues it for presentation.
    ///
    /// The frame counter advances once the submission is made, whatever the
    /// present outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the fence reset, the submit or the present fails.
    pub fn submit_and_present(
        &mut self,
        gpu: &mut dyn Gpu,
        ticket: &FrameTicket,
        command_buffer: vk::CommandBuffer,
    ) -> RendererResult<PresentOutcome> {
        let slot = &mut self.slots[ticket.slot];

        gpu.reset_fence(slot.in_flight)?;
        gpu.submit(&FrameSubmit {
            command_buffer,
            image_index: ticket.image_index,
            wait_semaphore: slot.acquire,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: slot.complete,
            fence: slot.in_flight,
        })?;
        slot.state = SlotState::Submitted;
        self.frame_counter += 1;

        let outcome = gpu.present(ticket.image_index, slot.complete)?;
        slot.state = SlotState::PresentPending;
        if outcome == PresentOutcome::Stale {
            warn!("Swapchain out of date or suboptimal during present");
        }
        Ok(outcome)
    }

    /// Drops a frame that was acquired but will not be submitted.
    ///
    /// The slot's acquire semaphore carries a signal no submission will wait
    /// on, so it is replaced before the slot acquires again. The slot fence
    /// was never reset and stays signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement semaphore cannot be created; the
    /// old one is kept in that case.
    pub fn abandon_frame(&mut self, gpu: &mut dyn Gpu, ticket: &FrameTicket) -> RendererResult<()> {
        let fresh = gpu.create_semaphore()?;
        let slot = &mut self.slots[ticket.slot];
        let spent = std::mem::replace(&mut slot.acquire, fresh);
        gpu.destroy_semaphore(spent);
        slot.state = SlotState::Idle;
        warn!(
            "Abandoned frame on slot {} (image {}) before submission",
            ticket.slot, ticket.image_index
        );
        Ok(())
    }

    /// Forgets every image claim and sizes the map for the new swapchain.
    ///
    /// Call after the device was idled and the swapchain rebuilt; the slot
    /// count is unchanged.
    pub fn on_swapchain_recreated(&mut self, image_count: usize) {
        self.image_slots = vec![None; image_count];
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        debug!("Image fence map reset for {} image(s)", image_count);
    }

    /// Bounded wait on every slot fence.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::DeviceUnresponsive`] if any fence fails to signal in time.
    pub fn wait_all(&mut self, gpu: &mut dyn Gpu) -> RendererResult<()> {
        for slot in &mut self.slots {
            gpu.wait_for_fence(slot.in_flight, self.timeout)?;
            slot.state = SlotState::Idle;
        }
        Ok(())
    }

    /// Destroys every slot. The device must be idle.
    pub fn destroy(&mut self, gpu: &mut dyn Gpu) {
        for slot in self.slots.drain(..) {
            gpu.destroy_fence(slot.in_flight);
            gpu.destroy_semaphore(slot.complete);
            gpu.destroy_semaphore(slot.acquire);
        }
        self.image_slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::headless::{HeadlessEvent, HeadlessGpu, ScriptedAcquire};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn gpu(images: usize) -> HeadlessGpu {
        HeadlessGpu::new(
            vk::Extent2D {
                width: 64,
                height: 64,
            },
            images,
        )
    }

    fn run_frame(sync: &mut FrameSynchronizer, gpu: &mut HeadlessGpu) -> FrameTicket {
        let FrameStart::Ready(ticket) = sync.begin_frame(gpu).unwrap() else {
            panic!("unexpected stale acquire");
        };
        sync.track_image(gpu, &ticket).unwrap();
        sync.submit_and_present(gpu, &ticket, vk::CommandBuffer::null())
            .unwrap();
        ticket
    }

    #[test]
    fn test_slots_rotate() {
        let mut gpu = gpu(3);
        let mut sync = FrameSynchronizer::new(&mut gpu, 3, TIMEOUT).unwrap();
        let slots: Vec<usize> = (0..4).map(|_| run_frame(&mut sync, &mut gpu).slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert_eq!(sync.frame_counter(), 4);
        assert_eq!(sync.slot_state(1), Some(SlotState::PresentPending));
    }

    #[test]
    fn test_track_image_waits_previous_owner() {
        let mut gpu = gpu(2);
        let mut sync = FrameSynchronizer::new(&mut gpu, 2, TIMEOUT).unwrap();
        // Slot 0 renders image 1, then slot 1 acquires image 1 again.
        gpu.script_acquire([ScriptedAcquire::Image(1), ScriptedAcquire::Image(1)]);
        run_frame(&mut sync, &mut gpu);

        let FrameStart::Ready(ticket) = sync.begin_frame(&mut gpu).unwrap() else {
            panic!("unexpected stale acquire");
        };
        assert_eq!(ticket.slot, 1);
        gpu.clear_events();
        sync.track_image(&mut gpu, &ticket).unwrap();

        assert!(matches!(
            gpu.events(),
            [HeadlessEvent::WaitFence { timed_out: false, .. }]
        ));
        assert_eq!(sync.image_owner(1), Some(1));
    }

    #[test]
    fn test_stale_acquire_keeps_fence_signaled() {
        let mut gpu = gpu(2);
        let mut sync = FrameSynchronizer::new(&mut gpu, 2, TIMEOUT).unwrap();
        gpu.script_acquire([ScriptedAcquire::Stale]);

        assert_eq!(sync.begin_frame(&mut gpu).unwrap(), FrameStart::Stale);
        assert_eq!(sync.frame_counter(), 0);
        // Retrying the same slot must not block on an unsubmitted fence.
        run_frame(&mut sync, &mut gpu);
        assert_eq!(sync.frame_counter(), 1);
    }

    #[test]
    fn test_hung_gpu_reports_unresponsive() {
        let mut gpu = gpu(2);
        let mut sync = FrameSynchronizer::new(&mut gpu, 2, TIMEOUT).unwrap();
        run_frame(&mut sync, &mut gpu);
        run_frame(&mut sync, &mut gpu);
        gpu.set_hung(true);

        let err = sync.begin_frame(&mut gpu).unwrap_err();
        assert!(matches!(err, RendererError::DeviceUnresponsive { waited } if waited == TIMEOUT));
    }

    #[test]
    fn test_abandoned_frame_gets_a_fresh_acquire_semaphore() {
        let mut gpu = gpu(3);
        let mut sync = FrameSynchronizer::new(&mut gpu, 3, TIMEOUT).unwrap();
        run_frame(&mut sync, &mut gpu);

        // Slot 1 acquires image 0 while slot 0 can no longer retire.
        gpu.set_hung(true);
        gpu.script_acquire([ScriptedAcquire::Image(0)]);
        let FrameStart::Ready(ticket) = sync.begin_frame(&mut gpu).unwrap() else {
            panic!("unexpected stale acquire");
        };
        assert_eq!(ticket.slot, 1);
        assert!(sync.track_image(&mut gpu, &ticket).is_err());
        assert_eq!(sync.slot_state(1), Some(SlotState::Acquiring));

        let live = gpu.live_objects();
        let spent = sync.slots[1].acquire;
        sync.abandon_frame(&mut gpu, &ticket).unwrap();

        assert_ne!(sync.slots[1].acquire, spent);
        assert_eq!(sync.slot_state(1), Some(SlotState::Idle));
        assert_eq!(gpu.live_objects(), live);
        assert_eq!(gpu.invalid_destroys(), 0);
        assert_eq!(sync.frame_counter(), 1);

        gpu.set_hung(false);
        assert_eq!(run_frame(&mut sync, &mut gpu).slot, 1);
    }

    #[test]
    fn test_recreation_resets_image_map() {
        let mut gpu = gpu(2);
        let mut sync = FrameSynchronizer::new(&mut gpu, 2, TIMEOUT).unwrap();
        run_frame(&mut sync, &mut gpu);
        assert!(sync.image_owner(0).is_some());

        sync.on_swapchain_recreated(4);
        assert_eq!(sync.slot_count(), MAX_FRAMES_IN_FLIGHT);
        assert!((0..4).all(|i| sync.image_owner(i).is_none()));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut gpu = gpu(2);
        let baseline = gpu.live_objects();
        let mut sync = FrameSynchronizer::new(&mut gpu, 2, TIMEOUT).unwrap();
        assert_eq!(gpu.live_objects(), baseline + 3 * MAX_FRAMES_IN_FLIGHT);
        sync.destroy(&mut gpu);
        assert_eq!(gpu.live_objects(), baseline);
    }
}
