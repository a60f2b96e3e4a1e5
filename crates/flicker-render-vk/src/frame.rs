// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use flicker_render::FrameStatus;
use tracing::debug;

use crate::error::{GfxError, VkResultExt};

/// CPU may run at most this many frames ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Per-slot sync triple.
#[derive(Clone, Copy, Debug)]
pub struct SlotSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Sync objects for every slot. Recreated with each swapchain generation so
/// an abandoned frame never leaves a fence unsignalled.
#[derive(Debug, Default)]
pub struct FrameSync {
    pub slots: Vec<SlotSync>,
}

impl FrameSync {
    pub unsafe fn create(device: &ash::Device) -> Result<Self, GfxError> {
        let mut out = Self {
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
        };
        for _ in 0..FRAMES_IN_FLIGHT {
            match create_slot(device) {
                Ok(slot) => out.slots.push(slot),
                Err(e) => {
                    out.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for s in self.slots.drain(..) {
            device.destroy_semaphore(s.image_available, None);
            device.destroy_semaphore(s.render_finished, None);
            device.destroy_fence(s.in_flight, None);
        }
    }
}

unsafe fn create_slot(device: &ash::Device) -> Result<SlotSync, GfxError> {
    let sem_info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    // signalled so the first wait on a fresh slot returns at once
    let fence_info = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let image_available = device
        .create_semaphore(&sem_info, None)
        .call("create_semaphore")?;
    let render_finished = match device.create_semaphore(&sem_info, None) {
        Ok(s) => s,
        Err(e) => {
            device.destroy_semaphore(image_available, None);
            return Err(GfxError::from_vk("create_semaphore", e));
        }
    };
    let in_flight = match device.create_fence(&fence_info, None) {
        Ok(f) => f,
        Err(e) => {
            device.destroy_semaphore(render_finished, None);
            device.destroy_semaphore(image_available, None);
            return Err(GfxError::from_vk("create_fence", e));
        }
    };
    Ok(SlotSync {
        image_available,
        render_finished,
        in_flight,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signalled; nothing of ours is on the GPU.
    Idle,
    Submitted,
    Presented,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image(usize),
    /// Out of date or suboptimal: the swapchain must be rebuilt.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Ok,
    Stale,
}

/// The device operations one frame needs. `Gpu` implements this on top of
/// Vulkan; tests drive the scheduler with a simulated device.
pub trait FrameOps {
    fn image_count(&self) -> usize;
    /// Blocks until the slot's last submission has completed.
    fn wait_slot(&mut self, slot: usize) -> Result<(), GfxError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), GfxError>;
    fn acquire(&mut self, slot: usize) -> Result<Acquired, GfxError>;
    fn write_uniform(&mut self, image: usize, bytes: &[u8]) -> Result<(), GfxError>;
    fn submit(&mut self, slot: usize, image: usize) -> Result<(), GfxError>;
    fn present(&mut self, slot: usize, image: usize) -> Result<Presented, GfxError>;
    /// Returns and clears a pending resize notification.
    fn take_resize_request(&mut self) -> bool;
    /// The window is minimised; nothing can be presented.
    fn framebuffer_is_zero(&self) -> bool;
    /// `false` while swapchain creation is deferred on a zero surface extent.
    fn has_swapchain(&self) -> bool;
    fn wait_idle(&mut self) -> Result<(), GfxError>;
    /// Replaces every extent-dependent object. Only called after `wait_idle`.
    fn recreate(&mut self) -> Result<(), GfxError>;
}

/// Frame pacing across `FRAMES_IN_FLIGHT` slots.
#[derive(Debug)]
pub struct FrameScheduler {
    current: usize,
    slots: [SlotState; FRAMES_IN_FLIGHT],
    /// Slot that last rendered each swapchain image.
    image_owner: Vec<Option<usize>>,
    /// A slot fence was reset but never resubmitted. Waiting on it again
    /// would block forever, so the next call rebuilds instead.
    sync_lost: bool,
}

impl FrameScheduler {
    pub fn new(image_count: usize) -> Self {
        Self {
            current: 0,
            slots: [SlotState::Idle; FRAMES_IN_FLIGHT],
            image_owner: vec![None; image_count],
            sync_lost: false,
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// A new swapchain generation starts from a clean slate.
    pub fn on_rebuild(&mut self, image_count: usize) {
        self.current = 0;
        self.slots = [SlotState::Idle; FRAMES_IN_FLIGHT];
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
        self.sync_lost = false;
    }

    /// `Suspended` when the rebuild had to defer the swapchain again.
    fn rebuild<O: FrameOps>(&mut self, ops: &mut O) -> Result<FrameStatus, GfxError> {
        ops.wait_idle()?;
        ops.recreate()?;
        self.on_rebuild(ops.image_count());
        if ops.has_swapchain() {
            Ok(FrameStatus::Recreated)
        } else {
            Ok(FrameStatus::Suspended)
        }
    }

    pub fn draw_frame<O: FrameOps>(&mut self, ops: &mut O, ubo: &[u8]) -> Result<FrameStatus, GfxError> {
        if ops.framebuffer_is_zero() {
            return Ok(FrameStatus::Suspended);
        }
        if !ops.has_swapchain() {
            debug!("retrying deferred swapchain");
            return self.rebuild(ops);
        }
        if self.sync_lost {
            debug!("previous frame failed before submit, rebuilding sync");
            return self.rebuild(ops);
        }

        let slot = self.current;
        ops.wait_slot(slot)?;
        self.slots[slot] = SlotState::Idle;

        let image = match self.reset_and_submit(ops, slot, ubo) {
            Ok(Some(image)) => image,
            Ok(None) => {
                debug!("acquire reported a stale swapchain");
                return self.rebuild(ops);
            }
            Err(e) => {
                self.sync_lost = true;
                return Err(e);
            }
        };
        self.slots[slot] = SlotState::Submitted;

        let presented = ops.present(slot, image)?;
        self.slots[slot] = SlotState::Presented;

        let resize = ops.take_resize_request();
        if presented == Presented::Stale || resize {
            debug!("present stale = {}, resize requested = {}", presented == Presented::Stale, resize);
            return self.rebuild(ops);
        }

        self.current = (slot + 1) % FRAMES_IN_FLIGHT;
        Ok(FrameStatus::Presented)
    }

    /// Everything between the fence reset and the submit that signals it
    /// again. `None` when the acquire found the swapchain stale.
    fn reset_and_submit<O: FrameOps>(&mut self, ops: &mut O, slot: usize, ubo: &[u8]) -> Result<Option<usize>, GfxError> {
        ops.reset_slot(slot)?;

        let image = match ops.acquire(slot)? {
            Acquired::Image(i) => i,
            Acquired::Stale => return Ok(None),
        };

        // the image may still be in use by the other slot's submission
        if let Some(owner) = self.image_owner.get(image).copied().flatten() {
            if owner != slot {
                ops.wait_slot(owner)?;
                self.slots[owner] = SlotState::Idle;
            }
        }
        if let Some(o) = self.image_owner.get_mut(image) {
            *o = Some(slot);
        }

        ops.write_uniform(image, ubo)?;
        ops.submit(slot, image)?;
        Ok(Some(image))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Wait(usize),
        Submit { slot: usize, image: usize },
        Present { image: usize, extent: u32 },
        Recreate,
    }

    /// In-order GPU: submissions complete front to back when waited on.
    struct SimDevice {
        images: usize,
        next_image: usize,
        extent: u32,
        signalled: [bool; FRAMES_IN_FLIGHT],
        pending: VecDeque<usize>,
        max_pending: usize,
        uniforms: Vec<Vec<u8>>,
        stale_acquires: usize,
        stale_present: bool,
        resize_requested: bool,
        extent_after_recreate: u32,
        minimised: bool,
        swapchain: bool,
        fail_submit: bool,
        log: Vec<Event>,
    }

    impl SimDevice {
        fn new(images: usize) -> Self {
            Self {
                images,
                next_image: 0,
                extent: 800,
                signalled: [true; FRAMES_IN_FLIGHT],
                pending: VecDeque::new(),
                max_pending: 0,
                uniforms: vec![Vec::new(); images],
                stale_acquires: 0,
                stale_present: false,
                resize_requested: false,
                extent_after_recreate: 1200,
                minimised: false,
                swapchain: true,
                fail_submit: false,
                log: Vec::new(),
            }
        }

        fn complete_through(&mut self, slot: usize) {
            while let Some(s) = self.pending.pop_front() {
                self.signalled[s] = true;
                if s == slot {
                    break;
                }
            }
        }

        fn presents(&self) -> Vec<(usize, u32)> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    Event::Present { image, extent } => Some((*image, *extent)),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameOps for SimDevice {
        fn image_count(&self) -> usize {
            self.images
        }

        fn wait_slot(&mut self, slot: usize) -> Result<(), GfxError> {
            self.log.push(Event::Wait(slot));
            if !self.signalled[slot] {
                self.complete_through(slot);
            }
            assert!(self.signalled[slot]);
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> Result<(), GfxError> {
            assert!(self.signalled[slot], "reset of a fence still in flight");
            self.signalled[slot] = false;
            Ok(())
        }

        fn acquire(&mut self, _slot: usize) -> Result<Acquired, GfxError> {
            if self.stale_acquires > 0 {
                self.stale_acquires -= 1;
                return Ok(Acquired::Stale);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(Acquired::Image(image))
        }

        fn write_uniform(&mut self, image: usize, bytes: &[u8]) -> Result<(), GfxError> {
            self.uniforms[image] = bytes.to_vec();
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: usize) -> Result<(), GfxError> {
            if std::mem::take(&mut self.fail_submit) {
                return Err(GfxError::OutOfMemory {
                    call: "queue_submit",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            assert!(!self.pending.contains(&slot));
            self.pending.push_back(slot);
            self.max_pending = self.max_pending.max(self.pending.len());
            self.log.push(Event::Submit { slot, image });
            Ok(())
        }

        fn present(&mut self, _slot: usize, image: usize) -> Result<Presented, GfxError> {
            self.log.push(Event::Present {
                image,
                extent: self.extent,
            });
            if std::mem::take(&mut self.stale_present) {
                return Ok(Presented::Stale);
            }
            Ok(Presented::Ok)
        }

        fn take_resize_request(&mut self) -> bool {
            std::mem::take(&mut self.resize_requested)
        }

        fn framebuffer_is_zero(&self) -> bool {
            self.minimised
        }

        fn has_swapchain(&self) -> bool {
            self.swapchain
        }

        fn wait_idle(&mut self) -> Result<(), GfxError> {
            while let Some(s) = self.pending.pop_front() {
                self.signalled[s] = true;
            }
            Ok(())
        }

        fn recreate(&mut self) -> Result<(), GfxError> {
            assert!(self.pending.is_empty(), "recreate with work in flight");
            self.log.push(Event::Recreate);
            self.extent = self.extent_after_recreate;
            self.swapchain = self.extent != 0;
            self.next_image = 0;
            // fresh sync objects start signalled
            self.signalled = [true; FRAMES_IN_FLIGHT];
            Ok(())
        }
    }

    #[test]
    fn never_more_than_two_frames_in_flight() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        for _ in 0..10 {
            assert_eq!(sched.draw_frame(&mut dev, &[0u8; 128]).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(dev.max_pending, FRAMES_IN_FLIGHT);
        assert_eq!(dev.presents().len(), 10);
    }

    #[test]
    fn third_submission_waits_for_the_oldest() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        sched.draw_frame(&mut dev, &[1]).unwrap();
        sched.draw_frame(&mut dev, &[2]).unwrap();
        assert_eq!(dev.pending, VecDeque::from(vec![0, 1]));

        sched.draw_frame(&mut dev, &[3]).unwrap();
        // slot 0 had to drain before it could be reused
        let third_submit = dev
            .log
            .iter()
            .rposition(|e| matches!(e, Event::Submit { .. }))
            .unwrap();
        assert!(dev.log[..third_submit].contains(&Event::Wait(0)));
        assert_eq!(dev.pending, VecDeque::from(vec![1, 0]));
    }

    #[test]
    fn slots_alternate_and_track_state() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        assert_eq!(sched.current_slot(), 0);
        sched.draw_frame(&mut dev, &[]).unwrap();
        assert_eq!(sched.slot_state(0), SlotState::Presented);
        assert_eq!(sched.slot_state(1), SlotState::Idle);
        assert_eq!(sched.current_slot(), 1);
        sched.draw_frame(&mut dev, &[]).unwrap();
        assert_eq!(sched.current_slot(), 0);
    }

    #[test]
    fn image_reuse_waits_on_previous_owner() {
        // a single image, handed out to both slots in turn
        let mut dev = SimDevice::new(1);
        let mut sched = FrameScheduler::new(1);
        sched.draw_frame(&mut dev, &[]).unwrap();
        sched.draw_frame(&mut dev, &[]).unwrap();

        // second frame (slot 1) acquired image 0 still owned by slot 0
        let waits: Vec<_> = dev
            .log
            .iter()
            .filter(|e| matches!(e, Event::Wait(_)))
            .cloned()
            .collect();
        assert_eq!(waits, vec![Event::Wait(0), Event::Wait(1), Event::Wait(0)]);
        assert_eq!(dev.max_pending, 1);
    }

    #[test]
    fn uniform_goes_to_the_acquired_image() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        sched.draw_frame(&mut dev, &[7; 4]).unwrap();
        sched.draw_frame(&mut dev, &[9; 4]).unwrap();
        assert_eq!(dev.uniforms[0], vec![7; 4]);
        assert_eq!(dev.uniforms[1], vec![9; 4]);
        assert!(dev.uniforms[2].is_empty());
    }

    #[test]
    fn out_of_date_acquire_rebuilds_then_presents_at_new_extent() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        sched.draw_frame(&mut dev, &[]).unwrap();
        sched.draw_frame(&mut dev, &[]).unwrap();

        dev.stale_acquires = 1;
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Recreated);
        assert_eq!(dev.log.last(), Some(&Event::Recreate));
        assert_eq!(sched.current_slot(), 0);

        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Presented);
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Presented);
        let presents = dev.presents();
        assert_eq!(&presents[..2], &[(0, 800), (1, 800)]);
        assert_eq!(&presents[2..], &[(0, 1200), (1, 1200)]);
    }

    #[test]
    fn stale_present_and_resize_both_rebuild() {
        let mut dev = SimDevice::new(2);
        let mut sched = FrameScheduler::new(2);

        dev.stale_present = true;
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Recreated);

        dev.resize_requested = true;
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Recreated);

        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Presented);
        let recreates = dev.log.iter().filter(|e| **e == Event::Recreate).count();
        assert_eq!(recreates, 2);
    }

    #[test]
    fn rebuild_resizes_image_tracking() {
        let mut dev = SimDevice::new(2);
        let mut sched = FrameScheduler::new(2);
        sched.draw_frame(&mut dev, &[]).unwrap();

        dev.images = 4;
        dev.uniforms = vec![Vec::new(); 4];
        dev.stale_acquires = 1;
        sched.draw_frame(&mut dev, &[]).unwrap();
        for _ in 0..4 {
            sched.draw_frame(&mut dev, &[]).unwrap();
        }
        let images: Vec<_> = dev.presents().iter().skip(1).map(|p| p.0).collect();
        assert_eq!(images, vec![0, 1, 2, 3]);
    }

    #[test]
    fn failed_submit_does_not_strand_the_slot_fence() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        sched.draw_frame(&mut dev, &[]).unwrap();
        sched.draw_frame(&mut dev, &[]).unwrap();

        dev.fail_submit = true;
        let err = sched.draw_frame(&mut dev, &[]).unwrap_err();
        assert!(err.is_retryable());
        // slot 0 was reset and never resubmitted
        assert!(!dev.signalled[0]);

        // retrying must not wait on that fence; sync is rebuilt first
        let before = dev.log.len();
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Recreated);
        assert_eq!(&dev.log[before..], &[Event::Recreate]);
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Presented);
        assert_eq!(dev.presents().last(), Some(&(0, 1200)));
    }

    #[test]
    fn minimised_window_touches_nothing() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        dev.minimised = true;
        for _ in 0..3 {
            assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Suspended);
        }
        assert!(dev.log.is_empty());
        assert!(dev.pending.is_empty());

        dev.minimised = false;
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn deferred_swapchain_is_built_once_the_surface_has_a_size() {
        let mut dev = SimDevice::new(3);
        let mut sched = FrameScheduler::new(3);
        sched.draw_frame(&mut dev, &[]).unwrap();

        // resize lands while the surface extent is still zero
        dev.resize_requested = true;
        dev.extent_after_recreate = 0;
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Suspended);
        assert!(!dev.swapchain);

        // still zero: retried, still deferred, no frame work
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Suspended);
        assert_eq!(dev.log.last(), Some(&Event::Recreate));

        dev.extent_after_recreate = 900;
        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Recreated);
        assert_eq!(sched.current_slot(), 0);
        assert_eq!(sched.slot_state(1), SlotState::Idle);

        assert_eq!(sched.draw_frame(&mut dev, &[]).unwrap(), FrameStatus::Presented);
        assert_eq!(dev.presents().last(), Some(&(0, 900)));
        let recreates = dev.log.iter().filter(|e| **e == Event::Recreate).count();
        assert_eq!(recreates, 3);
    }
}
