// SPDX-License-Identifier: CEPL-1.0
//! Per-frame bookkeeping: the submission state machine and the objects that pace it.
use ash::vk;
use tracing::warn;

use crate::error::{Result, VkResultExt};

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Ready,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Invalidated,
}

/// What `vkAcquireNextImageKHR` told us. Suboptimal still hands out an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What one call to [`FrameCycle::drive`] ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Acquire reported out-of-date; nothing was submitted.
    Skipped,
    /// Drawable is zero-sized; no iteration ran.
    Parked,
}

/// The device-side half of the frame loop, stepped by [`FrameCycle::drive`].
pub trait FrameBackend {
    type Error;

    /// Rebuilds everything tied to the swapchain.
    fn rebuild(&mut self) -> std::result::Result<(), Self::Error>;

    /// One acquire/record/submit/present pass, reporting each step to `cycle`.
    fn iterate(&mut self, cycle: &mut FrameCycle) -> std::result::Result<FrameStatus, Self::Error>;
}

/// Host-side view of the frame loop. Holds no Vulkan handles.
#[derive(Debug)]
pub struct FrameCycle {
    state: FrameState,
    slot: usize,
    resize_pending: bool,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            state: FrameState::Ready,
            slot: 0,
            resize_pending: false,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// In-flight slot the current iteration uses.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn needs_recreate(&self) -> bool {
        self.state == FrameState::Invalidated
    }

    /// Latched until the next present.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub fn begin(&mut self) {
        debug_assert_eq!(self.state, FrameState::Ready);
        self.state = FrameState::Acquiring;
    }

    /// Returns false when this iteration must skip recording and submission.
    pub fn acquired(&mut self, outcome: AcquireOutcome) -> bool {
        debug_assert_eq!(self.state, FrameState::Acquiring);
        match outcome {
            AcquireOutcome::Acquired => {
                self.state = FrameState::Recording;
                true
            }
            AcquireOutcome::OutOfDate => {
                warn!("swapchain out of date on acquire");
                self.state = FrameState::Invalidated;
                false
            }
        }
    }

    pub fn submitted(&mut self) {
        debug_assert_eq!(self.state, FrameState::Recording);
        self.state = FrameState::Submitted;
    }

    pub fn presenting(&mut self) {
        debug_assert_eq!(self.state, FrameState::Submitted);
        self.state = FrameState::Presenting;
    }

    pub fn presented(&mut self, outcome: PresentOutcome) {
        debug_assert_eq!(self.state, FrameState::Presenting);
        let latched = std::mem::take(&mut self.resize_pending);
        self.state = match outcome {
            PresentOutcome::Presented if !latched => FrameState::Ready,
            PresentOutcome::Presented => FrameState::Invalidated,
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                warn!("swapchain {outcome:?} on present");
                FrameState::Invalidated
            }
        };
    }

    /// Closes the iteration. The slot moves on whichever path was taken.
    pub fn finish(&mut self) {
        self.slot = (self.slot + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    pub fn recreated(&mut self) {
        debug_assert_eq!(self.state, FrameState::Invalidated);
        self.state = FrameState::Ready;
    }

    /// One loop iteration: park on an empty drawable, rebuild if invalidated,
    /// iterate, then advance the slot. A failed rebuild leaves the cycle invalidated.
    pub fn drive<B: FrameBackend>(
        &mut self,
        drawable_empty: bool,
        backend: &mut B,
    ) -> std::result::Result<FrameStatus, B::Error> {
        if drawable_empty {
            return Ok(FrameStatus::Parked);
        }
        if self.needs_recreate() {
            backend.rebuild()?;
            self.recreated();
        }
        let status = backend.iterate(self);
        self.finish();
        status
    }
}

/// Semaphores and fences for each in-flight slot.
pub struct FrameSync {
    pub image_available: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    pub render_finished: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    pub in_flight: [vk::Fence; MAX_FRAMES_IN_FLIGHT],
}

impl FrameSync {
    pub fn null() -> Self {
        Self {
            image_available: [vk::Semaphore::null(); MAX_FRAMES_IN_FLIGHT],
            render_finished: [vk::Semaphore::null(); MAX_FRAMES_IN_FLIGHT],
            in_flight: [vk::Fence::null(); MAX_FRAMES_IN_FLIGHT],
        }
    }

    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        // Signalled so the first wait on each slot returns immediately.
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let mut sync = Self::null();
        let made = (|| -> ash::prelude::VkResult<()> {
            for i in 0..MAX_FRAMES_IN_FLIGHT {
                unsafe {
                    sync.image_available[i] = device.create_semaphore(&sem_info, None)?;
                    sync.render_finished[i] = device.create_semaphore(&sem_info, None)?;
                    sync.in_flight[i] = device.create_fence(&fence_info, None)?;
                }
            }
            Ok(())
        })();
        if let Err(e) = made.call("create_sync_objects") {
            unsafe { sync.destroy(device) };
            return Err(e);
        }
        Ok(sync)
    }

    /// Null handles are skipped by the driver, so a half-built set is fine here.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            unsafe {
                device.destroy_semaphore(self.image_available[i], None);
                device.destroy_semaphore(self.render_finished[i], None);
                device.destroy_fence(self.in_flight[i], None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Path {
        Clean,
        AcquireOutOfDate,
        PresentSuboptimal,
        PresentOutOfDate,
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Rebuild,
        Iterate(usize),
    }

    /// Replays a fixed list of outcomes and records what the cycle asked for.
    #[derive(Default)]
    struct Scripted {
        paths: Vec<Path>,
        calls: Vec<Call>,
        fail_rebuild: bool,
    }

    impl Scripted {
        fn new(paths: &[Path]) -> Self {
            Self {
                paths: paths.iter().rev().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl FrameBackend for Scripted {
        type Error = &'static str;

        fn rebuild(&mut self) -> std::result::Result<(), Self::Error> {
            self.calls.push(Call::Rebuild);
            if self.fail_rebuild {
                Err("rebuild failed")
            } else {
                Ok(())
            }
        }

        fn iterate(&mut self, cycle: &mut FrameCycle) -> std::result::Result<FrameStatus, Self::Error> {
            self.calls.push(Call::Iterate(cycle.slot()));
            let path = self.paths.pop().unwrap_or(Path::Clean);
            cycle.begin();
            let acquire = match path {
                Path::AcquireOutOfDate => AcquireOutcome::OutOfDate,
                _ => AcquireOutcome::Acquired,
            };
            if !cycle.acquired(acquire) {
                return Ok(FrameStatus::Skipped);
            }
            cycle.submitted();
            cycle.presenting();
            cycle.presented(match path {
                Path::PresentSuboptimal => PresentOutcome::Suboptimal,
                Path::PresentOutOfDate => PresentOutcome::OutOfDate,
                _ => PresentOutcome::Presented,
            });
            Ok(FrameStatus::Presented)
        }
    }

    #[test]
    fn slot_rotates_on_every_path() {
        let paths = [
            Path::Clean,
            Path::AcquireOutOfDate,
            Path::Clean,
            Path::PresentSuboptimal,
            Path::PresentOutOfDate,
            Path::Clean,
            Path::AcquireOutOfDate,
        ];
        let script: Vec<Path> = paths.iter().cycle().take(23).copied().collect();
        let mut backend = Scripted::new(&script);
        let mut cycle = FrameCycle::new();
        for n in 0..23 {
            assert_eq!(cycle.slot(), n % MAX_FRAMES_IN_FLIGHT);
            cycle.drive(false, &mut backend).unwrap();
        }
        assert_eq!(cycle.slot(), 23 % MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn acquire_out_of_date_skips_then_rebuilds() {
        let mut backend = Scripted::new(&[Path::AcquireOutOfDate, Path::Clean]);
        let mut cycle = FrameCycle::new();

        assert_eq!(cycle.drive(false, &mut backend), Ok(FrameStatus::Skipped));
        assert!(cycle.needs_recreate());
        assert_eq!(cycle.slot(), 1);

        assert_eq!(cycle.drive(false, &mut backend), Ok(FrameStatus::Presented));
        assert_eq!(
            backend.calls,
            [Call::Iterate(0), Call::Rebuild, Call::Iterate(1)]
        );
        assert_eq!(cycle.state(), FrameState::Ready);
    }

    #[test]
    fn empty_drawable_parks_without_touching_the_backend() {
        let mut backend = Scripted::new(&[Path::PresentOutOfDate]);
        let mut cycle = FrameCycle::new();
        cycle.drive(false, &mut backend).unwrap();
        let slot = cycle.slot();

        for _ in 0..3 {
            assert_eq!(cycle.drive(true, &mut backend), Ok(FrameStatus::Parked));
        }
        assert_eq!(cycle.slot(), slot);
        assert!(cycle.needs_recreate());
        assert_eq!(backend.calls, [Call::Iterate(0)]);
    }

    #[test]
    fn failed_rebuild_stays_invalidated() {
        let mut backend = Scripted::new(&[Path::PresentSuboptimal]);
        let mut cycle = FrameCycle::new();
        cycle.drive(false, &mut backend).unwrap();

        backend.fail_rebuild = true;
        assert_eq!(cycle.drive(false, &mut backend), Err("rebuild failed"));
        assert!(cycle.needs_recreate());
        assert_eq!(cycle.slot(), 1);
        assert_eq!(backend.calls, [Call::Iterate(0), Call::Rebuild]);
    }

    #[test]
    fn resize_latch_invalidates_exactly_once() {
        let mut backend = Scripted::default();
        let mut cycle = FrameCycle::new();
        cycle.notify_resized();
        cycle.notify_resized();
        assert!(cycle.resize_pending());

        cycle.drive(false, &mut backend).unwrap();
        assert_eq!(cycle.state(), FrameState::Invalidated);
        assert!(!cycle.resize_pending());

        cycle.drive(false, &mut backend).unwrap();
        assert_eq!(cycle.state(), FrameState::Ready);
        assert_eq!(
            backend.calls,
            [Call::Iterate(0), Call::Rebuild, Call::Iterate(1)]
        );
    }

    #[test]
    fn present_problems_invalidate() {
        for path in [Path::PresentSuboptimal, Path::PresentOutOfDate] {
            let mut backend = Scripted::new(&[path]);
            let mut cycle = FrameCycle::new();
            assert_eq!(cycle.drive(false, &mut backend), Ok(FrameStatus::Presented));
            assert!(cycle.needs_recreate());
        }
    }

    #[test]
    fn clean_iteration_walks_every_state() {
        let mut cycle = FrameCycle::new();
        assert_eq!(cycle.state(), FrameState::Ready);
        cycle.begin();
        assert_eq!(cycle.state(), FrameState::Acquiring);
        assert!(cycle.acquired(AcquireOutcome::Acquired));
        assert_eq!(cycle.state(), FrameState::Recording);
        cycle.submitted();
        assert_eq!(cycle.state(), FrameState::Submitted);
        cycle.presenting();
        assert_eq!(cycle.state(), FrameState::Presenting);
        cycle.presented(PresentOutcome::Presented);
        assert_eq!(cycle.state(), FrameState::Ready);
    }

    #[test]
    fn null_sync_holds_only_null_handles() {
        let sync = FrameSync::null();
        assert!(sync.image_available.iter().all(|s| *s == vk::Semaphore::null()));
        assert!(sync.render_finished.iter().all(|s| *s == vk::Semaphore::null()));
        assert!(sync.in_flight.iter().all(|f| *f == vk::Fence::null()));
    }
}
