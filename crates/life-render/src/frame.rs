// SPDX-License-Identifier: CEPL-1.0
//! Bounded in-flight frame loop.
//!
//! STRICT PER-FRAME ORDER:
//! 1) poll window events (camera input applied here)
//! 2) wait on the slot's in-flight fence (never more than K frames ahead)
//! 3) acquire an image, signalling the slot's image-available semaphore
//! 4) upload the camera into the uniform buffer of the ACQUIRED IMAGE
//! 5) reset the slot fence, submit the image's command buffer
//! 6) present, waiting on render-complete
//! 7) advance the slot counter mod K
//!
//! Out-of-date from acquire, stale from present, or a window resize all take
//! the same path: wait for a non-zero extent, rebuild, carry on.

use anyhow::{Context, Result};
use tracing::{debug, info, trace};

use crate::camera::Camera;
use crate::schema::CameraUniform;
use crate::RenderSize;

/// Size of the frame-slot ring (K).
pub const FRAMES_IN_FLIGHT: usize = 2;

pub enum AcquireOutcome {
    /// A suboptimal acquire still yields a usable image and counts as success.
    Acquired(u32),
    OutOfDate,
    Failed(anyhow::Error),
}

pub enum PresentOutcome {
    Presented,
    /// Out-of-date or suboptimal: the swapchain must be rebuilt.
    Stale,
    Failed(anyhow::Error),
}

/// GPU side of the loop. `slot` is always `< FRAMES_IN_FLIGHT`; `image` is
/// whatever the last successful [`FrameDevice::acquire`] returned.
pub trait FrameDevice {
    fn image_count(&self) -> usize;
    /// Blocks until the work last submitted from `slot` has finished.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire(&mut self, slot: usize) -> AcquireOutcome;
    fn upload_camera(&mut self, image: u32, camera: &CameraUniform) -> Result<()>;
    /// Resets the slot fence and submits the command buffer recorded for `image`.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;
    fn present(&mut self, slot: usize, image: u32) -> PresentOutcome;
    /// Tears down every swapchain-dependent resource and builds it again at `size`.
    fn rebuild(&mut self, size: RenderSize) -> Result<()>;
    /// Drains all queued GPU work.
    fn wait_idle(&mut self);
}

/// Window-system side of the loop.
pub trait EventSource {
    /// Pumps pending events without blocking, applying queued input to `camera`.
    fn poll(&mut self, camera: &mut Camera);
    fn close_requested(&self) -> bool;
    /// True once after the window reported a new size.
    fn take_resized(&mut self) -> bool;
    /// Blocks on window events until the extent is non-zero.
    /// `None` when the window was closed while waiting.
    fn wait_for_extent(&mut self, camera: &mut Camera) -> Option<RenderSize>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub rebuilds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct FrameLoop<D> {
    device: D,
    camera: Camera,
    frame: usize,
    stats: FrameStats,
}

impl<D: FrameDevice> FrameLoop<D> {
    pub fn new(device: D, camera: Camera) -> Self {
        Self {
            device,
            camera,
            frame: 0,
            stats: FrameStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Runs until the window closes or a frame fails, then drains the device.
    ///
    /// The device is idle on return either way, so the caller may tear down.
    pub fn run<E: EventSource>(&mut self, events: &mut E) -> Result<()> {
        let result = loop {
            match self.step(events) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.device.wait_idle();
        info!(
            "frame loop stopped after {} frames, {} swapchain rebuilds",
            self.stats.frames, self.stats.rebuilds
        );
        result
    }

    /// One loop iteration.
    pub fn step<E: EventSource>(&mut self, events: &mut E) -> Result<Flow> {
        events.poll(&mut self.camera);
        if events.close_requested() {
            return Ok(Flow::Exit);
        }

        let slot = self.frame % FRAMES_IN_FLIGHT;
        let image = loop {
            self.device
                .wait_for_slot(slot)
                .context("wait for in-flight fence")?;
            match self.device.acquire(slot) {
                AcquireOutcome::Acquired(image) => break image,
                AcquireOutcome::OutOfDate => {
                    debug!("acquire: swapchain out of date");
                    if !self.recover(events)? {
                        return Ok(Flow::Exit);
                    }
                }
                AcquireOutcome::Failed(e) => return Err(e.context("acquire next image")),
            }
        };
        trace!(slot, image, "frame {}", self.stats.frames);

        let uniform = self.camera.uniform();
        self.device.upload_camera(image, &uniform)?;
        self.device.submit(slot, image).context("queue submit")?;

        let stale = match self.device.present(slot, image) {
            PresentOutcome::Presented => false,
            PresentOutcome::Stale => {
                debug!("present: swapchain stale");
                true
            }
            PresentOutcome::Failed(e) => return Err(e.context("queue present")),
        };
        // Drain the flag even when already stale so one resize costs one rebuild.
        let resized = events.take_resized();
        if (stale || resized) && !self.recover(events)? {
            return Ok(Flow::Exit);
        }

        self.frame = (self.frame + 1) % FRAMES_IN_FLIGHT;
        self.stats.frames += 1;
        Ok(Flow::Continue)
    }

    fn recover<E: EventSource>(&mut self, events: &mut E) -> Result<bool> {
        let Some(size) = events.wait_for_extent(&mut self.camera) else {
            return Ok(false);
        };
        self.device
            .rebuild(size)
            .context("rebuild swapchain")?;
        self.stats.rebuilds += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraInput, CameraSettings, PanDirection};
    use anyhow::anyhow;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Script {
        Ok,
        OutOfDate,
        Fail,
    }

    /// Records every call and models GPU completion as "done once the slot's fence is waited".
    struct MockDevice {
        images: u32,
        next_image: u32,
        acquire_script: VecDeque<Script>,
        present_script: VecDeque<Script>,
        outstanding: Vec<usize>,
        max_outstanding: usize,
        fence_waits: [u32; FRAMES_IN_FLIGHT],
        uploads: Vec<u32>,
        submits: Vec<(usize, u32)>,
        rebuild_sizes: Vec<RenderSize>,
        idle_waits: u32,
    }

    impl MockDevice {
        fn new(images: u32) -> Self {
            Self {
                images,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                outstanding: Vec::new(),
                max_outstanding: 0,
                fence_waits: [0; FRAMES_IN_FLIGHT],
                uploads: Vec::new(),
                submits: Vec::new(),
                rebuild_sizes: Vec::new(),
                idle_waits: 0,
            }
        }
    }

    impl FrameDevice for MockDevice {
        fn image_count(&self) -> usize {
            self.images as usize
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.fence_waits[slot] += 1;
            self.outstanding.retain(|&s| s != slot);
            Ok(())
        }

        fn acquire(&mut self, _slot: usize) -> AcquireOutcome {
            match self.acquire_script.pop_front().unwrap_or(Script::Ok) {
                Script::Ok => {
                    let img = self.next_image;
                    self.next_image = (self.next_image + 1) % self.images;
                    AcquireOutcome::Acquired(img)
                }
                Script::OutOfDate => AcquireOutcome::OutOfDate,
                Script::Fail => AcquireOutcome::Failed(anyhow!("device lost")),
            }
        }

        fn upload_camera(&mut self, image: u32, _camera: &CameraUniform) -> Result<()> {
            assert!(image < self.images);
            self.uploads.push(image);
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
            assert!(
                !self.outstanding.contains(&slot),
                "slot {slot} reused before its fence was waited"
            );
            self.outstanding.push(slot);
            self.max_outstanding = self.max_outstanding.max(self.outstanding.len());
            self.submits.push((slot, image));
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image: u32) -> PresentOutcome {
            match self.present_script.pop_front().unwrap_or(Script::Ok) {
                Script::Ok => PresentOutcome::Presented,
                Script::OutOfDate => PresentOutcome::Stale,
                Script::Fail => PresentOutcome::Failed(anyhow!("surface lost")),
            }
        }

        fn rebuild(&mut self, size: RenderSize) -> Result<()> {
            assert!(!size.is_zero(), "rebuild must never see a zero extent");
            self.next_image = 0;
            self.rebuild_sizes.push(size);
            Ok(())
        }

        fn wait_idle(&mut self) {
            self.idle_waits += 1;
            self.outstanding.clear();
        }
    }

    #[derive(Default)]
    struct MockEvents {
        close_after_polls: Option<u32>,
        polls: u32,
        input: VecDeque<CameraInput>,
        resized: bool,
        /// Extents reported while waiting; the first non-zero one ends the wait.
        extents: VecDeque<RenderSize>,
        extent_reads: u32,
        close_during_wait: bool,
    }

    impl EventSource for MockEvents {
        fn poll(&mut self, camera: &mut Camera) {
            self.polls += 1;
            while let Some(i) = self.input.pop_front() {
                camera.apply(i);
            }
        }

        fn close_requested(&self) -> bool {
            matches!(self.close_after_polls, Some(n) if self.polls > n)
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn wait_for_extent(&mut self, _camera: &mut Camera) -> Option<RenderSize> {
            loop {
                self.extent_reads += 1;
                match self.extents.pop_front() {
                    Some(size) if size.is_zero() => continue,
                    Some(size) => return Some(size),
                    None if self.close_during_wait => return None,
                    None => return Some(RenderSize::new(800, 600)),
                }
            }
        }
    }

    fn frame_loop(images: u32) -> FrameLoop<MockDevice> {
        FrameLoop::new(
            MockDevice::new(images),
            Camera::new(4, CameraSettings::default()),
        )
    }

    #[test]
    fn steady_state_ten_frames() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents::default();
        for _ in 0..10 {
            assert_eq!(fl.step(&mut ev).unwrap(), Flow::Continue);
        }
        let d = fl.device();
        assert_eq!(d.uploads.len(), 10);
        let per_image: Vec<usize> = (0..3)
            .map(|i| d.uploads.iter().filter(|&&u| u == i).count())
            .collect();
        assert_eq!(per_image, vec![4, 3, 3]);
        assert_eq!(d.fence_waits, [5, 5]);
        assert!(d.rebuild_sizes.is_empty());
        assert_eq!(fl.stats().frames, 10);
    }

    #[test]
    fn never_more_than_k_frames_in_flight() {
        let mut fl = frame_loop(4);
        let mut ev = MockEvents::default();
        for _ in 0..25 {
            fl.step(&mut ev).unwrap();
        }
        assert!(fl.device().max_outstanding <= FRAMES_IN_FLIGHT);
        assert_eq!(fl.device().max_outstanding, FRAMES_IN_FLIGHT);
    }

    #[test]
    fn slot_index_differs_from_image_index() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents::default();
        for _ in 0..3 {
            fl.step(&mut ev).unwrap();
        }
        assert_eq!(fl.device().submits, vec![(0, 0), (1, 1), (0, 2)]);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_once_and_retries() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents::default();
        fl.device.acquire_script = VecDeque::from(vec![Script::Ok, Script::Ok, Script::OutOfDate]);

        for _ in 0..2 {
            fl.step(&mut ev).unwrap();
        }
        assert_eq!(fl.step(&mut ev).unwrap(), Flow::Continue);

        let d = fl.device();
        assert_eq!(d.rebuild_sizes, vec![RenderSize::new(800, 600)]);
        // The third iteration still submitted, on slot 0 with the first image of the new chain.
        assert_eq!(d.submits.len(), 3);
        assert_eq!(d.submits[2], (0, 0));
        assert_eq!(fl.stats().rebuilds, 1);
    }

    #[test]
    fn stale_present_rebuilds_after_presenting() {
        let mut fl = frame_loop(2);
        let mut ev = MockEvents::default();
        fl.device.present_script = VecDeque::from(vec![Script::OutOfDate]);
        fl.step(&mut ev).unwrap();
        fl.step(&mut ev).unwrap();
        assert_eq!(fl.device().rebuild_sizes.len(), 1);
        assert_eq!(fl.device().submits.len(), 2);
    }

    #[test]
    fn resize_event_counts_once_even_when_present_is_stale() {
        let mut fl = frame_loop(2);
        let mut ev = MockEvents {
            resized: true,
            ..Default::default()
        };
        fl.device.present_script = VecDeque::from(vec![Script::OutOfDate]);
        fl.step(&mut ev).unwrap();
        assert_eq!(fl.device().rebuild_sizes.len(), 1);
    }

    #[test]
    fn minimized_window_blocks_rebuild_until_extent_is_non_zero() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents {
            extents: VecDeque::from(vec![
                RenderSize::new(0, 0),
                RenderSize::new(0, 0),
                RenderSize::new(1024, 0),
                RenderSize::new(640, 480),
            ]),
            ..Default::default()
        };
        fl.device.acquire_script = VecDeque::from(vec![Script::OutOfDate]);
        fl.step(&mut ev).unwrap();
        assert_eq!(ev.extent_reads, 4);
        assert_eq!(fl.device().rebuild_sizes, vec![RenderSize::new(640, 480)]);
    }

    #[test]
    fn close_while_minimized_exits_without_rebuild() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents {
            extents: VecDeque::from(vec![RenderSize::new(0, 0)]),
            close_during_wait: true,
            ..Default::default()
        };
        fl.device.acquire_script = VecDeque::from(vec![Script::OutOfDate]);
        assert_eq!(fl.step(&mut ev).unwrap(), Flow::Exit);
        assert!(fl.device().rebuild_sizes.is_empty());
    }

    #[test]
    fn acquire_failure_stops_loop_and_drains_device() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents::default();
        fl.device.acquire_script = VecDeque::from(vec![Script::Ok, Script::Fail]);
        let err = fl.run(&mut ev).unwrap_err();
        assert!(format!("{err:#}").contains("device lost"));
        assert_eq!(fl.device().idle_waits, 1);
        assert_eq!(fl.stats().frames, 1);
    }

    #[test]
    fn present_failure_is_fatal() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents::default();
        fl.device.present_script = VecDeque::from(vec![Script::Fail]);
        assert!(fl.step(&mut ev).is_err());
    }

    #[test]
    fn close_signal_ends_run_cleanly() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents {
            close_after_polls: Some(5),
            ..Default::default()
        };
        fl.run(&mut ev).unwrap();
        assert_eq!(fl.stats().frames, 5);
        assert_eq!(fl.device().idle_waits, 1);
    }

    #[test]
    fn input_is_applied_before_upload() {
        let mut fl = frame_loop(3);
        let mut ev = MockEvents::default();
        ev.input.push_back(CameraInput::Pan(PanDirection::Left));
        fl.step(&mut ev).unwrap();
        assert_eq!(fl.camera().center().x, 0.0);
    }
}
