// Frame engine - the per-frame acquire/record/submit/present cycle
//
// One frame in flight:
//
//   IDLE -> WAIT_FENCE -> ACQUIRE -> RECORD -> SUBMIT -> PRESENT -> IDLE
//
// The render fence is the only thing keeping the single command buffer from
// being re-recorded while the GPU still reads it, so the fence wait always
// comes first and the fence is reset as soon as it has signalled.

use crate::error::FrameError;
use glam::Vec4;
use std::time::Duration;

/// Frames per radian of the clear colour pulse
const PULSE_FRAMES: f32 = 120.0;

/// Clear colour for a given frame: blue channel pulses with `|sin(n / 120)|`.
///
/// A pure function of the frame number so a run is reproducible frame by
/// frame regardless of wall-clock timing.
pub fn clear_color(frame_number: u64) -> Vec4 {
    let flash = (frame_number as f32 / PULSE_FRAMES).sin().abs();
    Vec4::new(0.0, 0.0, flash, 1.0)
}

/// Where the frame cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    WaitFence,
    Acquire,
    Record,
    Submit,
    Present,
}

/// GPU side of one frame. Implemented over Vulkan by `backend::sync::FrameSync`.
pub trait FrameOps {
    /// Presentation resources the frame renders into
    type Target;

    /// Block until the previous submission has finished, bounded by `timeout`
    fn wait_for_fence(&mut self, timeout: Duration) -> Result<(), FrameError>;

    fn reset_fence(&mut self) -> Result<(), FrameError>;

    /// Index of the next presentable image, signalling the present semaphore
    fn acquire_next_image(
        &mut self,
        target: &Self::Target,
        timeout: Duration,
    ) -> Result<u32, FrameError>;

    /// Reset and re-record the command buffer for `image_index`
    fn record(
        &mut self,
        target: &Self::Target,
        image_index: u32,
        clear: Vec4,
    ) -> Result<(), FrameError>;

    /// Submit the recorded commands, signalling the render semaphore and fence
    fn submit(&mut self) -> Result<(), FrameError>;

    /// Queue `image_index` for display. `Ok(true)` means the image was
    /// presented but the swapchain no longer matches the surface exactly.
    fn present(&mut self, target: &Self::Target, image_index: u32) -> Result<bool, FrameError>;
}

/// Drives [`FrameOps`] through one full cycle per [`draw`](Self::draw) call
#[derive(Debug)]
pub struct FrameEngine {
    frame_number: u64,
    timeout: Duration,
    stage: FrameStage,
    suboptimal_reported: bool,
}

impl FrameEngine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            frame_number: 0,
            timeout,
            stage: FrameStage::Idle,
            suboptimal_reported: false,
        }
    }

    /// Number of frames presented so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Stage of the last cycle; stays on the failing stage after an error
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn draw<F: FrameOps>(&mut self, ops: &mut F, target: &F::Target) -> Result<(), FrameError> {
        self.stage = FrameStage::WaitFence;
        ops.wait_for_fence(self.timeout)?;
        ops.reset_fence()?;

        self.stage = FrameStage::Acquire;
        let image_index = ops.acquire_next_image(target, self.timeout)?;

        self.stage = FrameStage::Record;
        ops.record(target, image_index, clear_color(self.frame_number))?;

        self.stage = FrameStage::Submit;
        ops.submit()?;

        self.stage = FrameStage::Present;
        let suboptimal = ops.present(target, image_index)?;
        if suboptimal && !self.suboptimal_reported {
            log::warn!("Swapchain is suboptimal for the surface; continuing without recreation");
            self.suboptimal_reported = true;
        }

        self.frame_number += 1;
        self.stage = FrameStage::Idle;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Simulated GPU: a submission completes when the CPU waits on the fence,
    /// unless the GPU has hung. Waiting on an unsignalled fence with nothing
    /// submitted is a hang too.
    pub(crate) struct MockGpu {
        pub image_count: u32,
        pub next_image: u32,
        pub fence_signaled: bool,
        pub pending_submission: bool,
        pub hang_after_submits: Option<usize>,
        pub submits: usize,
        pub records: Vec<(u32, Vec4)>,
        pub present_result: Option<Result<bool, fn() -> FrameError>>,
        pub acquire_error: Option<fn() -> FrameError>,
        pub calls: Vec<FrameStage>,
    }

    impl MockGpu {
        pub(crate) fn new(image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                fence_signaled: true,
                pending_submission: false,
                hang_after_submits: None,
                submits: 0,
                records: Vec::new(),
                present_result: None,
                acquire_error: None,
                calls: Vec::new(),
            }
        }
    }

    impl FrameOps for MockGpu {
        type Target = ();

        fn wait_for_fence(&mut self, timeout: Duration) -> Result<(), FrameError> {
            self.calls.push(FrameStage::WaitFence);
            let hung = self
                .hang_after_submits
                .is_some_and(|limit| self.submits > limit);
            if self.pending_submission && !hung {
                self.pending_submission = false;
                self.fence_signaled = true;
            }
            if self.fence_signaled {
                Ok(())
            } else {
                Err(FrameError::GpuHangSuspected {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }

        fn reset_fence(&mut self) -> Result<(), FrameError> {
            assert!(self.fence_signaled, "reset of an unsignalled fence");
            self.fence_signaled = false;
            Ok(())
        }

        fn acquire_next_image(&mut self, _: &(), _: Duration) -> Result<u32, FrameError> {
            self.calls.push(FrameStage::Acquire);
            if let Some(make) = self.acquire_error {
                return Err(make());
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(index)
        }

        fn record(&mut self, _: &(), image_index: u32, clear: Vec4) -> Result<(), FrameError> {
            self.calls.push(FrameStage::Record);
            assert!(
                !self.pending_submission,
                "command buffer re-recorded while the GPU may still read it"
            );
            self.records.push((image_index, clear));
            Ok(())
        }

        fn submit(&mut self) -> Result<(), FrameError> {
            self.calls.push(FrameStage::Submit);
            assert!(!self.fence_signaled, "submitted with a signalled fence");
            self.pending_submission = true;
            self.submits += 1;
            Ok(())
        }

        fn present(&mut self, _: &(), _: u32) -> Result<bool, FrameError> {
            self.calls.push(FrameStage::Present);
            match &self.present_result {
                None => Ok(false),
                Some(Ok(suboptimal)) => Ok(*suboptimal),
                Some(Err(make)) => Err(make()),
            }
        }
    }

    fn out_of_date() -> FrameError {
        FrameError::SwapchainOutOfDate
    }

    #[test]
    fn clear_color_follows_sine_of_frame_number() {
        assert_eq!(clear_color(0), Vec4::new(0.0, 0.0, 0.0, 1.0));
        let at_quarter_turn = clear_color(188); // 188 / 120 is close to pi / 2
        assert!(at_quarter_turn.z > 0.99);
        let wrapped = clear_color(377); // past pi, sine is negative
        assert!(wrapped.z > 0.0);
        assert_eq!(wrapped.x, 0.0);
        assert_eq!(wrapped.y, 0.0);
        assert_eq!(wrapped.w, 1.0);
    }

    #[test]
    fn clear_color_is_deterministic() {
        for n in [0u64, 1, 119, 120, 10_000] {
            assert_eq!(clear_color(n), clear_color(n));
        }
    }

    #[test]
    fn n_draws_advance_counter_by_n() {
        let mut gpu = MockGpu::new(3);
        let mut engine = FrameEngine::new(Duration::from_secs(1));

        for _ in 0..10 {
            engine.draw(&mut gpu, &()).unwrap();
        }

        assert_eq!(engine.frame_number(), 10);
        assert_eq!(engine.stage(), FrameStage::Idle);
        assert_eq!(gpu.submits, 10);
        let indices: Vec<u32> = gpu.records.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        for (n, (_, clear)) in gpu.records.iter().enumerate() {
            assert_eq!(*clear, clear_color(n as u64));
        }
    }

    #[test]
    fn each_cycle_runs_stages_in_order() {
        let mut gpu = MockGpu::new(2);
        let mut engine = FrameEngine::new(Duration::from_secs(1));
        engine.draw(&mut gpu, &()).unwrap();
        engine.draw(&mut gpu, &()).unwrap();

        let cycle = [
            FrameStage::WaitFence,
            FrameStage::Acquire,
            FrameStage::Record,
            FrameStage::Submit,
            FrameStage::Present,
        ];
        assert_eq!(gpu.calls, [cycle, cycle].concat());
    }

    #[test]
    fn fence_timeout_is_gpu_hang_and_stops_counting() {
        let mut gpu = MockGpu::new(2);
        gpu.hang_after_submits = Some(2);
        let mut engine = FrameEngine::new(Duration::from_secs(1));

        engine.draw(&mut gpu, &()).unwrap();
        engine.draw(&mut gpu, &()).unwrap();
        engine.draw(&mut gpu, &()).unwrap();
        let err = engine.draw(&mut gpu, &()).unwrap_err();

        assert!(matches!(
            err,
            FrameError::GpuHangSuspected { timeout_ms: 1000 }
        ));
        assert_eq!(engine.stage(), FrameStage::WaitFence);
        assert_eq!(engine.frame_number(), 3);
        assert_eq!(gpu.records.len(), 3);
    }

    fn acquire_timed_out() -> FrameError {
        FrameError::SwapchainAcquireTimeout { timeout_ms: 1000 }
    }

    #[test]
    fn acquire_timeout_aborts_before_record() {
        let mut gpu = MockGpu::new(2);
        let mut engine = FrameEngine::new(Duration::from_secs(1));
        engine.draw(&mut gpu, &()).unwrap();

        gpu.acquire_error = Some(acquire_timed_out as fn() -> FrameError);
        let err = engine.draw(&mut gpu, &()).unwrap_err();

        assert!(matches!(
            err,
            FrameError::SwapchainAcquireTimeout { timeout_ms: 1000 }
        ));
        assert_eq!(engine.stage(), FrameStage::Acquire);
        assert_eq!(engine.frame_number(), 1);
        assert_eq!(gpu.records.len(), 1);
        assert_eq!(gpu.submits, 1);
        assert_eq!(gpu.calls.last(), Some(&FrameStage::Acquire));
    }

    #[test]
    fn out_of_date_acquire_is_fatal() {
        let mut gpu = MockGpu::new(2);
        gpu.acquire_error = Some(out_of_date as fn() -> FrameError);
        let mut engine = FrameEngine::new(Duration::from_secs(1));

        let err = engine.draw(&mut gpu, &()).unwrap_err();

        assert!(matches!(err, FrameError::SwapchainOutOfDate));
        assert_eq!(engine.stage(), FrameStage::Acquire);
        assert_eq!(engine.frame_number(), 0);
        assert!(gpu.records.is_empty());
    }

    #[test]
    fn failed_present_does_not_count_the_frame() {
        let mut gpu = MockGpu::new(2);
        gpu.present_result = Some(Err(out_of_date as fn() -> FrameError));
        let mut engine = FrameEngine::new(Duration::from_secs(1));

        let err = engine.draw(&mut gpu, &()).unwrap_err();

        assert!(matches!(err, FrameError::SwapchainOutOfDate));
        assert_eq!(engine.stage(), FrameStage::Present);
        assert_eq!(engine.frame_number(), 0);
    }

    #[test]
    fn suboptimal_present_still_counts() {
        let mut gpu = MockGpu::new(2);
        gpu.present_result = Some(Ok(true));
        let mut engine = FrameEngine::new(Duration::from_secs(1));

        engine.draw(&mut gpu, &()).unwrap();
        engine.draw(&mut gpu, &()).unwrap();

        assert_eq!(engine.frame_number(), 2);
    }
}
