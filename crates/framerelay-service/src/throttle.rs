/// Producer-side rate divisor: passes every Nth frame.
///
/// The relay itself never throttles; callers use this upstream of
/// [`FrameRelay::submit_frame`](crate::FrameRelay::submit_frame) to cap the
/// delivered rate independently of the capture rate (24 fps → 8 fps is a
/// divisor of 3).
#[derive(Debug, Clone)]
pub struct FrameSkipper {
    divisor: u32,
    counter: u32,
}

impl FrameSkipper {
    /// A divisor of 0 is treated as 1 (no skipping).
    pub fn new(divisor: u32) -> Self {
        Self { divisor: divisor.max(1), counter: 0 }
    }

    /// Divisor that brings `capture_fps` down to at most `target_fps`.
    pub fn for_rates(capture_fps: u32, target_fps: u32) -> Self {
        if target_fps == 0 || target_fps >= capture_fps {
            return Self::new(1);
        }
        Self::new(capture_fps.div_ceil(target_fps))
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Call once per captured frame; `true` for the frames to forward. The
    /// first frame always passes.
    pub fn should_send(&mut self) -> bool {
        let pass = self.counter == 0;
        self.counter = (self.counter + 1) % self.divisor;
        pass
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}
