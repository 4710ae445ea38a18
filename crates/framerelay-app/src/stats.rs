use std::time::Instant;

/// Rolling frames-per-second over windows of at least half a second.
pub struct FpsCounter {
    count: u32,
    window_start: Instant,
    last_fps: f32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self { count: 0, window_start: Instant::now(), last_fps: 0.0 }
    }

    pub fn tick(&mut self) {
        self.count += 1;
    }

    /// FPS over the last window; starts a new window once it is long enough.
    pub fn fps(&mut self) -> f32 {
        let elapsed = self.window_start.elapsed().as_secs_f32();
        if elapsed >= 0.5 {
            self.last_fps = self.count as f32 / elapsed;
            self.count = 0;
            self.window_start = Instant::now();
        }
        self.last_fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
