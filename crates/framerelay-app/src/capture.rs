//! Synthetic capture source.
//!
//! Stands in for a platform screen/camera capturer: produces BGRA frames at
//! a fixed rate with a moving bar so successive JPEGs differ.

use std::time::Duration;

use framerelay_service::{PixelFormat, RawFrame};
use tokio::time::{interval, Interval, MissedTickBehavior};

pub struct SyntheticCapture {
    width: u32,
    height: u32,
    ticker: Interval,
    produced: u64,
    limit: Option<u64>,
}

impl SyntheticCapture {
    /// Must be called inside a tokio runtime.
    pub fn new(width: u32, height: u32, fps: u32, limit: Option<u64>) -> Self {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
        // A slow consumer of frames must not cause a burst afterwards.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { width: width.max(1), height: height.max(1), ticker, produced: 0, limit }
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Next frame at the capture rate; `None` once the frame limit is reached.
    pub async fn next_frame(&mut self) -> Option<RawFrame> {
        if self.limit.is_some_and(|l| self.produced >= l) {
            return None;
        }
        self.ticker.tick().await;
        let frame = self.render();
        self.produced += 1;
        Some(frame)
    }

    fn render(&self) -> RawFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_x = (self.produced as usize * 8) % w;
        let bar_w = (w / 16).max(1);

        let mut data = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                let px = if x >= bar_x && x < bar_x + bar_w {
                    [255, 255, 255, 255]
                } else {
                    // B, G, R, A
                    [(y * 255 / h) as u8, (x * 255 / w) as u8, 64, 255]
                };
                data.extend_from_slice(&px);
            }
        }
        RawFrame::packed(data, self.width, self.height, PixelFormat::Bgra)
    }
}
