use std::time::{Duration, Instant};

/// Speed below which the agent counts as crawling, cm/s
pub(crate) const CRAWL_SPEED_CMPS: f64 = 100.0;
/// How long the agent may crawl before the stall check fires
const STALL_WINDOW: Duration = Duration::from_secs(1);
/// Share of crawling steps that must have the throttle down
const THROTTLE_ON_RATIO: f64 = 0.8;

/// Flags an episode as stalled when the agent keeps the throttle down yet
/// barely moves.
///
/// Tracking state resets whenever forward progress resumes and immediately
/// after a stall is reported, so the detector fires at most once per stall.
pub struct StuckDetector {
    steps_crawling: u32,
    steps_crawling_with_throttle_on: u32,
    last_forward_progress_time: Instant,
}

impl StuckDetector {
    pub fn new(now: Instant) -> Self {
        Self {
            steps_crawling: 0,
            steps_crawling_with_throttle_on: 0,
            last_forward_progress_time: now,
        }
    }

    /// Evaluate one step. Returns true when the agent is stuck.
    pub fn observe(&mut self, speed_cmps: f64, throttle: f64, now: Instant) -> bool {
        if speed_cmps >= CRAWL_SPEED_CMPS {
            self.reset_forward_progress(now);
            return false;
        }
        self.steps_crawling += 1;
        if throttle > 0.0 {
            self.steps_crawling_with_throttle_on += 1;
        }
        let throttle_on_ratio =
            self.steps_crawling_with_throttle_on as f64 / self.steps_crawling as f64;
        if now.duration_since(self.last_forward_progress_time) > STALL_WINDOW
            && throttle_on_ratio > THROTTLE_ON_RATIO
        {
            self.reset_forward_progress(now);
            return true;
        }
        false
    }

    pub fn reset_forward_progress(&mut self, now: Instant) {
        self.last_forward_progress_time = now;
        self.steps_crawling = 0;
        self.steps_crawling_with_throttle_on = 0;
    }
}
