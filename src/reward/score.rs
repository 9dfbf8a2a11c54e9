use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Per-episode accumulator of the four reward terms.
///
/// A fresh score is constructed for every episode so accumulator state is
/// never shared across episodes. The controller owns the score exclusively
/// until finalization, when a copy moves into the benchmark recorder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpisodeScore {
    pub total: f64,
    pub gforce_penalty: f64,
    pub speed_reward: f64,
    pub lane_deviation_penalty: f64,
    pub progress_reward: f64,
    pub got_stuck: bool,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

impl EpisodeScore {
    pub fn new(start_time: SystemTime) -> Self {
        Self {
            total: 0.0,
            gforce_penalty: 0.0,
            speed_reward: 0.0,
            lane_deviation_penalty: 0.0,
            progress_reward: 0.0,
            got_stuck: false,
            start_time,
            end_time: None,
        }
    }

    /// Set the end timestamp. Only the first call takes effect.
    pub fn finalize(&mut self, end_time: SystemTime) {
        if self.end_time.is_none() {
            self.end_time = Some(end_time);
        }
    }

    pub fn duration_s(&self) -> Option<f64> {
        self.end_time
            .and_then(|end| end.duration_since(self.start_time).ok())
            .map(|d| d.as_secs_f64())
    }
}
