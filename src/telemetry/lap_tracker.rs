use log::info;

/// A completed lap detected from the simulator's lap counter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LapCrossing {
    pub lap_number: u32,
    /// Score accumulated since the previous lap boundary
    pub lap_score: f64,
}

/// Detects lap-boundary crossings from the lap number reported in telemetry.
///
/// A crossing is reported only when a previously observed lap number exists
/// and the new one is strictly greater. Snapshots without a lap number are
/// ignored entirely.
pub struct LapTracker {
    current_lap_number: Option<u32>,
    score_at_lap_start: f64,
}

impl LapTracker {
    pub fn new() -> Self {
        Self {
            current_lap_number: None,
            score_at_lap_start: 0.0,
        }
    }

    /// Feed one snapshot's lap counter along with the episode score total.
    pub fn observe(&mut self, lap_number: Option<u32>, score_total: f64) -> Option<LapCrossing> {
        let lap_number = lap_number?;
        let mut crossing = None;
        if let Some(current) = self.current_lap_number {
            if current < lap_number {
                let lap_score = score_total - self.score_at_lap_start;
                info!("lap {} complete with score of {}", lap_number, lap_score);
                self.score_at_lap_start = score_total;
                crossing = Some(LapCrossing {
                    lap_number,
                    lap_score,
                });
            }
        }
        self.current_lap_number = Some(lap_number);
        crossing
    }

    pub fn current_lap_number(&self) -> Option<u32> {
        self.current_lap_number
    }

    pub fn reset(&mut self) {
        self.current_lap_number = None;
        self.score_at_lap_start = 0.0;
    }
}

impl Default for LapTracker {
    fn default() -> Self {
        Self::new()
    }
}
