use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use log::trace;

/// One row of the live display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayStat {
    pub value: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub units: &'static str,
}

impl DisplayStat {
    fn new(ymin: f64, ymax: f64, units: &'static str) -> Self {
        Self {
            value: 0.0,
            ymin,
            ymax,
            units,
        }
    }
}

/// Per-step stats published to the live dashboard, one row per reward term
/// plus the step reward and the running score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayStats {
    pub gforces: DisplayStat,
    pub gforce_penalty: DisplayStat,
    pub lane_deviation_penalty: DisplayStat,
    pub speed_reward: DisplayStat,
    pub progress_reward: DisplayStat,
    pub reward: DisplayStat,
    pub score: DisplayStat,
}

impl Default for DisplayStats {
    fn default() -> Self {
        Self {
            gforces: DisplayStat::new(0.0, 3.0, ""),
            gforce_penalty: DisplayStat::new(0.0, 5.0, ""),
            lane_deviation_penalty: DisplayStat::new(0.0, 40.0, ""),
            speed_reward: DisplayStat::new(0.0, 5.0, ""),
            progress_reward: DisplayStat::new(0.0, 5.0, ""),
            reward: DisplayStat::new(-20.0, 20.0, ""),
            score: DisplayStat::new(-500.0, 10_000.0, ""),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DashboardUpdate {
    pub display_stats: DisplayStats,
    pub should_stop: bool,
}

/// Fire-and-forget hand-off to an external dashboard consumer.
///
/// The episode loop must never stall waiting for a consumer, so the channel
/// is bounded and a full queue drops the update instead of blocking.
pub struct DashboardPublisher {
    sender: SyncSender<DashboardUpdate>,
    dropped_updates: u64,
}

impl DashboardPublisher {
    pub fn channel(capacity: usize) -> (Self, Receiver<DashboardUpdate>) {
        let (sender, receiver) = sync_channel(capacity);
        (
            Self {
                sender,
                dropped_updates: 0,
            },
            receiver,
        )
    }

    pub fn publish(&mut self, update: DashboardUpdate) {
        match self.sender.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_updates += 1;
                trace!("dashboard consumer lagging, dropped update");
            }
        }
    }

    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates
    }
}
