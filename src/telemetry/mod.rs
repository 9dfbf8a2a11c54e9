pub(crate) mod lap_tracker;
pub(crate) mod stuck_detector;

pub use lap_tracker::{LapCrossing, LapTracker};
pub use stuck_detector::StuckDetector;

use serde::{Deserialize, Serialize};

/// g in cm/s^2
const GRAVITY_CMPS2: f64 = 980.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One frame's sensor/state readout from the simulator.
///
/// The capture boundary does not guarantee presence of any field; an absent
/// field contributes nothing to the step that reads it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Current speed, cm/s
    pub speed_cmps: Option<f64>,
    /// Acceleration vector (including gravity), cm/s^2
    pub acceleration_cmps2: Option<Vec3>,
    /// Distance from the center of the current lane, cm
    pub distance_to_lane_center_cm: Option<f64>,
    /// Total distance traveled along the route, cm
    pub distance_along_route_cm: Option<f64>,
    /// Lap number as counted by the simulator
    pub lap_number: Option<u32>,
    /// Throttle use. 0=off throttle to 1=full throttle
    pub throttle: Option<f64>,
}

impl TelemetrySnapshot {
    /// G-force magnitude derived from the acceleration vector.
    pub fn gforce(&self) -> Option<f64> {
        self.acceleration_cmps2
            .map(|a| a.magnitude() / GRAVITY_CMPS2)
    }
}
