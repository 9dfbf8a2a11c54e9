pub mod score;

pub use score::EpisodeScore;

use log::{debug, info};
use uom::si::f64::Velocity;
use uom::si::velocity::{centimeter_per_second, kilometer_per_hour};

use crate::DrivebenchError;

/// Target speed the agent is rewarded for approaching, km/h
pub(crate) const SPEED_LIMIT_KPH: f64 = 64.0;
/// How far over the limit the agent may drift before the penalty flips, km/h
const OVERSPEED_TOLERANCE_KPH: f64 = 4.0;
const SPEED_BALANCE_COEFF: f64 = 2.0 / 10.0;

/// Lane deviation below this contributes no penalty, cm. Tuned for the
/// Canyons spline - change for future maps.
const LANE_DEVIATION_THRESHOLD_CM: f64 = 200.0;
const LANE_DEVIATION_COEFF: f64 = 0.1;

/// Sustained acceleration above this is penalized, g
const GFORCE_COMFORT_LIMIT_G: f64 = 0.5;
/// Cap on time-weighted g so a large frame skip cannot ruin the
/// approximation, g*s
const GFORCE_TIME_WEIGHTED_CAP: f64 = 5.0;
/// Meters of reward lost per second spent over the comfort limit
const GFORCE_BALANCE_COEFF: f64 = 24.0;

/// Route distance moving backwards faster than this is a lap-wrap artifact,
/// not real regress, cm/s
const LAP_WRAP_VELOCITY_CMPS: f64 = -400.0 * 100.0;
const PROGRESS_BALANCE_COEFF: f64 = 1.0;

/// Symmetric hard cap on every term's magnitude, independent of the physical
/// units, so sensor noise or frame-time spikes cannot dominate an episode
const REWARD_CLIP: f64 = 100.0;

pub fn clip(reward: f64) -> f64 {
    reward.clamp(-REWARD_CLIP, REWARD_CLIP)
}

/// Incentivize going quickly while remaining under the speed limit.
///
/// `time_passed_s` is the time since the previous speed reward, which keeps
/// the term consistent across variable frame rates; callers must skip the
/// term when no previous step timestamp exists.
pub fn speed_reward(speed_cmps: f64, time_passed_s: f64) -> f64 {
    let speed_kph = Velocity::new::<centimeter_per_second>(speed_cmps).get::<kilometer_per_hour>();
    let speed_delta = speed_kph - SPEED_LIMIT_KPH;
    let speed_reward = if speed_delta > OVERSPEED_TOLERANCE_KPH {
        // squared to outweigh the advantage of speeding
        -SPEED_BALANCE_COEFF * speed_kph * time_passed_s * speed_delta * speed_delta
    } else {
        // no slow penalty: progress already incentivizes this, and the agent
        // has to stop at some points anyway
        SPEED_BALANCE_COEFF * time_passed_s * speed_kph
    };
    clip(speed_reward)
}

pub fn lane_deviation_penalty(
    lane_deviation_cm: f64,
    time_passed_s: Option<f64>,
) -> Result<f64, DrivebenchError> {
    if lane_deviation_cm < 0.0 {
        return Err(DrivebenchError::NegativeLaneDeviation {
            value: lane_deviation_cm,
        });
    }
    debug!("distance_to_center_of_lane {}", lane_deviation_cm);
    let mut penalty = 0.0;
    if let Some(time_passed_s) = time_passed_s {
        if lane_deviation_cm > LANE_DEVIATION_THRESHOLD_CM {
            penalty =
                LANE_DEVIATION_COEFF * time_passed_s * lane_deviation_cm * lane_deviation_cm
                    / 100.0;
        }
    }
    Ok(clip(penalty))
}

pub fn gforce_penalty(gforce: f64, time_passed_s: f64) -> Result<f64, DrivebenchError> {
    if gforce < 0.0 {
        return Err(DrivebenchError::NegativeGforce { value: gforce });
    }
    let mut penalty = 0.0;
    if gforce > GFORCE_COMFORT_LIMIT_G {
        let time_weighted_gs = (time_passed_s * gforce).min(GFORCE_TIME_WEIGHTED_CAP);
        penalty = GFORCE_BALANCE_COEFF * time_weighted_gs;
        debug!("accumulated gforce {}", time_weighted_gs);
    }
    Ok(clip(penalty))
}

/// Reward for route distance covered this step, on a meter scale.
pub fn progress_reward(progress_cm: f64, time_passed_s: Option<f64>) -> f64 {
    let mut progress_cm = progress_cm;
    if let Some(time_passed_s) = time_passed_s {
        let step_velocity = progress_cm / time_passed_s;
        if step_velocity < LAP_WRAP_VELOCITY_CMPS {
            // route distance snapped back to the start line
            info!("assuming lap complete");
            progress_cm = 0.0;
        }
    }
    clip(progress_cm / 100.0 * PROGRESS_BALANCE_COEFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // cm/s for a given km/h
    fn cmps(kph: f64) -> f64 {
        kph * 100_000.0 / 3600.0
    }

    #[test]
    fn test_speed_reward_under_limit_scales_with_speed() {
        let reward = speed_reward(cmps(60.0), 1.0);
        assert!((reward - 12.0).abs() < 1e-9);
        assert!(speed_reward(cmps(30.0), 1.0) < reward);
    }

    #[test]
    fn test_overspeed_outweighs_compliant_reward() {
        let over = speed_reward(cmps(SPEED_LIMIT_KPH + 5.0), 1.0);
        let under = speed_reward(cmps(60.0), 1.0);
        assert!(over < 0.0);
        assert!(over.abs() > under.abs());
    }

    #[test]
    fn test_speed_reward_tolerates_small_overspeed() {
        // 4 km/h over the limit is still rewarded
        let reward = speed_reward(cmps(SPEED_LIMIT_KPH + 4.0), 1.0);
        assert!(reward > 0.0);
    }

    #[test]
    fn test_lane_deviation_requires_positive_input() {
        assert!(matches!(
            lane_deviation_penalty(-1.0, Some(1.0)),
            Err(DrivebenchError::NegativeLaneDeviation { .. })
        ));
    }

    #[test]
    fn test_lane_deviation_free_below_threshold() {
        assert_eq!(lane_deviation_penalty(200.0, Some(1.0)).unwrap(), 0.0);
        assert_eq!(lane_deviation_penalty(500.0, None).unwrap(), 0.0);
    }

    #[test]
    fn test_lane_deviation_penalty_formula() {
        let penalty = lane_deviation_penalty(300.0, Some(1.0)).unwrap();
        assert!((penalty - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_gforce_requires_positive_input() {
        assert!(matches!(
            gforce_penalty(-0.1, 1.0),
            Err(DrivebenchError::NegativeGforce { .. })
        ));
    }

    #[test]
    fn test_gforce_free_below_comfort_limit() {
        assert_eq!(gforce_penalty(0.5, 1.0).unwrap(), 0.0);
    }

    #[test]
    fn test_gforce_penalty_formula_and_frame_skip_cap() {
        let penalty = gforce_penalty(1.0, 1.0).unwrap();
        assert!((penalty - 24.0).abs() < 1e-9);
        // a 10s frame skip at 2g caps at 5 g*s before clipping
        assert_eq!(gforce_penalty(2.0, 10.0).unwrap(), 100.0);
    }

    #[test]
    fn test_progress_reward_on_meter_scale() {
        assert!((progress_reward(500.0, Some(0.1)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_backward_jump_is_lap_wrap() {
        assert_eq!(progress_reward(-500_000.0, Some(1.0)), 0.0);
    }

    #[test]
    fn test_slow_reversing_still_penalized() {
        let reward = progress_reward(-300.0, Some(1.0));
        assert!((reward + 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_without_time_is_not_wrap_checked() {
        assert_eq!(progress_reward(-500_000.0, None), -100.0);
    }

    proptest! {
        #[test]
        fn prop_speed_reward_clipped(speed in 0.0..1e6f64, t in 0.001..10.0f64) {
            let reward = speed_reward(speed, t);
            prop_assert!((-100.0..=100.0).contains(&reward));
        }

        #[test]
        fn prop_lane_deviation_clipped(dev in 0.0..1e6f64, t in 0.001..10.0f64) {
            let penalty = lane_deviation_penalty(dev, Some(t)).unwrap();
            prop_assert!((0.0..=100.0).contains(&penalty));
        }

        #[test]
        fn prop_gforce_clipped(g in 0.0..100.0f64, t in 0.001..10.0f64) {
            let penalty = gforce_penalty(g, t).unwrap();
            prop_assert!((0.0..=100.0).contains(&penalty));
        }

        #[test]
        fn prop_progress_clipped(progress in -1e7..1e7f64, t in 0.001..10.0f64) {
            let reward = progress_reward(progress, Some(t));
            prop_assert!((-100.0..=100.0).contains(&reward));
        }
    }
}
