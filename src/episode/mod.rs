use std::{
    path::Path,
    time::{Duration, Instant, SystemTime},
};

use log::{debug, error, info, warn};

use crate::{
    benchmark::BenchmarkRecorder,
    connection::{ConnectionManager, ConnectionSession},
    dashboard::{DashboardPublisher, DashboardUpdate, DisplayStats},
    errors::DrivebenchError,
    reward,
    reward::EpisodeScore,
    sim::{CaptureClient, ControlClient},
    telemetry::{LapTracker, StuckDetector, TelemetrySnapshot},
};

/// Time after spawn during which the reward is forced to 0 so the agent can
/// get on track
const SPAWN_GRACE_PERIOD: Duration = Duration::from_millis(2500);
/// Episode-ending penalty for getting stuck, on the meter scale of the
/// progress reward
const STUCK_PENALTY: f64 = 10_000.0;
/// Presence of this variable forces an immediate synthetic stuck and
/// benchmark write, for deterministic testing of that path
pub const TEST_BENCHMARK_WRITE_ENV: &str = "TEST_BENCHMARK_WRITE";

/// Control command sent to the simulator each step.
#[derive(Clone, Copy, Debug)]
pub struct Action {
    pub steering: f64,
    pub throttle: f64,
    pub brake: f64,
    pub handbrake: f64,
    pub has_control: bool,
}

impl Default for Action {
    fn default() -> Self {
        Self {
            steering: 0.0,
            throttle: 0.0,
            brake: 0.0,
            handbrake: 0.0,
            has_control: true,
        }
    }
}

impl Action {
    /// Full handbrake, used to hold the car still right after a respawn.
    pub fn full_handbrake() -> Self {
        Self {
            handbrake: 1.0,
            ..Default::default()
        }
    }
}

/// What one step of the episode loop produced.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub snapshot: Option<TelemetrySnapshot>,
    pub reward: f64,
    pub done: bool,
    pub step_num: u64,
}

pub(crate) fn force_benchmark_write_requested() -> bool {
    std::env::var_os(TEST_BENCHMARK_WRITE_ENV).is_some()
}

/// Root orchestrator of the episode loop.
///
/// Owns the control and capture clients plus all per-episode state. Each
/// step pulls one telemetry snapshot, turns it into a reward, runs the lap
/// and stuck checks, and reports whether the episode is over.
pub struct EpisodeController<C: ControlClient, P: CaptureClient> {
    control: C,
    capture: P,
    session: ConnectionSession,
    score: EpisodeScore,
    stuck_detector: StuckDetector,
    lap_tracker: LapTracker,
    benchmark: Option<BenchmarkRecorder>,
    dashboard: Option<DashboardPublisher>,
    display_stats: DisplayStats,
    should_end_on_lap: bool,
    force_benchmark_write: bool,
    has_control: bool,
    controller_start: Instant,
    prev_step_time: Option<SystemTime>,
    distance_along_route: f64,
    start_distance_along_route: f64,
    step_num: u64,
    done_benchmarking: bool,
}

impl<C: ControlClient, P: CaptureClient> EpisodeController<C, P> {
    pub fn new(control: C, capture: P, session: ConnectionSession) -> Self {
        Self {
            control,
            capture,
            session,
            score: EpisodeScore::new(SystemTime::now()),
            stuck_detector: StuckDetector::new(Instant::now()),
            lap_tracker: LapTracker::new(),
            benchmark: None,
            dashboard: None,
            display_stats: DisplayStats::default(),
            should_end_on_lap: false,
            force_benchmark_write: force_benchmark_write_requested(),
            has_control: false,
            controller_start: Instant::now(),
            prev_step_time: None,
            distance_along_route: 0.0,
            start_distance_along_route: 0.0,
            step_num: 0,
            done_benchmarking: false,
        }
    }

    /// Record every finalized episode as a benchmark trial. Creates the
    /// results directory immediately so an unwritable target fails now.
    pub fn enable_benchmarking(&mut self, benchmark_dir: &Path) -> Result<(), DrivebenchError> {
        self.benchmark = Some(BenchmarkRecorder::new(benchmark_dir)?);
        Ok(())
    }

    pub fn set_end_on_lap(&mut self, should_end_on_lap: bool) {
        self.should_end_on_lap = should_end_on_lap;
    }

    pub fn attach_dashboard(&mut self, publisher: DashboardPublisher) {
        self.dashboard = Some(publisher);
    }

    pub fn score(&self) -> &EpisodeScore {
        &self.score
    }

    pub fn benchmark_recorder(&self) -> Option<&BenchmarkRecorder> {
        self.benchmark.as_ref()
    }

    /// True once the benchmark trial cap is reached; recording stops and
    /// the orchestrator should too.
    pub fn done_benchmarking(&self) -> bool {
        self.done_benchmarking
    }

    /// Run one step of the episode loop.
    pub fn step(&mut self, action: &Action) -> Result<StepOutcome, DrivebenchError> {
        self.send_control(action)?;
        let snapshot = self.observe();
        let now = SystemTime::now();
        let mut reward = self.compute_reward(snapshot.as_ref(), now)?;
        let mut done = self.track_laps(snapshot.as_ref())?;
        self.prev_step_time = Some(now);

        self.publish_dashboard(false);

        if self.check_stuck(snapshot.as_ref(), Instant::now())? {
            done = true;
            // reward is on a scale of meters
            reward -= STUCK_PENALTY;
        }
        self.step_num += 1;
        Ok(StepOutcome {
            snapshot,
            reward,
            done,
            step_num: self.step_num,
        })
    }

    /// Start a fresh episode: respawn the agent through the control
    /// boundary and zero all per-episode state.
    pub fn reset(&mut self) -> Result<(), DrivebenchError> {
        self.reset_agent()?;
        self.send_control(&Action::full_handbrake())?;
        self.step_num = 0;
        self.distance_along_route = 0.0;
        self.start_distance_along_route = 0.0;
        self.prev_step_time = None;
        self.lap_tracker.reset();
        self.stuck_detector.reset_forward_progress(Instant::now());
        self.score = EpisodeScore::new(SystemTime::now());
        Ok(())
    }

    /// Tell the dashboard to stop and tear down the simulator session.
    pub fn close(&mut self, manager: &mut ConnectionManager) {
        if let Some(dashboard) = self.dashboard.as_mut() {
            dashboard.publish(DashboardUpdate {
                display_stats: self.display_stats,
                should_stop: true,
            });
        }
        manager.close(&mut self.control, &mut self.capture, &mut self.session);
    }

    fn observe(&mut self) -> Option<TelemetrySnapshot> {
        match self.capture.step() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // degrade to "no observation this step"; absent fields
                // contribute nothing to the reward
                error!("caught error during capture step: {}", e);
                None
            }
        }
    }

    fn compute_reward(
        &mut self,
        snapshot: Option<&TelemetrySnapshot>,
        now: SystemTime,
    ) -> Result<f64, DrivebenchError> {
        let Some(snapshot) = snapshot else {
            return Ok(0.0);
        };
        let time_passed = self
            .prev_step_time
            .and_then(|prev| now.duration_since(prev).ok())
            .map(|d| d.as_secs_f64());

        let elapsed = now
            .duration_since(self.score.start_time)
            .unwrap_or(Duration::ZERO);
        let mut reward = 0.0;
        if elapsed >= SPAWN_GRACE_PERIOD {
            let progress_reward = self.progress_reward(snapshot, time_passed);
            let gforce_penalty = self.gforce_penalty(snapshot, time_passed)?;
            let lane_deviation_penalty = self.lane_deviation_penalty(snapshot, time_passed)?;
            let speed_reward = self.speed_reward(snapshot, time_passed);
            reward = progress_reward + speed_reward - gforce_penalty - lane_deviation_penalty;
        }

        self.score.total += reward;
        self.display_stats.reward.value = reward;
        self.display_stats.score.value = self.score.total;
        debug!("reward {}", reward);
        debug!("score {}", self.score.total);
        Ok(reward)
    }

    fn speed_reward(&mut self, snapshot: &TelemetrySnapshot, time_passed: Option<f64>) -> f64 {
        let mut speed_reward = 0.0;
        if let (Some(speed_cmps), Some(time_passed)) = (snapshot.speed_cmps, time_passed) {
            speed_reward = reward::speed_reward(speed_cmps, time_passed);
            self.display_stats.speed_reward.value = speed_reward;
        }
        self.score.speed_reward += speed_reward;
        speed_reward
    }

    fn lane_deviation_penalty(
        &mut self,
        snapshot: &TelemetrySnapshot,
        time_passed: Option<f64>,
    ) -> Result<f64, DrivebenchError> {
        let mut penalty = 0.0;
        if let Some(lane_deviation) = snapshot.distance_to_lane_center_cm {
            penalty = reward::lane_deviation_penalty(lane_deviation, time_passed)?;
        }
        self.display_stats.lane_deviation_penalty.value = penalty;
        self.score.lane_deviation_penalty += penalty;
        Ok(penalty)
    }

    fn gforce_penalty(
        &mut self,
        snapshot: &TelemetrySnapshot,
        time_passed: Option<f64>,
    ) -> Result<f64, DrivebenchError> {
        let mut penalty = 0.0;
        if let (Some(gforce), Some(time_passed)) = (snapshot.gforce(), time_passed) {
            self.display_stats.gforces.value = gforce;
            penalty = reward::gforce_penalty(gforce, time_passed)?;
        }
        self.display_stats.gforce_penalty.value = penalty;
        self.score.gforce_penalty += penalty;
        Ok(penalty)
    }

    fn progress_reward(&mut self, snapshot: &TelemetrySnapshot, time_passed: Option<f64>) -> f64 {
        let mut progress_reward = 0.0;
        if let Some(route_cm) = snapshot.distance_along_route_cm {
            let dist = route_cm - self.start_distance_along_route;
            let progress = dist - self.distance_along_route;
            self.distance_along_route = dist;
            progress_reward = reward::progress_reward(progress, time_passed);
        }
        self.display_stats.progress_reward.value = progress_reward;
        self.score.progress_reward += progress_reward;
        progress_reward
    }

    fn track_laps(
        &mut self,
        snapshot: Option<&TelemetrySnapshot>,
    ) -> Result<bool, DrivebenchError> {
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        let mut done = false;
        if let Some(crossing) = self.lap_tracker.observe(snapshot.lap_number, self.score.total) {
            debug!(
                "lap {} scored {} since the previous boundary",
                crossing.lap_number, crossing.lap_score
            );
            if self.benchmark.is_some() && self.finalize_benchmark_trial()? {
                self.done_benchmarking = true;
                done = true;
            }
            if self.should_end_on_lap {
                done = true;
            }
            self.log_up_time();
        }
        Ok(done)
    }

    fn check_stuck(
        &mut self,
        snapshot: Option<&TelemetrySnapshot>,
        now: Instant,
    ) -> Result<bool, DrivebenchError> {
        if self.force_benchmark_write {
            self.score.got_stuck = true;
            self.finalize_benchmark_trial()?;
            return Ok(true);
        }
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        let Some(speed_cmps) = snapshot.speed_cmps else {
            return Ok(false);
        };
        let throttle = snapshot.throttle.unwrap_or(0.0);
        if self.stuck_detector.observe(speed_cmps, throttle, now) {
            warn!("episode stalled: sustained throttle without forward progress");
            self.score.got_stuck = true;
            if self.benchmark.is_some() {
                self.finalize_benchmark_trial()?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Hand a copy of the score to the recorder, which stamps the trial's
    /// end time. Returns true when the trial cap has been reached.
    fn finalize_benchmark_trial(&mut self) -> Result<bool, DrivebenchError> {
        let Some(recorder) = self.benchmark.as_mut() else {
            return Ok(false);
        };
        recorder.finalize_trial(self.score.clone())
    }

    fn send_control(&mut self, action: &Action) -> Result<(), DrivebenchError> {
        if self.has_control != action.has_control {
            self.change_has_control(action.has_control)?;
        }
        self.control.set_control(
            self.session.client_id,
            action.steering,
            action.throttle,
            action.brake,
            action.handbrake,
        )
    }

    fn change_has_control(&mut self, has_control: bool) -> Result<(), DrivebenchError> {
        if has_control {
            self.has_control = self.control.request_agent_control(self.session.client_id)?;
        } else {
            self.control.release_agent_control(self.session.client_id)?;
            self.has_control = false;
        }
        Ok(())
    }

    fn reset_agent(&mut self) -> Result<(), DrivebenchError> {
        self.control.release_agent_control(self.session.client_id)?;
        self.has_control = self.control.request_agent_control(self.session.client_id)?;
        self.control.reset_agent(self.session.client_id)
    }

    fn publish_dashboard(&mut self, should_stop: bool) {
        if let Some(dashboard) = self.dashboard.as_mut() {
            dashboard.publish(DashboardUpdate {
                display_stats: self.display_stats,
                should_stop,
            });
        }
    }

    fn log_up_time(&self) {
        info!("up for {:?}", self.controller_start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{NullControlClient, ReplayCaptureClient};
    use crate::telemetry::Vec3;
    use tempfile::TempDir;

    fn test_session() -> ConnectionSession {
        ConnectionSession {
            client_id: 1,
            max_capture_resolution: None,
            server_protocol_version: "test".to_string(),
            shared_mem_name: "test".to_string(),
            shared_mem_size: 0,
            cameras: Vec::new(),
        }
    }

    fn controller_over(
        snapshots: Vec<TelemetrySnapshot>,
    ) -> EpisodeController<NullControlClient, ReplayCaptureClient> {
        let mut controller = EpisodeController::new(
            NullControlClient::new(),
            ReplayCaptureClient::from_snapshots(snapshots),
            test_session(),
        );
        controller.force_benchmark_write = false;
        controller
    }

    fn backdate_episode(
        controller: &mut EpisodeController<NullControlClient, ReplayCaptureClient>,
        seconds: u64,
    ) {
        controller.score.start_time = SystemTime::now() - Duration::from_secs(seconds);
    }

    fn moving_snapshot(speed_cmps: f64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            speed_cmps: Some(speed_cmps),
            throttle: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_reward_is_zero_during_spawn_grace() {
        let mut controller = controller_over(vec![moving_snapshot(2000.0); 3]);
        controller.prev_step_time = Some(SystemTime::now() - Duration::from_millis(100));

        for _ in 0..3 {
            let outcome = controller.step(&Action::default()).unwrap();
            assert_eq!(outcome.reward, 0.0);
        }
        assert_eq!(controller.score().total, 0.0);
        assert_eq!(controller.score().speed_reward, 0.0);
    }

    #[test]
    fn test_reward_accumulates_after_grace() {
        // ~54 km/h, under the limit
        let mut controller = controller_over(vec![moving_snapshot(1500.0)]);
        backdate_episode(&mut controller, 10);
        controller.prev_step_time = Some(SystemTime::now() - Duration::from_secs(1));

        let outcome = controller.step(&Action::default()).unwrap();
        assert!(outcome.reward > 0.0);
        assert_eq!(controller.score().total, outcome.reward);
        assert!(controller.score().speed_reward > 0.0);
    }

    #[test]
    fn test_first_step_skips_time_based_terms() {
        let mut controller = controller_over(vec![TelemetrySnapshot {
            speed_cmps: Some(2000.0),
            acceleration_cmps2: Some(Vec3::new(2000.0, 0.0, 0.0)),
            ..Default::default()
        }]);
        backdate_episode(&mut controller, 10);

        // no previous step timestamp: speed and gforce contribute nothing
        let outcome = controller.step(&Action::default()).unwrap();
        assert_eq!(outcome.reward, 0.0);
        assert_eq!(controller.score().gforce_penalty, 0.0);
    }

    #[test]
    fn test_transient_capture_error_degrades_to_no_observation() {
        // an empty replay errors on the first pull
        let mut controller = controller_over(Vec::new());
        backdate_episode(&mut controller, 10);

        let outcome = controller.step(&Action::default()).unwrap();
        assert!(outcome.snapshot.is_none());
        assert_eq!(outcome.reward, 0.0);
        assert!(!outcome.done);
    }

    #[test]
    fn test_negative_lane_deviation_propagates() {
        let mut controller = controller_over(vec![TelemetrySnapshot {
            distance_to_lane_center_cm: Some(-5.0),
            ..Default::default()
        }]);
        backdate_episode(&mut controller, 10);

        let result = controller.step(&Action::default());
        assert!(matches!(
            result,
            Err(DrivebenchError::NegativeLaneDeviation { .. })
        ));
    }

    #[test]
    fn test_progress_tracks_route_distance_between_steps() {
        let snapshots = vec![
            TelemetrySnapshot {
                distance_along_route_cm: Some(1000.0),
                ..Default::default()
            },
            TelemetrySnapshot {
                distance_along_route_cm: Some(1500.0),
                ..Default::default()
            },
        ];
        let mut controller = controller_over(snapshots);
        backdate_episode(&mut controller, 10);

        controller.step(&Action::default()).unwrap();
        let outcome = controller.step(&Action::default()).unwrap();
        // 500 cm of new progress = 5 meters
        assert!((outcome.reward - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_forced_benchmark_write_ends_episode_with_stuck_trial() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller = controller_over(vec![moving_snapshot(2000.0)]);
        controller.enable_benchmarking(temp_dir.path()).unwrap();
        controller.force_benchmark_write = true;

        let outcome = controller.step(&Action::default()).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.reward, -STUCK_PENALTY);
        assert!(controller.score().got_stuck);

        let recorder = controller.benchmark_recorder().unwrap();
        assert_eq!(recorder.trial_count(), 1);
        assert!(recorder.results_path().exists());
    }

    #[test]
    fn test_lap_crossing_finalizes_benchmark_trial() {
        let temp_dir = TempDir::new().unwrap();
        let snapshots = vec![
            TelemetrySnapshot {
                lap_number: Some(1),
                ..Default::default()
            },
            TelemetrySnapshot {
                lap_number: Some(2),
                ..Default::default()
            },
        ];
        let mut controller = controller_over(snapshots);
        controller.enable_benchmarking(temp_dir.path()).unwrap();

        let outcome = controller.step(&Action::default()).unwrap();
        assert!(!outcome.done);
        let outcome = controller.step(&Action::default()).unwrap();
        // one trial recorded, but 999 more to go before done
        assert!(!outcome.done);
        assert_eq!(
            controller.benchmark_recorder().unwrap().trial_count(),
            1
        );
        assert!(!controller.done_benchmarking());
    }

    #[test]
    fn test_end_on_lap_terminates_episode() {
        let snapshots = vec![
            TelemetrySnapshot {
                lap_number: Some(1),
                ..Default::default()
            },
            TelemetrySnapshot {
                lap_number: Some(2),
                ..Default::default()
            },
        ];
        let mut controller = controller_over(snapshots);
        controller.set_end_on_lap(true);

        assert!(!controller.step(&Action::default()).unwrap().done);
        assert!(controller.step(&Action::default()).unwrap().done);
    }

    #[test]
    fn test_reset_zeroes_episode_state() {
        let mut controller = controller_over(vec![
            TelemetrySnapshot {
                distance_along_route_cm: Some(5000.0),
                lap_number: Some(3),
                ..Default::default()
            },
            TelemetrySnapshot::default(),
        ]);
        backdate_episode(&mut controller, 10);
        controller.step(&Action::default()).unwrap();
        assert!(controller.prev_step_time.is_some());

        controller.reset().unwrap();
        assert_eq!(controller.step_num, 0);
        assert_eq!(controller.distance_along_route, 0.0);
        assert!(controller.prev_step_time.is_none());
        assert_eq!(controller.lap_tracker.current_lap_number(), None);
        assert_eq!(controller.score().total, 0.0);
        assert!(controller.has_control);
    }

    #[test]
    fn test_dashboard_updates_flow_per_step() {
        let (publisher, receiver) = DashboardPublisher::channel(8);
        let mut controller = controller_over(vec![moving_snapshot(1500.0)]);
        controller.attach_dashboard(publisher);
        backdate_episode(&mut controller, 10);
        controller.prev_step_time = Some(SystemTime::now() - Duration::from_secs(1));

        controller.step(&Action::default()).unwrap();
        let update = receiver.try_recv().unwrap();
        assert!(!update.should_stop);
        assert!(update.display_stats.score.value > 0.0);
    }
}
