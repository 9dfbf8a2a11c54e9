// Integration tests for benchmark persistence: a persisted results file,
// read back, must reproduce every trial row and the summary statistics.

use std::time::{Duration, SystemTime};

use drivebench::benchmark::{BenchmarkRecorder, MAX_BENCHMARK_TRIALS};
use drivebench::EpisodeScore;
use tempfile::TempDir;

fn sample_trial(i: usize) -> EpisodeScore {
    let start = SystemTime::now() - Duration::from_secs(120 - i as u64);
    let mut score = EpisodeScore::new(start);
    score.total = 250.0 - 3.7 * i as f64;
    score.speed_reward = 80.0 + i as f64;
    score.progress_reward = 150.0;
    score.lane_deviation_penalty = 12.5 * i as f64;
    score.gforce_penalty = 4.25;
    score.got_stuck = i % 3 == 0;
    score.finalize(start + Duration::from_secs(95));
    score
}

#[test]
fn test_persist_then_load_reproduces_trials_and_summary() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = BenchmarkRecorder::new(temp_dir.path()).unwrap();

    for i in 0..7 {
        recorder.record(sample_trial(i));
    }
    let path = recorder.results_path().to_path_buf();
    recorder.persist(&path).unwrap();

    let loaded = BenchmarkRecorder::load(&path).unwrap();
    assert_eq!(loaded.trials.len(), 7);
    for (i, trial) in loaded.trials.iter().enumerate() {
        let expected = sample_trial(i);
        assert_eq!(trial.total, expected.total);
        assert_eq!(trial.speed_reward, expected.speed_reward);
        assert_eq!(trial.progress_reward, expected.progress_reward);
        assert_eq!(trial.lane_deviation_penalty, expected.lane_deviation_penalty);
        assert_eq!(trial.gforce_penalty, expected.gforce_penalty);
        assert_eq!(trial.got_stuck, expected.got_stuck);
    }

    let summary = recorder.summarize().unwrap();
    let loaded_summary = loaded.summary.unwrap();
    assert_eq!(loaded_summary, summary);
}

#[test]
fn test_timestamps_survive_the_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = BenchmarkRecorder::new(temp_dir.path()).unwrap();
    let trial = sample_trial(2);
    recorder.record(trial.clone());
    let path = recorder.results_path().to_path_buf();
    recorder.persist(&path).unwrap();

    let loaded = BenchmarkRecorder::load(&path).unwrap();
    assert_eq!(loaded.trials[0].start_time, trial.start_time);
    assert_eq!(loaded.trials[0].end_time, trial.end_time);
}

#[test]
fn test_persist_rewrites_the_whole_history() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = BenchmarkRecorder::new(temp_dir.path()).unwrap();
    let path = recorder.results_path().to_path_buf();

    recorder.record(sample_trial(0));
    recorder.persist(&path).unwrap();
    recorder.record(sample_trial(1));
    recorder.persist(&path).unwrap();

    // one header, both trials, one blank row, five summary rows
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 1 + 2 + 1 + 5);
    let loaded = BenchmarkRecorder::load(&path).unwrap();
    assert_eq!(loaded.trials.len(), 2);
}

#[test]
fn test_trial_cap_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let mut recorder = BenchmarkRecorder::new(temp_dir.path()).unwrap();

    for i in 0..MAX_BENCHMARK_TRIALS + 5 {
        recorder.record(sample_trial(i % 10));
    }
    assert!(recorder.is_done());
    assert_eq!(recorder.trial_count(), MAX_BENCHMARK_TRIALS);

    let path = recorder.results_path().to_path_buf();
    recorder.persist(&path).unwrap();
    let loaded = BenchmarkRecorder::load(&path).unwrap();
    assert_eq!(loaded.trials.len(), MAX_BENCHMARK_TRIALS);
}
