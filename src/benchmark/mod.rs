use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Local};
use itertools::Itertools;
use log::info;

use crate::{reward::EpisodeScore, DrivebenchError};

/// Trials recorded before benchmarking is complete
pub const MAX_BENCHMARK_TRIALS: usize = 1000;

const RESULTS_HEADER: &str = "lap #,score,speed reward,progress reward,lane deviation penalty,gforce penalty,got stuck,start,end,lap time";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BenchmarkSummary {
    pub median: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub high: f64,
    pub low: f64,
}

/// Collects finalized episode scores across benchmark trials and rewrites
/// the complete results file after every trial, so the file on disk is
/// always the full history to date.
pub struct BenchmarkRecorder {
    results_path: PathBuf,
    trial_scores: Vec<EpisodeScore>,
    done: bool,
}

impl BenchmarkRecorder {
    /// Creates the benchmark directory up front so an unwritable target
    /// surfaces before the first trial finishes, not after it. The results
    /// file name carries the run date.
    pub fn new(benchmark_dir: &Path) -> Result<Self, DrivebenchError> {
        fs::create_dir_all(benchmark_dir)
            .map_err(|e| DrivebenchError::BenchmarkDirError { source: e })?;
        let run_date = Local::now().format("%Y-%m-%d_%H-%M-%S");
        Ok(Self {
            results_path: benchmark_dir.join(format!("{run_date}.csv")),
            trial_scores: Vec::new(),
            done: false,
        })
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn trial_count(&self) -> usize {
        self.trial_scores.len()
    }

    /// Whether the trial cap has been reached. Latched: once true it stays
    /// true for the lifetime of the recorder.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Append one finalized trial. Returns the latched `done` flag. Calls
    /// past the cap leave both the trial list and `done` unchanged.
    pub fn record(&mut self, mut score: EpisodeScore) -> bool {
        if self.done {
            return true;
        }
        score.finalize(SystemTime::now());
        info!(
            "benchmark lap #{} score: {}",
            self.trial_scores.len() + 1,
            score.total
        );
        self.trial_scores.push(score);
        if self.trial_scores.len() >= MAX_BENCHMARK_TRIALS {
            self.done = true;
        }
        self.done
    }

    /// Append one trial and rewrite the results file in a single call.
    /// Hosts embedding the recorder in a threaded service must treat this
    /// as one critical section.
    pub fn finalize_trial(&mut self, score: EpisodeScore) -> Result<bool, DrivebenchError> {
        let done = self.record(score);
        let path = self.results_path.clone();
        self.persist(&path)?;
        Ok(done)
    }

    pub fn summarize(&self) -> Option<BenchmarkSummary> {
        let totals: Vec<f64> = self.trial_scores.iter().map(|s| s.total).collect();
        summary_of(&totals)
    }

    /// Rewrite the complete trial history and summary to `path`. An
    /// unwritable target is a fatal error: benchmark results must never be
    /// lost silently.
    pub fn persist(&self, path: &Path) -> Result<(), DrivebenchError> {
        let file =
            File::create(path).map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{RESULTS_HEADER}")
            .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
        for (i, score) in self.trial_scores.iter().enumerate() {
            let end_time = score.end_time.unwrap_or(score.start_time);
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{},{}",
                i + 1,
                score.total,
                score.speed_reward,
                score.progress_reward,
                score.lane_deviation_penalty,
                score.gforce_penalty,
                score.got_stuck,
                local_timestamp(score.start_time),
                local_timestamp(end_time),
                score.duration_s().unwrap_or(0.0),
            )
            .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
        }

        if let Some(summary) = self.summarize() {
            writeln!(writer).map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
            writeln!(writer, "median score,{}", summary.median)
                .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
            writeln!(writer, "avg score,{}", summary.mean)
                .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
            writeln!(writer, "std,{}", summary.std_dev)
                .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
            writeln!(writer, "high score,{}", summary.high)
                .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
            writeln!(writer, "low score,{}", summary.low)
                .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
        }

        writer
            .flush()
            .map_err(|e| DrivebenchError::BenchmarkWriteError { source: e })?;
        info!("wrote benchmark results to {:?}", path);
        Ok(())
    }

    /// Read a persisted results file back. Used by the `summarize`
    /// subcommand and to verify the write round-trips.
    pub fn load(path: &Path) -> Result<LoadedBenchmark, DrivebenchError> {
        let file =
            File::open(path).map_err(|e| DrivebenchError::BenchmarkReadError { source: e })?;
        let mut lines = BufReader::new(file).lines();

        let header = lines
            .next()
            .transpose()
            .map_err(|e| DrivebenchError::BenchmarkReadError { source: e })?
            .ok_or_else(|| DrivebenchError::BenchmarkParseError {
                reason: "file is empty".to_string(),
            })?;
        if header != RESULTS_HEADER {
            return Err(DrivebenchError::BenchmarkParseError {
                reason: format!("unexpected header: {header}"),
            });
        }

        let mut trials = Vec::new();
        let mut summary_fields = Vec::new();
        let mut in_summary = false;
        for line in lines {
            let line = line.map_err(|e| DrivebenchError::BenchmarkReadError { source: e })?;
            if line.is_empty() {
                in_summary = true;
                continue;
            }
            if in_summary {
                let (_, value) =
                    line.split_once(',')
                        .ok_or_else(|| DrivebenchError::BenchmarkParseError {
                            reason: format!("malformed summary row: {line}"),
                        })?;
                summary_fields.push(parse_float(value)?);
            } else {
                trials.push(parse_trial_row(&line)?);
            }
        }

        let summary = match summary_fields.as_slice() {
            [] => None,
            [median, mean, std_dev, high, low] => Some(BenchmarkSummary {
                median: *median,
                mean: *mean,
                std_dev: *std_dev,
                high: *high,
                low: *low,
            }),
            other => {
                return Err(DrivebenchError::BenchmarkParseError {
                    reason: format!("expected 5 summary rows, found {}", other.len()),
                })
            }
        };

        Ok(LoadedBenchmark { trials, summary })
    }
}

/// A results file read back from disk.
pub struct LoadedBenchmark {
    pub trials: Vec<EpisodeScore>,
    pub summary: Option<BenchmarkSummary>,
}

fn summary_of(totals: &[f64]) -> Option<BenchmarkSummary> {
    if totals.is_empty() {
        return None;
    }
    let sorted: Vec<f64> = totals
        .iter()
        .copied()
        .sorted_by(|a, b| a.partial_cmp(b).unwrap())
        .collect();
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let mean = totals.iter().sum::<f64>() / n as f64;
    let variance = totals.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / n as f64;
    Some(BenchmarkSummary {
        median,
        mean,
        std_dev: variance.sqrt(),
        high: sorted[n - 1],
        low: sorted[0],
    })
}

fn local_timestamp(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339()
}

fn parse_float(value: &str) -> Result<f64, DrivebenchError> {
    value
        .parse()
        .map_err(|_| DrivebenchError::BenchmarkParseError {
            reason: format!("not a number: {value}"),
        })
}

fn parse_timestamp(value: &str) -> Result<SystemTime, DrivebenchError> {
    DateTime::parse_from_rfc3339(value)
        .map(SystemTime::from)
        .map_err(|_| DrivebenchError::BenchmarkParseError {
            reason: format!("not a timestamp: {value}"),
        })
}

fn parse_trial_row(line: &str) -> Result<EpisodeScore, DrivebenchError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 10 {
        return Err(DrivebenchError::BenchmarkParseError {
            reason: format!("expected 10 columns, found {}: {line}", fields.len()),
        });
    }
    Ok(EpisodeScore {
        total: parse_float(fields[1])?,
        speed_reward: parse_float(fields[2])?,
        progress_reward: parse_float(fields[3])?,
        lane_deviation_penalty: parse_float(fields[4])?,
        gforce_penalty: parse_float(fields[5])?,
        got_stuck: fields[6] == "true",
        start_time: parse_timestamp(fields[7])?,
        end_time: Some(parse_timestamp(fields[8])?),
    })
}
