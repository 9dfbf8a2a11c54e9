use std::{path::PathBuf, thread};

use clap::{Parser, Subcommand};
use log::debug;

use drivebench::{
    benchmark::BenchmarkRecorder,
    config::AppConfig,
    connection::{ConnectionManager, SimLifecycle},
    dashboard::DashboardPublisher,
    episode::{Action, EpisodeController},
    errors::DrivebenchError,
    sim::{NullControlClient, ReplayCaptureClient},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-run episodes over a recorded telemetry session
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        /// Record each finalized episode as a benchmark trial
        #[arg(short, long)]
        benchmark: bool,

        /// Where benchmark results go; implies --benchmark
        #[arg(long)]
        benchmark_dir: Option<PathBuf>,

        /// End the episode at every lap boundary
        #[arg(short, long)]
        end_on_lap: bool,
    },
    /// Print the statistics of a saved benchmark results file
    Summarize {
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn replay(
    input: &PathBuf,
    benchmark: bool,
    benchmark_dir: Option<PathBuf>,
    end_on_lap: bool,
) -> Result<(), DrivebenchError> {
    let config = AppConfig::from_local_file().unwrap_or_default();

    let mut control = NullControlClient::new();
    let mut capture = ReplayCaptureClient::from_file(input)?;
    let mut manager = ConnectionManager::new(&config.sim_host, config.sim_port, SimLifecycle::External);
    let session = manager.connect(&mut control, &mut capture, None)?;

    let mut controller = EpisodeController::new(control, capture, session);
    controller.set_end_on_lap(end_on_lap || config.end_on_lap);
    if benchmark || benchmark_dir.is_some() {
        let dir = match benchmark_dir {
            Some(dir) => dir,
            None => config.resolved_benchmark_dir()?,
        };
        controller.enable_benchmarking(&dir)?;
    }

    let (publisher, dashboard_rx) = DashboardPublisher::channel(config.dashboard_queue_capacity);
    controller.attach_dashboard(publisher);
    thread::spawn(move || {
        for update in dashboard_rx {
            if update.should_stop {
                break;
            }
            debug!("score {}", update.display_stats.score.value);
        }
    });

    controller.reset()?;
    let mut episodes = 1u64;
    let mut steps = 0u64;
    loop {
        let outcome = controller.step(&Action::default())?;
        if outcome.snapshot.is_none() {
            // the recording ran out
            break;
        }
        steps += 1;
        if outcome.done {
            if controller.done_benchmarking() {
                break;
            }
            episodes += 1;
            controller.reset()?;
        }
    }

    println!(
        "Replayed {} step(s) across {} episode(s); last episode score {:.2}",
        steps,
        episodes,
        controller.score().total
    );
    if let Some(recorder) = controller.benchmark_recorder() {
        if let Some(summary) = recorder.summarize() {
            println!(
                "Benchmark: {} trial(s) - median {:.2}, avg {:.2}, std {:.2}, high {:.2}, low {:.2}",
                recorder.trial_count(),
                summary.median,
                summary.mean,
                summary.std_dev,
                summary.high,
                summary.low
            );
            println!("Results written to {:?}", recorder.results_path());
        }
    }

    controller.close(&mut manager);
    Ok(())
}

fn summarize(input: &PathBuf) -> Result<(), DrivebenchError> {
    let loaded = BenchmarkRecorder::load(input)?;
    println!("{} trial(s) in {:?}", loaded.trials.len(), input);
    for (i, trial) in loaded.trials.iter().enumerate() {
        println!(
            "  lap #{}: score {:.2}{}",
            i + 1,
            trial.total,
            if trial.got_stuck { " (stuck)" } else { "" }
        );
    }
    if let Some(summary) = loaded.summary {
        println!("median score,{}", summary.median);
        println!("avg score,{}", summary.mean);
        println!("std,{}", summary.std_dev);
        println!("high score,{}", summary.high);
        println!("low score,{}", summary.low);
    }
    Ok(())
}

fn main() {
    colog::init();

    let cli = Args::parse();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");
    match &cli.command {
        Commands::Replay {
            input,
            benchmark,
            benchmark_dir,
            end_on_lap,
        } => replay(input, *benchmark, benchmark_dir.clone(), *end_on_lap)
            .expect("Error while replaying session"),
        Commands::Summarize { input } => {
            summarize(input).expect("Error while summarizing benchmark results")
        }
    };
}
