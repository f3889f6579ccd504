//! Line Follower entry point
//!
//! Runs one judged race headless and prints the CI line (or JSON result).

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};

use line_follower::config::SensorConfig;
use line_follower::report::EXIT_FAILURE;
use line_follower::sim::{
    CenterlineOracle, Idle, LineFollower, RaceJudge, Strategy, TraceRecorder,
};
use line_follower::{RaceConfig, RunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    /// Bar-sensor line follower
    Follower,
    /// Single signed sensor tracking the centerline at a fixed speed
    Oracle,
    /// Never moves
    Idle,
}

#[derive(Debug, Parser)]
#[command(name = "line-follower")]
#[command(about = "Judge a line-following robot on a generated track", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults apply to missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Built-in strategy to race
    #[arg(long, value_enum, default_value = "follower")]
    strategy: StrategyKind,

    /// Track seed
    #[arg(long)]
    seed: Option<u64>,

    /// Fixed tick length in seconds
    #[arg(long)]
    tick_duration: Option<f64>,

    /// Simulated time limit in seconds
    #[arg(long)]
    time_limit: Option<f64>,

    /// Wheel speed limit in m/s
    #[arg(long)]
    max_wheel_speed: Option<f64>,

    /// Forward speed of the oracle strategy in m/s
    #[arg(long, default_value_t = 1.0)]
    oracle_speed: f64,

    /// Print the full result as JSON instead of the CI line
    #[arg(long)]
    json: bool,

    /// Write a JSON-lines trace of every tick to this file
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Real-time cap on the whole run in seconds
    #[arg(long)]
    wall_clock_limit: Option<f64>,
}

impl Cli {
    fn race_config(&self) -> Result<RaceConfig> {
        let mut config = match &self.config {
            Some(path) => RaceConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RaceConfig::default(),
        };

        if let Some(seed) = self.seed {
            config.track.track_seed = seed;
        }
        if let Some(tick) = self.tick_duration {
            config.physics.tick_duration = tick;
        }
        if let Some(limit) = self.time_limit {
            config.judge.time_limit = limit;
        }
        if let Some(speed) = self.max_wheel_speed {
            config.physics.max_wheel_speed = speed;
        }
        if self.strategy == StrategyKind::Oracle {
            config.sensors =
                SensorConfig::signed_center(ORACLE_LOOKAHEAD, config.track.half_width);
        }

        config.validate()?;
        Ok(config)
    }

    fn strategy(&self) -> Box<dyn Strategy> {
        match self.strategy {
            StrategyKind::Follower => Box::new(LineFollower::default()),
            StrategyKind::Oracle => Box::new(CenterlineOracle::new(self.oracle_speed)),
            StrategyKind::Idle => Box::new(Idle),
        }
    }
}

/// Oracle sensor distance ahead of the axle (m)
const ORACLE_LOOKAHEAD: f64 = 0.12;

/// Run one race to its verdict, recording a trace when asked
fn race(
    config: &RaceConfig,
    strategy: Box<dyn Strategy>,
    record: bool,
) -> Result<(RunResult, Option<TraceRecorder>)> {
    let judge = RaceJudge::from_config(config, strategy)?;
    if record {
        let mut trace = TraceRecorder::new();
        let result = judge.run_observed(&mut trace);
        Ok((result, Some(trace)))
    } else {
        Ok((judge.run(), None))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.race_config()?;
    let strategy = cli.strategy();
    let record = cli.trace.is_some();

    info!(
        "Racing {:?} strategy on seed {}",
        cli.strategy, config.track.track_seed
    );

    let (tx, rx) = mpsc::channel();
    let race_config = config.clone();
    thread::Builder::new()
        .name("race".into())
        .spawn(move || {
            // The receiver is gone only after a wall-clock timeout
            let _ = tx.send(race(&race_config, strategy, record));
        })
        .context("spawning race thread")?;

    let outcome = match cli.wall_clock_limit {
        Some(secs) => {
            let limit = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid wall-clock limit {secs}"))?;
            match rx.recv_timeout(limit) {
                Ok(outcome) => outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    error!("Run exceeded the wall-clock limit of {secs} s");
                    println!("FAIL: wall-clock limit exceeded");
                    process::exit(EXIT_FAILURE);
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    anyhow::bail!("race thread exited without a result")
                }
            }
        }
        None => rx.recv().context("race thread exited without a result")?,
    };
    let (result, trace) = outcome?;

    if let (Some(path), Some(trace)) = (&cli.trace, trace) {
        fs::write(path, trace.to_json_lines()?)
            .with_context(|| format!("writing trace to {}", path.display()))?;
        info!("Wrote {} trace entries to {}", trace.entries.len(), path.display());
    }

    if cli.json {
        println!("{}", result.to_json()?);
    } else {
        println!("{}", result.ci_line());
    }

    process::exit(result.exit_code());
}
