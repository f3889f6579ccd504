//! Race judge: the fixed-timestep loop and its verdict state machine
//!
//! Each tick senses, asks the strategy, integrates, then judges the new pose.
//! Failure checks run before the finish check, so a robot that leaves the
//! band on the finish line is off track, not finished.

use std::collections::VecDeque;
use std::fmt;

use log::{info, trace, warn};
use serde::{Deserialize, Serialize};

use super::control::{ControlAdapter, Decision, STRATEGY_INTERFACE_VERSION, Strategy, StrategyInfo};
use super::observer::{NullObserver, RaceObserver, TickFrame};
use super::physics::{self, Command, PhysicsLimits, RobotState, SimTime};
use super::sensor::SensorArray;
use super::track::Track;
use crate::config::RaceConfig;
use crate::consts::OFF_TRACK_SENTINEL;
use crate::error::ConfigError;
use crate::report::RunResult;

/// State of a run; everything except `Running` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Running,
    Completed,
    OffTrack,
    Stalled,
    TimedOut,
    StrategyError,
}

impl Verdict {
    #[inline]
    pub fn is_terminal(self) -> bool {
        self != Verdict::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Running => "Running",
            Verdict::Completed => "Completed",
            Verdict::OffTrack => "OffTrack",
            Verdict::Stalled => "Stalled",
            Verdict::TimedOut => "TimedOut",
            Verdict::StrategyError => "StrategyError",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the stall check fired
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StallCause {
    /// Net progress over the window (lap fraction)
    NoProgress { net: f64, window: u32 },
    /// Consecutive ticks without an answer from the strategy
    BudgetOverruns(u32),
}

/// Everything the verdict of one tick depends on
#[derive(Debug, Clone, PartialEq)]
pub struct TickFacts {
    pub strategy_failure: Option<String>,
    pub state_finite: bool,
    pub lateral_offset: f64,
    pub half_width: f64,
    /// Size of a backward progress jump beyond the tolerance (lap fraction)
    pub backward_jump: Option<f64>,
    pub stall: Option<StallCause>,
    pub lap_complete: bool,
    pub elapsed: SimTime,
    pub time_limit: SimTime,
}

/// Terminal verdict for a tick, if any, with a human-readable reason
///
/// Checks run in a fixed order: strategy failure, divergence, off track,
/// progress discontinuity, stall, completion, timeout.
pub fn judge_tick(facts: &TickFacts) -> Option<(Verdict, String)> {
    if let Some(reason) = &facts.strategy_failure {
        return Some((Verdict::StrategyError, reason.clone()));
    }
    if !facts.state_finite {
        return Some((
            Verdict::OffTrack,
            "integrator diverged: robot state is no longer finite".into(),
        ));
    }
    if facts.lateral_offset.abs() > facts.half_width {
        let reason = if facts.lateral_offset.abs() >= OFF_TRACK_SENTINEL {
            "left the track: far outside the drivable band".to_string()
        } else {
            format!(
                "left the track: lateral offset {:.3} m exceeds half-width {:.3} m",
                facts.lateral_offset, facts.half_width
            )
        };
        return Some((Verdict::OffTrack, reason));
    }
    if let Some(jump) = facts.backward_jump {
        return Some((
            Verdict::OffTrack,
            format!("progress jumped backward by {jump:.3} of a lap (lapping ambiguity)"),
        ));
    }
    match facts.stall {
        Some(StallCause::BudgetOverruns(ticks)) => {
            return Some((
                Verdict::Stalled,
                format!("strategy missed its compute budget for {ticks} consecutive ticks"),
            ));
        }
        Some(StallCause::NoProgress { net, window }) => {
            return Some((
                Verdict::Stalled,
                format!("net progress of {net:.4} of a lap over the last {window} ticks"),
            ));
        }
        None => {}
    }
    if facts.lap_complete {
        return Some((
            Verdict::Completed,
            format!("completed the lap in {:.4} s", facts.elapsed.as_secs()),
        ));
    }
    if facts.elapsed >= facts.time_limit {
        return Some((
            Verdict::TimedOut,
            format!("time limit of {:.1} s reached", facts.time_limit.as_secs()),
        ));
    }
    None
}

/// Unwraps lap progress so laps and backward motion add up
#[derive(Debug, Clone)]
pub struct LapTracker {
    last: f64,
    unwrapped: f64,
    start_neighborhood: f64,
    left_start: bool,
}

impl LapTracker {
    pub fn new(initial_progress: f64, start_neighborhood: f64) -> Self {
        Self {
            last: initial_progress,
            unwrapped: 0.0,
            start_neighborhood,
            left_start: false,
        }
    }

    /// Feed the latest progress in [0, 1); returns the wrapped delta
    pub fn update(&mut self, progress: f64) -> f64 {
        let mut delta = progress - self.last;
        if delta > 0.5 {
            delta -= 1.0;
        } else if delta < -0.5 {
            delta += 1.0;
        }
        self.last = progress;
        self.unwrapped += delta;
        if self.unwrapped >= self.start_neighborhood {
            self.left_start = true;
        }
        delta
    }

    /// Net progress since the start (lap fractions)
    pub fn unwrapped(&self) -> f64 {
        self.unwrapped
    }

    /// A full loop after having left the start neighbourhood
    pub fn lap_complete(&self) -> bool {
        self.left_start && self.unwrapped >= 1.0
    }
}

/// Net progress over a sliding window of ticks
#[derive(Debug, Clone)]
pub struct StallDetector {
    window: u32,
    epsilon: f64,
    history: VecDeque<f64>,
}

impl StallDetector {
    pub fn new(window: u32, epsilon: f64) -> Self {
        Self {
            window,
            epsilon,
            history: VecDeque::new(),
        }
    }

    pub fn push(&mut self, unwrapped: f64) {
        self.history.push_back(unwrapped);
        if self.history.len() > self.window as usize + 1 {
            self.history.pop_front();
        }
    }

    /// Net progress over the window once it has filled up
    pub fn check(&self) -> Option<StallCause> {
        if self.history.len() <= self.window as usize {
            return None;
        }
        let (first, last) = (self.history.front()?, self.history.back()?);
        let net = last - first;
        (net < self.epsilon).then_some(StallCause::NoProgress {
            net,
            window: self.window,
        })
    }
}

/// Owns everything a single run needs; one robot, one track
pub struct RaceJudge {
    track: Track,
    sensors: SensorArray,
    control: ControlAdapter,
    limits: PhysicsLimits,
    tick_duration: SimTime,
    dt: f64,
    time_limit: SimTime,
    state: RobotState,
    ticks: u64,
    verdict: Verdict,
    reason: Option<String>,
    lap: LapTracker,
    stall: StallDetector,
    stall_window: u32,
    consecutive_overruns: u32,
    progress_jump_epsilon: f64,
}

impl RaceJudge {
    /// Generate the configured track and set up a run
    pub fn from_config(config: &RaceConfig, strategy: Box<dyn Strategy>) -> Result<Self, ConfigError> {
        config.validate()?;
        let track = Track::generate(&config.track)?;
        Self::new(config, track, strategy)
    }

    /// Set up a run on an already generated track; the robot starts at rest on the start line
    pub fn new(
        config: &RaceConfig,
        track: Track,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mounts = config.sensors.mounts();
        let noise_seed = config.sensors.noise_seed.unwrap_or(config.track.track_seed);
        let sensors = SensorArray::new(
            mounts.clone(),
            config.sensors.response,
            config.sensors.noise_std_dev,
            noise_seed,
        )?;

        let limits = config.physics.limits();
        let tick_duration = config.physics.tick()?;
        let time_limit = config.judge.time_limit()?;

        let info = StrategyInfo {
            interface_version: STRATEGY_INTERFACE_VERSION,
            mounts,
            response: config.sensors.response,
            tick_duration: tick_duration.as_secs(),
            limits,
        };
        let control = ControlAdapter::new(strategy, info, &config.control)?;

        let (position, heading) = track.start_pose();
        let state = RobotState::at_rest(position, heading);
        let lap = LapTracker::new(track.progress(position), config.judge.start_neighborhood);
        let mut stall = StallDetector::new(
            config.judge.stall_window_ticks,
            config.judge.stall_progress_epsilon,
        );
        stall.push(lap.unwrapped());

        info!(
            "Race set up: track length {:.3} m (seed {}), tick {} ns, time limit {:.1} s, {} sensors",
            track.length(),
            track.seed(),
            tick_duration.as_nanos(),
            time_limit.as_secs(),
            sensors.len()
        );

        Ok(Self {
            track,
            sensors,
            control,
            limits,
            tick_duration,
            dt: tick_duration.as_secs(),
            time_limit,
            state,
            ticks: 0,
            verdict: Verdict::Running,
            reason: None,
            lap,
            stall,
            stall_window: config.judge.stall_window_ticks,
            consecutive_overruns: 0,
            progress_jump_epsilon: config.judge.progress_jump_epsilon,
        })
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Simulated time so far
    pub fn elapsed(&self) -> SimTime {
        self.tick_duration.times(self.ticks)
    }

    /// Advance one tick without an observer
    pub fn tick(&mut self) -> Verdict {
        self.tick_observed(&mut NullObserver)
    }

    /// Advance one tick; does nothing once the verdict is terminal
    pub fn tick_observed(&mut self, observer: &mut dyn RaceObserver) -> Verdict {
        if self.verdict.is_terminal() {
            return self.verdict;
        }

        let tick = self.ticks + 1;
        let observation = self.sensors.sense(&self.track, &self.state);
        let (command, strategy_failure) = match self.control.decide(tick, observation.clone()) {
            Decision::Command(command) => {
                self.consecutive_overruns = 0;
                (command, None)
            }
            Decision::Overrun => {
                self.consecutive_overruns += 1;
                (Command::STOP, None)
            }
            Decision::Failed(reason) => {
                warn!("Tick {tick}: {reason}");
                (Command::STOP, Some(reason))
            }
        };

        self.state = physics::step(&self.state, &command, &self.limits, self.dt);
        self.ticks = tick;
        let elapsed = self.elapsed();

        let state_finite = self.state.is_finite();
        let (lateral_offset, backward_jump) = if state_finite {
            let offset = self.track.lateral_offset(self.state.position);
            let delta = self.lap.update(self.track.progress(self.state.position));
            self.stall.push(self.lap.unwrapped());
            let jump = (delta < -self.progress_jump_epsilon).then_some(-delta);
            (offset, jump)
        } else {
            (OFF_TRACK_SENTINEL, None)
        };

        let stall = if self.consecutive_overruns >= self.stall_window {
            Some(StallCause::BudgetOverruns(self.consecutive_overruns))
        } else {
            self.stall.check()
        };

        let facts = TickFacts {
            strategy_failure,
            state_finite,
            lateral_offset,
            half_width: self.track.half_width(),
            backward_jump,
            stall,
            lap_complete: self.lap.lap_complete(),
            elapsed,
            time_limit: self.time_limit,
        };

        if let Some((verdict, reason)) = judge_tick(&facts) {
            info!(
                "Tick {tick} ({:.4} s): {verdict} - {reason}",
                elapsed.as_secs()
            );
            self.verdict = verdict;
            self.reason = Some(reason);
        } else {
            trace!(
                "Tick {tick}: pos ({:.4}, {:.4}) offset {:.4} progress {:.5}",
                self.state.position.x,
                self.state.position.y,
                lateral_offset,
                self.lap.unwrapped()
            );
        }

        observer.on_tick(&TickFrame {
            tick,
            elapsed: elapsed.as_secs(),
            observation: &observation,
            command,
            state: &self.state,
            lateral_offset,
            unwrapped_progress: self.lap.unwrapped(),
            verdict: self.verdict,
        });

        self.verdict
    }

    /// Run to a terminal verdict
    pub fn run(self) -> RunResult {
        self.run_observed(&mut NullObserver)
    }

    /// Run to a terminal verdict, showing every tick to `observer`
    pub fn run_observed(mut self, observer: &mut dyn RaceObserver) -> RunResult {
        while !self.tick_observed(observer).is_terminal() {}
        self.result()
    }

    /// Snapshot of the run so far
    pub fn result(&self) -> RunResult {
        let elapsed = self.elapsed().as_secs();
        RunResult {
            verdict: self.verdict,
            reason: self
                .reason
                .clone()
                .unwrap_or_else(|| "race still running".to_string()),
            ticks: self.ticks,
            elapsed_secs: elapsed,
            race_time_secs: (self.verdict == Verdict::Completed).then_some(elapsed),
            track_seed: self.track.seed(),
            track_length: self.track.length(),
            budget_overruns: self.control.overruns(),
        }
    }
}
