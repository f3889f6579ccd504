//! Contestant strategy interface and the adapter that time-boxes it
//!
//! The judge never calls a strategy directly. Every call goes through
//! [`ControlAdapter`], which catches panics and errors, rejects non-finite
//! commands and enforces the per-tick compute budget.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;
use serde::{Deserialize, Serialize};

use super::physics::{Command, PhysicsLimits};
use super::sensor::{Observation, SensorMount, SensorResponse};
use crate::config::ControlConfig;
use crate::error::ConfigError;

/// Bumped whenever `Observation`, `Command` or `Strategy` change shape
pub const STRATEGY_INTERFACE_VERSION: u32 = 1;

/// Static facts about the run, handed to the strategy once before the first tick
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub interface_version: u32,
    /// Sensor mounts in reading order
    pub mounts: Vec<SensorMount>,
    pub response: SensorResponse,
    /// Tick duration (seconds)
    pub tick_duration: f64,
    pub limits: PhysicsLimits,
}

/// What a contestant implements
pub trait Strategy: Send {
    /// Called once before the first tick
    fn init(&mut self, _info: &StrategyInfo) {}

    /// Choose a command for the current observation
    fn decide(&mut self, observation: &Observation) -> anyhow::Result<Command>;
}

impl<F> Strategy for F
where
    F: FnMut(&Observation) -> anyhow::Result<Command> + Send,
{
    fn decide(&mut self, observation: &Observation) -> anyhow::Result<Command> {
        self(observation)
    }
}

/// Where the strategy runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// On the judge thread; overruns are detected after the call returns
    Inline,
    /// On a worker thread; the judge stops waiting once the budget runs out
    #[default]
    Watchdog,
}

/// Outcome of asking the strategy for one tick's command
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Command(Command),
    /// No answer within the budget; the tick runs with a stop command
    Overrun,
    /// Strategy error, panic, non-finite command or lost worker
    Failed(String),
}

struct Request {
    tick: u64,
    observation: Observation,
}

struct Response {
    tick: u64,
    outcome: Result<Command, String>,
}

enum Backend {
    Inline {
        strategy: Box<dyn Strategy>,
        init_error: Option<String>,
    },
    Watchdog {
        /// Dropped with the adapter so the worker exits after its current call
        requests: Sender<Request>,
        responses: Receiver<Response>,
        in_flight: Option<u64>,
    },
}

/// Time-boxed, failure-isolating wrapper around a strategy
pub struct ControlAdapter {
    backend: Backend,
    budget: Duration,
    overruns: u64,
}

impl ControlAdapter {
    pub fn new(
        mut strategy: Box<dyn Strategy>,
        info: StrategyInfo,
        config: &ControlConfig,
    ) -> Result<Self, ConfigError> {
        if config.decision_budget_ms == 0 {
            return Err(ConfigError::invalid(
                "decision_budget_ms",
                "must be at least 1 ms",
            ));
        }
        let budget = Duration::from_millis(config.decision_budget_ms);

        let backend = match config.mode {
            ControlMode::Inline => {
                let init_error = guarded(|| strategy.init(&info)).err();
                Backend::Inline {
                    strategy,
                    init_error,
                }
            }
            ControlMode::Watchdog => {
                let (requests, request_rx) = mpsc::channel::<Request>();
                let (response_tx, responses) = mpsc::channel::<Response>();
                // The handle is dropped: a strategy stuck in an endless loop cannot be
                // joined, and the external wall-clock cap covers that case.
                thread::Builder::new()
                    .name("strategy".into())
                    .spawn(move || run_worker(strategy, info, request_rx, response_tx))
                    .map_err(ConfigError::Worker)?;
                Backend::Watchdog {
                    requests,
                    responses,
                    in_flight: None,
                }
            }
        };

        Ok(Self {
            backend,
            budget,
            overruns: 0,
        })
    }

    /// Total ticks where the strategy missed its budget
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Ask the strategy for the command of `tick`
    pub fn decide(&mut self, tick: u64, observation: Observation) -> Decision {
        let decision = match &mut self.backend {
            Backend::Inline {
                strategy,
                init_error,
            } => {
                if let Some(err) = init_error {
                    return Decision::Failed(format!("strategy init panicked: {err}"));
                }
                let started = Instant::now();
                let outcome = call_strategy(strategy.as_mut(), &observation);
                // A failure is reported even when it also came in late
                if outcome.is_ok() && started.elapsed() > self.budget {
                    Decision::Overrun
                } else {
                    into_decision(outcome)
                }
            }
            Backend::Watchdog {
                requests,
                responses,
                in_flight,
            } => {
                watchdog_decide(requests, responses, in_flight, self.budget, tick, observation)
            }
        };

        if decision == Decision::Overrun {
            self.overruns += 1;
            warn!("Tick {tick}: strategy exceeded its {:?} budget", self.budget);
        }
        decision
    }
}

fn watchdog_decide(
    requests: &Sender<Request>,
    responses: &Receiver<Response>,
    in_flight: &mut Option<u64>,
    budget: Duration,
    tick: u64,
    observation: Observation,
) -> Decision {
    // Answers that arrive after their deadline are discarded
    loop {
        match responses.try_recv() {
            Ok(late) => {
                if *in_flight == Some(late.tick) {
                    *in_flight = None;
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                return Decision::Failed("strategy worker exited".into());
            }
        }
    }

    // Still computing an older tick
    if in_flight.is_some() {
        return Decision::Overrun;
    }

    if requests.send(Request { tick, observation }).is_err() {
        return Decision::Failed("strategy worker exited".into());
    }
    *in_flight = Some(tick);

    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match responses.recv_timeout(remaining) {
            Ok(response) if response.tick == tick => {
                *in_flight = None;
                return into_decision(response.outcome);
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => return Decision::Overrun,
            Err(RecvTimeoutError::Disconnected) => {
                return Decision::Failed("strategy worker exited".into());
            }
        }
    }
}

fn run_worker(
    mut strategy: Box<dyn Strategy>,
    info: StrategyInfo,
    requests: Receiver<Request>,
    responses: Sender<Response>,
) {
    let init_error = guarded(|| strategy.init(&info)).err();

    for request in requests {
        let outcome = match &init_error {
            Some(err) => Err(format!("strategy init panicked: {err}")),
            None => call_strategy(strategy.as_mut(), &request.observation),
        };
        let response = Response {
            tick: request.tick,
            outcome,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
}

fn call_strategy(strategy: &mut dyn Strategy, observation: &Observation) -> Result<Command, String> {
    match guarded(|| strategy.decide(observation)) {
        Ok(Ok(command)) => Ok(command),
        Ok(Err(err)) => Err(format!("strategy error: {err:#}")),
        Err(panic) => Err(format!("strategy panicked: {panic}")),
    }
}

fn into_decision(outcome: Result<Command, String>) -> Decision {
    match outcome {
        Ok(command) if command.is_finite() => Decision::Command(command),
        Ok(command) => Decision::Failed(format!("strategy returned a non-finite command: {command:?}")),
        Err(err) => Decision::Failed(err),
    }
}

/// Run `f`, turning a panic into its message
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
