//! Deterministic simulation module
//!
//! Everything that decides a race lives here. This module must be pure and
//! deterministic:
//! - Fixed-point timestep only (never the wall clock)
//! - Seeded RNG only
//! - Stable iteration order (sensor mounts, centerline segments)
//! - No file, terminal or network I/O
//!
//! The one exception is the control adapter's watchdog, which measures real
//! time to bound how long a strategy may think. A late answer only ever turns
//! into a stop command for that tick.

pub mod control;
pub mod judge;
pub mod observer;
pub mod physics;
pub mod sensor;
pub mod strategies;
pub mod track;

pub use control::{
    ControlAdapter, ControlMode, Decision, STRATEGY_INTERFACE_VERSION, Strategy, StrategyInfo,
};
pub use judge::{RaceJudge, Verdict, judge_tick};
pub use observer::{NullObserver, RaceObserver, TickFrame, TraceEntry, TraceRecorder};
pub use physics::{Command, IntegratorKind, PhysicsLimits, RobotState, SimTime, step};
pub use sensor::{Observation, SensorArray, SensorMount, SensorResponse, sense};
pub use strategies::{CenterlineOracle, ConstantCommand, Idle, LineFollower};
pub use track::{Projection, Track, TrackShape};
