//! Line Follower - a line-following robot simulator and race judge
//!
//! Core modules:
//! - `sim`: Deterministic simulation (track, sensors, physics, control, judge)
//! - `config`: Run configuration loaded from JSON
//! - `report`: Immutable run results for the CI/leaderboard tooling
//! - `error`: Configuration-time failures

pub mod config;
pub mod error;
pub mod report;
pub mod sim;

pub use config::RaceConfig;
pub use error::ConfigError;
pub use report::RunResult;

use glam::DVec2;

/// Default run parameters
pub mod consts {
    /// Fixed simulation timestep (60 Hz)
    pub const DEFAULT_TICK_DURATION: f64 = 1.0 / 60.0;
    /// Simulated race budget (5 minutes)
    pub const DEFAULT_TIME_LIMIT: f64 = 300.0;

    /// Track defaults (metres)
    pub const DEFAULT_TRACK_SEED: u64 = 42;
    pub const DEFAULT_HALF_WIDTH: f64 = 0.15;
    pub const DEFAULT_MIN_CURVATURE_RADIUS: f64 = 0.3;
    pub const DEFAULT_SAMPLE_SPACING: f64 = 0.01;
    pub const DEFAULT_BASE_RADIUS: f64 = 2.0;

    /// Robot defaults - small differential-drive chassis
    pub const DEFAULT_WHEEL_BASE: f64 = 0.15;
    pub const DEFAULT_MAX_WHEEL_SPEED: f64 = 2.0;
    pub const DEFAULT_MAX_LINEAR_ACCEL: f64 = 10.0;
    pub const DEFAULT_MAX_ANGULAR_ACCEL: f64 = 60.0;

    /// Sensor bar defaults
    pub const DEFAULT_SENSOR_COUNT: usize = 5;
    pub const DEFAULT_BAR_FORWARD: f64 = 0.1;
    pub const DEFAULT_BAR_SPACING: f64 = 0.03;

    /// Judge defaults
    pub const DEFAULT_STALL_WINDOW_TICKS: u32 = 180;
    pub const DEFAULT_STALL_PROGRESS_EPSILON: f64 = 0.002;
    pub const DEFAULT_START_NEIGHBORHOOD: f64 = 0.05;
    pub const DEFAULT_PROGRESS_JUMP_EPSILON: f64 = 0.1;

    /// Per-tick compute allowance for the contestant strategy
    pub const DEFAULT_DECISION_BUDGET_MS: u64 = 50;

    /// Returned by `Track::lateral_offset` for points outside any segment's influence
    pub const OFF_TRACK_SENTINEL: f64 = 1.0e6;
}

/// Normalized angle to [-π, π)
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // Rounding can land exactly on +π
    if wrapped >= PI { wrapped - TAU } else { wrapped }
}

/// Convert polar (r, theta) to cartesian (x, y)
#[inline]
pub fn polar_to_cartesian(r: f64, theta: f64) -> DVec2 {
    DVec2::new(r * theta.cos(), r * theta.sin())
}

/// Unit vector pointing along `heading`
#[inline]
pub fn heading_vector(heading: f64) -> DVec2 {
    DVec2::new(heading.cos(), heading.sin())
}
