//! Differential-drive robot physics
//!
//! Commands are clamped to the robot's physical limits before integrating, and
//! time always advances by a fixed-point tick so runs replay bit-for-bit.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{heading_vector, normalize_angle};

const NANOS_PER_SEC: f64 = 1.0e9;

/// Simulated time in whole nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    /// Convert seconds to the nearest nanosecond
    pub fn from_secs(name: &'static str, secs: f64) -> Result<Self, ConfigError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::invalid(
                name,
                format!("must be finite and positive, got {secs}"),
            ));
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos < 1.0 || nanos > u64::MAX as f64 {
            return Err(ConfigError::invalid(
                name,
                format!("{secs} s is not representable in whole nanoseconds"),
            ));
        }
        Ok(SimTime(nanos as u64))
    }

    #[inline]
    pub fn as_secs(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    #[inline]
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time after `ticks` ticks of this duration
    #[inline]
    pub fn times(self, ticks: u64) -> SimTime {
        SimTime(self.0.saturating_mul(ticks))
    }
}

/// Pose and velocity of the robot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub position: DVec2,
    /// Heading (radians, normalized to [-π, π))
    pub heading: f64,
    /// Forward speed (m/s)
    pub linear_velocity: f64,
    /// Yaw rate (rad/s, counter-clockwise positive)
    pub angular_velocity: f64,
}

impl RobotState {
    /// Robot at rest at the given pose
    pub fn at_rest(position: DVec2, heading: f64) -> Self {
        Self {
            position,
            heading: normalize_angle(heading),
            linear_velocity: 0.0,
            angular_velocity: 0.0,
        }
    }

    /// False once any component has diverged to NaN or infinity
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.heading.is_finite()
            && self.linear_velocity.is_finite()
            && self.angular_velocity.is_finite()
    }

    /// World position of a point given in the robot frame (forward, left)
    pub fn to_world(&self, forward: f64, lateral: f64) -> DVec2 {
        let fwd = heading_vector(self.heading);
        let left = fwd.perp();
        self.position + fwd * forward + left * lateral
    }
}

/// Control output of a strategy for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Wheel surface speeds (m/s)
    Wheels { left: f64, right: f64 },
    /// Body velocities (m/s, rad/s)
    Twist { linear: f64, angular: f64 },
}

impl Command {
    /// Both wheels stopped
    pub const STOP: Command = Command::Wheels {
        left: 0.0,
        right: 0.0,
    };

    pub fn wheels(left: f64, right: f64) -> Self {
        Command::Wheels { left, right }
    }

    pub fn twist(linear: f64, angular: f64) -> Self {
        Command::Twist { linear, angular }
    }

    /// True when every component is a real number
    pub fn is_finite(&self) -> bool {
        match *self {
            Command::Wheels { left, right } => left.is_finite() && right.is_finite(),
            Command::Twist { linear, angular } => linear.is_finite() && angular.is_finite(),
        }
    }

    /// Wheel speeds for a chassis with the given wheel base
    pub fn wheel_speeds(&self, wheel_base: f64) -> (f64, f64) {
        match *self {
            Command::Wheels { left, right } => (left, right),
            Command::Twist { linear, angular } => {
                let half = angular * wheel_base / 2.0;
                (linear - half, linear + half)
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::STOP
    }
}

/// Pose integration scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorKind {
    /// Move along the heading at the start of the tick
    Euler,
    /// Move along the heading at the middle of the tick
    #[default]
    Midpoint,
}

/// Physical limits of the robot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsLimits {
    /// Distance between the wheels (m)
    pub wheel_base: f64,
    /// Maximum surface speed of either wheel (m/s)
    pub max_wheel_speed: f64,
    /// Maximum change in forward speed (m/s²)
    pub max_linear_accel: f64,
    /// Maximum change in yaw rate (rad/s²)
    pub max_angular_accel: f64,
    pub integrator: IntegratorKind,
}

/// Advance the robot by one tick of `dt` seconds
pub fn step(state: &RobotState, command: &Command, limits: &PhysicsLimits, dt: f64) -> RobotState {
    let command = if command.is_finite() {
        *command
    } else {
        Command::STOP
    };

    let (left, right) = command.wheel_speeds(limits.wheel_base);
    let max = limits.max_wheel_speed;
    let (left, right) = (left.clamp(-max, max), right.clamp(-max, max));

    let target_linear = (left + right) / 2.0;
    let target_angular = (right - left) / limits.wheel_base;

    let max_dv = limits.max_linear_accel * dt;
    let max_dw = limits.max_angular_accel * dt;
    let linear = state.linear_velocity
        + (target_linear - state.linear_velocity).clamp(-max_dv, max_dv);
    let angular = state.angular_velocity
        + (target_angular - state.angular_velocity).clamp(-max_dw, max_dw);

    let dtheta = angular * dt;
    let travel_heading = match limits.integrator {
        IntegratorKind::Euler => state.heading,
        IntegratorKind::Midpoint => state.heading + dtheta / 2.0,
    };

    RobotState {
        position: state.position + heading_vector(travel_heading) * (linear * dt),
        heading: normalize_angle(state.heading + dtheta),
        linear_velocity: linear,
        angular_velocity: angular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{PI, TAU};

    fn limits() -> PhysicsLimits {
        PhysicsLimits {
            wheel_base: 0.15,
            max_wheel_speed: 2.0,
            max_linear_accel: 1000.0,
            max_angular_accel: 1000.0,
            integrator: IntegratorKind::Midpoint,
        }
    }

    #[test]
    fn test_straight_line() {
        let mut state = RobotState::at_rest(DVec2::ZERO, 0.0);
        for _ in 0..100 {
            state = step(&state, &Command::wheels(1.0, 1.0), &limits(), 0.01);
        }
        assert!((state.position.x - 1.0).abs() < 1e-9);
        assert!(state.position.y.abs() < 1e-12);
        assert_eq!(state.heading, 0.0);
    }

    #[test]
    fn test_wheel_speed_clamped() {
        let state = RobotState::at_rest(DVec2::ZERO, 0.0);
        let next = step(&state, &Command::wheels(50.0, 50.0), &limits(), 0.1);
        assert_eq!(next.linear_velocity, 2.0);
        assert!((next.position.x - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_acceleration_limited() {
        let limits = PhysicsLimits {
            max_linear_accel: 1.0,
            max_angular_accel: 2.0,
            ..limits()
        };
        let state = RobotState::at_rest(DVec2::ZERO, 0.0);
        let next = step(&state, &Command::twist(2.0, 10.0), &limits, 0.1);
        assert!((next.linear_velocity - 0.1).abs() < 1e-12);
        assert!((next.angular_velocity - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_twist_round_trips_through_wheels() {
        let (left, right) = Command::twist(1.0, 2.0).wheel_speeds(0.2);
        assert!((left - 0.8).abs() < 1e-12);
        assert!((right - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_spin_in_place() {
        let mut state = RobotState::at_rest(DVec2::new(1.0, 1.0), 0.0);
        // One full turn at PI rad/s takes 2 s
        for _ in 0..200 {
            state = step(&state, &Command::twist(0.0, PI), &limits(), 0.01);
        }
        assert!((state.position - DVec2::new(1.0, 1.0)).length() < 1e-12);
        assert!(state.heading.abs() < 1e-9);
    }

    #[test]
    fn test_midpoint_follows_circle() {
        // v = 1 m/s, w = 1 rad/s traces a unit circle
        let mut state = RobotState::at_rest(DVec2::new(0.0, -1.0), 0.0);
        state.linear_velocity = 1.0;
        state.angular_velocity = 1.0;
        let steps = 1000;
        let dt = TAU / steps as f64;
        for _ in 0..steps {
            state = step(&state, &Command::twist(1.0, 1.0), &limits(), dt);
            assert!((state.position.length() - 1.0).abs() < 1e-3);
        }
        assert!((state.position - DVec2::new(0.0, -1.0)).length() < 1e-3);
    }

    #[test]
    fn test_non_finite_command_stops() {
        let mut state = RobotState::at_rest(DVec2::ZERO, 0.0);
        state.linear_velocity = 1.0;
        let next = step(&state, &Command::wheels(f64::NAN, 1.0), &limits(), 0.01);
        assert!(next.is_finite());
        assert_eq!(next.linear_velocity, 0.0);
    }

    #[test]
    fn test_extreme_yaw_rate_keeps_heading_in_range() {
        let limits = PhysicsLimits {
            wheel_base: 1e-12,
            max_angular_accel: 1e30,
            ..limits()
        };
        let mut state = RobotState::at_rest(DVec2::ZERO, 0.0);
        for _ in 0..10 {
            state = step(&state, &Command::wheels(1.0, -1.0), &limits, 0.02);
            assert!((-PI..PI).contains(&state.heading));
        }
        assert!(state.position.length() < 1e-9);
    }

    #[test]
    fn test_sim_time_fixed_point() {
        let dt = SimTime::from_secs("tick", 0.02).unwrap();
        assert_eq!(dt.as_nanos(), 20_000_000);
        assert_eq!(dt.times(50).as_nanos(), 1_000_000_000);
        assert!(SimTime::from_secs("tick", 1e-12).is_err());
        assert!(SimTime::from_secs("tick", -1.0).is_err());
    }
}
