//! Built-in strategies
//!
//! Reference drivers used by the command-line runner and the tests. They only
//! see what a contestant sees: the observation and the `StrategyInfo`.

use serde::{Deserialize, Serialize};

use super::control::{Strategy, StrategyInfo};
use super::physics::Command;
use super::sensor::Observation;

/// Never moves
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Strategy for Idle {
    fn decide(&mut self, _observation: &Observation) -> anyhow::Result<Command> {
        Ok(Command::STOP)
    }
}

/// Sends the same command every tick
#[derive(Debug, Clone, Copy)]
pub struct ConstantCommand(pub Command);

impl Strategy for ConstantCommand {
    fn decide(&mut self, _observation: &Observation) -> anyhow::Result<Command> {
        Ok(self.0)
    }
}

/// Steers toward the centroid of the sensors that see the line
///
/// Slows down in proportion to how hard it is turning, and keeps its last
/// steering while the line is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineFollower {
    /// Speed on straights (m/s)
    pub base_speed: f64,
    /// Speed at full steering (m/s)
    pub min_speed: f64,
    /// Speed while no sensor sees the line (m/s)
    pub search_speed: f64,
    /// Yaw rate at full steering (rad/s)
    pub max_turn_rate: f64,
    #[serde(skip)]
    laterals: Vec<f64>,
    #[serde(skip)]
    steering: f64,
}

impl Default for LineFollower {
    fn default() -> Self {
        Self {
            base_speed: 1.0,
            min_speed: 0.3,
            search_speed: 0.2,
            max_turn_rate: 4.0,
            laterals: Vec::new(),
            steering: 0.0,
        }
    }
}

impl LineFollower {
    fn max_lateral(&self) -> f64 {
        self.laterals.iter().fold(0.0_f64, |m, l| m.max(l.abs()))
    }
}

impl Strategy for LineFollower {
    fn init(&mut self, info: &StrategyInfo) {
        self.laterals = info.mounts.iter().map(|m| m.lateral).collect();
    }

    fn decide(&mut self, observation: &Observation) -> anyhow::Result<Command> {
        let (weighted, total) = observation
            .readings
            .iter()
            .zip(&self.laterals)
            .fold((0.0, 0.0), |(w, t), (r, lat)| {
                let r = r.max(0.0);
                (w + r * lat, t + r)
            });

        if total <= f64::EPSILON {
            return Ok(Command::twist(
                self.search_speed,
                self.steering * self.max_turn_rate,
            ));
        }

        let reach = self.max_lateral();
        // Centroid is where the line sits in the robot frame; positive means turn left
        self.steering = if reach > 0.0 {
            (weighted / total / reach).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let speed = self.base_speed - self.steering.abs() * (self.base_speed - self.min_speed);
        Ok(Command::twist(speed, self.steering * self.max_turn_rate))
    }
}

/// Proportional control on a signed centerline sensor at a fixed speed
///
/// Expects `Signed` readings; their mean is used as the normalized offset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CenterlineOracle {
    /// Forward speed (m/s)
    pub speed: f64,
    /// Yaw rate per unit of normalized offset (rad/s)
    pub gain: f64,
}

impl CenterlineOracle {
    pub fn new(speed: f64) -> Self {
        Self { speed, gain: 20.0 }
    }
}

impl Strategy for CenterlineOracle {
    fn decide(&mut self, observation: &Observation) -> anyhow::Result<Command> {
        if observation.readings.is_empty() {
            anyhow::bail!("oracle needs at least one sensor");
        }
        let offset =
            observation.readings.iter().sum::<f64>() / observation.readings.len() as f64;
        // A positive offset means the sensor is left of the line, so turn right
        Ok(Command::twist(self.speed, -self.gain * offset))
    }
}
