//! Line sensor array
//!
//! Each sensor sits at a fixed offset in the robot frame and reports how close
//! it is to the centerline through a configurable response curve.

use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use super::physics::RobotState;
use super::track::Track;
use crate::error::{ConfigError, require_non_negative, require_positive};

/// Sensor position in the robot frame (metres)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorMount {
    /// Distance ahead of the wheel axle
    pub forward: f64,
    /// Distance to the left of the robot's center line
    pub lateral: f64,
}

impl SensorMount {
    pub fn new(forward: f64, lateral: f64) -> Self {
        Self { forward, lateral }
    }

    /// Evenly spaced bar of `count` sensors, ordered left to right
    pub fn bar(count: usize, forward: f64, spacing: f64) -> Vec<SensorMount> {
        let center = (count as f64 - 1.0) / 2.0;
        (0..count)
            .map(|i| SensorMount::new(forward, (center - i as f64) * spacing))
            .collect()
    }

    /// `rows` bars stacked ahead of the robot, like a downward camera patch
    ///
    /// The nearest row sits at `forward`; each further row is `spacing` beyond
    /// the previous one. Readings come row by row, each row left to right.
    pub fn grid(rows: usize, cols: usize, forward: f64, spacing: f64) -> Vec<SensorMount> {
        (0..rows)
            .flat_map(|row| SensorMount::bar(cols, forward + row as f64 * spacing, spacing))
            .collect()
    }
}

/// Maps a lateral offset to a reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorResponse {
    /// 1.0 when within `threshold` of the centerline, else 0.0
    Binary { threshold: f64 },
    /// Falls linearly from 1.0 on the centerline to 0.0 at `range`
    Linear { range: f64 },
    /// Offset scaled by `range` and clamped to [-1, 1] (positive = line is to the right)
    Signed { range: f64 },
}

impl SensorResponse {
    pub fn apply(&self, offset: f64) -> f64 {
        match *self {
            SensorResponse::Binary { threshold } => {
                if offset.abs() <= threshold {
                    1.0
                } else {
                    0.0
                }
            }
            SensorResponse::Linear { range } => (1.0 - offset.abs() / range).clamp(0.0, 1.0),
            SensorResponse::Signed { range } => (offset / range).clamp(-1.0, 1.0),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            SensorResponse::Binary { threshold } => require_non_negative("threshold", threshold),
            SensorResponse::Linear { range } | SensorResponse::Signed { range } => {
                require_positive("range", range)
            }
        }
    }
}

/// Readings handed to the strategy for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// One reading per sensor mount, in mount order
    pub readings: Vec<f64>,
    /// Robot's current forward speed (m/s)
    pub linear_velocity: f64,
    /// Robot's current yaw rate (rad/s)
    pub angular_velocity: f64,
}

impl Observation {
    /// Whether sensor `index` sees the line (reading above one half)
    pub fn line_detected(&self, index: usize) -> bool {
        self.readings.get(index).is_some_and(|r| *r > 0.5)
    }

    /// True if any sensor sees the line
    pub fn any_detected(&self) -> bool {
        (0..self.readings.len()).any(|i| self.line_detected(i))
    }
}

/// Noise-free sensing; a pure function of the track and the robot pose
pub fn sense(
    track: &Track,
    state: &RobotState,
    mounts: &[SensorMount],
    response: &SensorResponse,
) -> Observation {
    let readings = mounts
        .iter()
        .map(|m| response.apply(track.lateral_offset(state.to_world(m.forward, m.lateral))))
        .collect();
    Observation {
        readings,
        linear_velocity: state.linear_velocity,
        angular_velocity: state.angular_velocity,
    }
}

/// Sensor geometry plus seeded measurement noise
#[derive(Debug, Clone)]
pub struct SensorArray {
    mounts: Vec<SensorMount>,
    response: SensorResponse,
    noise: Option<Normal<f64>>,
    rng: Pcg32,
}

impl SensorArray {
    /// `noise_std_dev` is in metres of lateral offset; zero disables noise
    pub fn new(
        mounts: Vec<SensorMount>,
        response: SensorResponse,
        noise_std_dev: f64,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        if mounts.is_empty() {
            return Err(ConfigError::invalid("sensor_count", "at least one sensor is required"));
        }
        if mounts
            .iter()
            .any(|m| !m.forward.is_finite() || !m.lateral.is_finite())
        {
            return Err(ConfigError::invalid("sensor_offsets", "offsets must be finite"));
        }
        response.validate()?;
        require_non_negative("noise_std_dev", noise_std_dev)?;

        let noise = if noise_std_dev > 0.0 {
            let normal = Normal::new(0.0, noise_std_dev)
                .map_err(|e| ConfigError::invalid("noise_std_dev", e.to_string()))?;
            Some(normal)
        } else {
            None
        };

        Ok(Self {
            mounts,
            response,
            noise,
            rng: Pcg32::seed_from_u64(seed),
        })
    }

    pub fn mounts(&self) -> &[SensorMount] {
        &self.mounts
    }

    pub fn response(&self) -> SensorResponse {
        self.response
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Read every sensor at the current pose
    ///
    /// With noise enabled one sample is drawn per sensor per call, so the
    /// sequence of observations depends only on the seed and the poses.
    pub fn sense(&mut self, track: &Track, state: &RobotState) -> Observation {
        let Some(noise) = self.noise else {
            return sense(track, state, &self.mounts, &self.response);
        };

        let readings = self
            .mounts
            .iter()
            .map(|m| {
                let offset = track.lateral_offset(state.to_world(m.forward, m.lateral));
                self.response.apply(offset + noise.sample(&mut self.rng))
            })
            .collect();
        Observation {
            readings,
            linear_velocity: state.linear_velocity,
            angular_velocity: state.angular_velocity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;
    use crate::sim::track::TrackShape;
    use glam::DVec2;

    fn stadium() -> Track {
        Track::generate(&TrackConfig {
            shape: TrackShape::Stadium {
                straight_length: 4.0,
                radius: 1.0,
            },
            ..TrackConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_bar_layout_left_to_right() {
        let bar = SensorMount::bar(3, 0.1, 0.05);
        assert_eq!(bar[0], SensorMount::new(0.1, 0.05));
        assert_eq!(bar[1], SensorMount::new(0.1, 0.0));
        assert_eq!(bar[2], SensorMount::new(0.1, -0.05));
    }

    #[test]
    fn test_grid_layout_rows_then_columns() {
        let grid = SensorMount::grid(2, 3, 0.1, 0.05);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], SensorMount::new(0.1, 0.05));
        assert_eq!(grid[2], SensorMount::new(0.1, -0.05));
        assert!((grid[3].forward - 0.15).abs() < 1e-12);
        assert_eq!(grid[3].lateral, 0.05);
        assert!(SensorMount::grid(0, 3, 0.1, 0.05).is_empty());
    }

    #[test]
    fn test_grid_sees_line_in_center_column() {
        let track = stadium();
        let state = RobotState::at_rest(DVec2::new(0.0, -1.0), 0.0);
        let mounts = SensorMount::grid(3, 3, 0.1, 0.1);
        let obs = sense(&track, &state, &mounts, &SensorResponse::Binary { threshold: 0.05 });
        assert_eq!(obs.readings, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_binary_bar_centered() {
        let track = stadium();
        let state = RobotState::at_rest(DVec2::new(0.0, -1.0), 0.0);
        let mounts = SensorMount::bar(3, 0.1, 0.1);
        let obs = sense(&track, &state, &mounts, &SensorResponse::Binary { threshold: 0.05 });
        assert_eq!(obs.readings, vec![0.0, 1.0, 0.0]);
        assert!(obs.line_detected(1));
        assert!(!obs.line_detected(7));
    }

    #[test]
    fn test_binary_bar_shifted_left() {
        let track = stadium();
        // Robot sits 0.1 m left of the line, so the line is under its right sensor
        let state = RobotState::at_rest(DVec2::new(0.0, -0.9), 0.0);
        let mounts = SensorMount::bar(3, 0.1, 0.1);
        let obs = sense(&track, &state, &mounts, &SensorResponse::Binary { threshold: 0.05 });
        assert_eq!(obs.readings, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_signed_and_linear_responses() {
        let signed = SensorResponse::Signed { range: 0.1 };
        assert!((signed.apply(0.05) - 0.5).abs() < 1e-12);
        assert_eq!(signed.apply(-1.0e6), -1.0);

        let linear = SensorResponse::Linear { range: 0.1 };
        assert!((linear.apply(-0.025) - 0.75).abs() < 1e-12);
        assert_eq!(linear.apply(0.5), 0.0);
    }

    #[test]
    fn test_noise_is_seeded() {
        let track = stadium();
        let state = RobotState::at_rest(DVec2::new(0.0, -1.0), 0.0);
        let mounts = SensorMount::bar(5, 0.1, 0.03);
        let response = SensorResponse::Signed { range: 0.15 };

        let mut a = SensorArray::new(mounts.clone(), response, 0.01, 7).unwrap();
        let mut b = SensorArray::new(mounts.clone(), response, 0.01, 7).unwrap();
        let mut c = SensorArray::new(mounts, response, 0.01, 8).unwrap();

        let seq_a: Vec<_> = (0..10).map(|_| a.sense(&track, &state)).collect();
        let seq_b: Vec<_> = (0..10).map(|_| b.sense(&track, &state)).collect();
        let seq_c: Vec<_> = (0..10).map(|_| c.sense(&track, &state)).collect();
        assert_eq!(seq_a, seq_b);
        assert_ne!(seq_a, seq_c);
    }

    #[test]
    fn test_noise_free_array_matches_pure_sense() {
        let track = stadium();
        let state = RobotState::at_rest(DVec2::new(0.5, -0.97), 0.1);
        let mounts = SensorMount::bar(5, 0.1, 0.03);
        let response = SensorResponse::Linear { range: 0.15 };
        let mut array = SensorArray::new(mounts.clone(), response, 0.0, 1).unwrap();
        assert_eq!(array.sense(&track, &state), sense(&track, &state, &mounts, &response));
    }

    #[test]
    fn test_rejects_empty_array() {
        let result = SensorArray::new(Vec::new(), SensorResponse::Linear { range: 0.1 }, 0.0, 0);
        assert!(result.is_err());
    }
}
