//! Run configuration
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! `{}`) is a valid configuration. Validation happens before any run starts.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{ConfigError, require_non_negative, require_positive};
use crate::sim::control::ControlMode;
use crate::sim::physics::{IntegratorKind, PhysicsLimits, SimTime};
use crate::sim::sensor::{SensorMount, SensorResponse};
use crate::sim::track::TrackShape;

/// Half-width of the painted line the default binary sensors detect (m)
pub const DEFAULT_LINE_HALF_WIDTH: f64 = 0.02;

/// Complete configuration for one judged run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub track: TrackConfig,
    pub sensors: SensorConfig,
    pub physics: PhysicsConfig,
    pub judge: JudgeConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Seed for random tracks (and sensor noise unless `noise_seed` is set)
    pub track_seed: u64,
    pub shape: TrackShape,
    /// Half the width of the drivable band (m)
    pub half_width: f64,
    /// Tightest bend the track may contain (m)
    pub min_curvature_radius: f64,
    /// Distance between centerline samples (m)
    pub sample_spacing: f64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            track_seed: DEFAULT_TRACK_SEED,
            shape: TrackShape::default(),
            half_width: DEFAULT_HALF_WIDTH,
            min_curvature_radius: DEFAULT_MIN_CURVATURE_RADIUS,
            sample_spacing: DEFAULT_SAMPLE_SPACING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Size of the evenly spaced bar used when `offsets` is empty
    pub sensor_count: usize,
    /// Explicit mounts; overrides the bar when non-empty
    pub offsets: Vec<SensorMount>,
    /// Bar distance ahead of the axle (m)
    pub bar_forward: f64,
    /// Distance between bar sensors (m)
    pub bar_spacing: f64,
    pub response: SensorResponse,
    /// Gaussian noise on the sensed lateral offset (m); zero disables it
    pub noise_std_dev: f64,
    /// Noise seed; falls back to the track seed
    pub noise_seed: Option<u64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sensor_count: DEFAULT_SENSOR_COUNT,
            offsets: Vec::new(),
            bar_forward: DEFAULT_BAR_FORWARD,
            bar_spacing: DEFAULT_BAR_SPACING,
            response: SensorResponse::Binary {
                threshold: DEFAULT_LINE_HALF_WIDTH,
            },
            noise_std_dev: 0.0,
            noise_seed: None,
        }
    }
}

impl SensorConfig {
    /// Mounts in reading order
    pub fn mounts(&self) -> Vec<SensorMount> {
        if self.offsets.is_empty() {
            SensorMount::bar(self.sensor_count, self.bar_forward, self.bar_spacing)
        } else {
            self.offsets.clone()
        }
    }

    /// `rows` x `cols` grid of sensors starting `forward` ahead of the axle
    pub fn grid(rows: usize, cols: usize, forward: f64, spacing: f64) -> Self {
        Self {
            sensor_count: rows * cols,
            offsets: SensorMount::grid(rows, cols, forward, spacing),
            bar_forward: forward,
            bar_spacing: spacing,
            ..Self::default()
        }
    }

    /// Single signed sensor on the robot's center line, `forward` ahead of the axle
    pub fn signed_center(forward: f64, range: f64) -> Self {
        Self {
            sensor_count: 1,
            offsets: vec![SensorMount::new(forward, 0.0)],
            response: SensorResponse::Signed { range },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Fixed tick length (seconds)
    pub tick_duration: f64,
    pub wheel_base: f64,
    pub max_wheel_speed: f64,
    pub max_linear_accel: f64,
    pub max_angular_accel: f64,
    pub integrator: IntegratorKind,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            tick_duration: DEFAULT_TICK_DURATION,
            wheel_base: DEFAULT_WHEEL_BASE,
            max_wheel_speed: DEFAULT_MAX_WHEEL_SPEED,
            max_linear_accel: DEFAULT_MAX_LINEAR_ACCEL,
            max_angular_accel: DEFAULT_MAX_ANGULAR_ACCEL,
            integrator: IntegratorKind::default(),
        }
    }
}

impl PhysicsConfig {
    pub fn limits(&self) -> PhysicsLimits {
        PhysicsLimits {
            wheel_base: self.wheel_base,
            max_wheel_speed: self.max_wheel_speed,
            max_linear_accel: self.max_linear_accel,
            max_angular_accel: self.max_angular_accel,
            integrator: self.integrator,
        }
    }

    /// Tick length in fixed-point nanoseconds
    pub fn tick(&self) -> Result<SimTime, ConfigError> {
        SimTime::from_secs("tick_duration", self.tick_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Simulated time budget (seconds)
    pub time_limit: f64,
    /// Ticks over which net progress is measured for stall detection
    pub stall_window_ticks: u32,
    /// Minimum net progress (lap fraction) over the stall window
    pub stall_progress_epsilon: f64,
    /// Lap fraction the robot must reach before the finish line counts
    pub start_neighborhood: f64,
    /// Largest backward progress jump (lap fraction) tolerated in one tick
    pub progress_jump_epsilon: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            time_limit: DEFAULT_TIME_LIMIT,
            stall_window_ticks: DEFAULT_STALL_WINDOW_TICKS,
            stall_progress_epsilon: DEFAULT_STALL_PROGRESS_EPSILON,
            start_neighborhood: DEFAULT_START_NEIGHBORHOOD,
            progress_jump_epsilon: DEFAULT_PROGRESS_JUMP_EPSILON,
        }
    }
}

impl JudgeConfig {
    pub fn time_limit(&self) -> Result<SimTime, ConfigError> {
        SimTime::from_secs("time_limit", self.time_limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub mode: ControlMode,
    /// Real-time allowance per strategy call (milliseconds)
    pub decision_budget_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::default(),
            decision_budget_ms: DEFAULT_DECISION_BUDGET_MS,
        }
    }
}

impl RaceConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RaceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = Self::from_json_str(&fs::read_to_string(path)?)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Check every numeric option; track shape checks happen during generation
    pub fn validate(&self) -> Result<(), ConfigError> {
        let track = &self.track;
        require_positive("half_width", track.half_width)?;
        require_non_negative("min_curvature_radius", track.min_curvature_radius)?;
        require_positive("sample_spacing", track.sample_spacing)?;
        if track.sample_spacing > track.half_width {
            return Err(ConfigError::invalid(
                "sample_spacing",
                "must not exceed half_width",
            ));
        }

        let sensors = &self.sensors;
        if sensors.offsets.is_empty() && sensors.sensor_count == 0 {
            return Err(ConfigError::invalid(
                "sensor_count",
                "at least one sensor is required",
            ));
        }
        require_non_negative("bar_spacing", sensors.bar_spacing)?;
        if !sensors.bar_forward.is_finite() {
            return Err(ConfigError::invalid("bar_forward", "must be finite"));
        }
        if sensors
            .offsets
            .iter()
            .any(|m| !m.forward.is_finite() || !m.lateral.is_finite())
        {
            return Err(ConfigError::invalid("sensor_offsets", "offsets must be finite"));
        }
        sensors.response.validate()?;
        require_non_negative("noise_std_dev", sensors.noise_std_dev)?;

        let physics = &self.physics;
        let tick = physics.tick()?;
        require_positive("wheel_base", physics.wheel_base)?;
        require_positive("max_wheel_speed", physics.max_wheel_speed)?;
        require_positive("max_linear_accel", physics.max_linear_accel)?;
        require_positive("max_angular_accel", physics.max_angular_accel)?;

        let judge = &self.judge;
        let limit = judge.time_limit()?;
        if limit < tick {
            return Err(ConfigError::invalid(
                "time_limit",
                "must be at least one tick long",
            ));
        }
        if judge.stall_window_ticks == 0 {
            return Err(ConfigError::invalid("stall_window_ticks", "must be at least 1"));
        }
        // A window longer than the whole race can never fill
        let max_ticks = limit.as_nanos() / tick.as_nanos();
        if u64::from(judge.stall_window_ticks) > max_ticks {
            return Err(ConfigError::invalid(
                "stall_window_ticks",
                format!(
                    "{} ticks is longer than the {max_ticks} ticks the time limit allows",
                    judge.stall_window_ticks
                ),
            ));
        }
        require_non_negative("stall_progress_epsilon", judge.stall_progress_epsilon)?;
        if !(judge.start_neighborhood > 0.0 && judge.start_neighborhood < 1.0) {
            return Err(ConfigError::invalid(
                "start_neighborhood",
                format!("must be in (0, 1), got {}", judge.start_neighborhood),
            ));
        }
        if !(judge.progress_jump_epsilon > 0.0 && judge.progress_jump_epsilon < 0.5) {
            return Err(ConfigError::invalid(
                "progress_jump_epsilon",
                format!("must be in (0, 0.5), got {}", judge.progress_jump_epsilon),
            ));
        }

        if self.control.decision_budget_ms == 0 {
            return Err(ConfigError::invalid(
                "decision_budget_ms",
                "must be at least 1 ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RaceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.judge.time_limit, 300.0);
        assert_eq!(config.sensors.mounts().len(), DEFAULT_SENSOR_COUNT);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = RaceConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RaceConfig::default());
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "track": { "track_seed": 7, "shape": { "kind": "circle", "radius": 1.5 } },
            "physics": { "tick_duration": 0.02 },
            "judge": { "time_limit": 60.0, "stall_window_ticks": 50 },
            "sensors": { "response": { "kind": "signed", "range": 0.15 }, "sensor_count": 3 }
        }"#;
        let config = RaceConfig::from_json_str(json).unwrap();
        assert_eq!(config.track.track_seed, 7);
        assert_eq!(config.track.shape, TrackShape::Circle { radius: 1.5 });
        assert_eq!(config.physics.tick().unwrap().as_nanos(), 20_000_000);
        assert_eq!(config.judge.stall_window_ticks, 50);
        assert_eq!(config.sensors.mounts().len(), 3);
        assert_eq!(config.track.half_width, DEFAULT_HALF_WIDTH);
    }

    #[test]
    fn test_explicit_offsets_override_bar() {
        let mut config = RaceConfig::default();
        config.sensors.offsets = vec![SensorMount::new(0.2, 0.0)];
        assert_eq!(config.sensors.mounts(), vec![SensorMount::new(0.2, 0.0)]);
    }

    #[test]
    fn test_grid_sensors_validate() {
        let mut config = RaceConfig::default();
        config.sensors = SensorConfig::grid(4, 5, 0.1, 0.03);
        assert_eq!(config.sensors.mounts().len(), 20);
        assert!(config.validate().is_ok());

        config.sensors = SensorConfig::grid(0, 5, 0.1, 0.03);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = RaceConfig::default();
        config.physics.tick_duration = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "tick_duration", .. })
        ));

        let mut config = RaceConfig::default();
        config.judge.stall_window_ticks = 0;
        assert!(config.validate().is_err());

        let mut config = RaceConfig::default();
        config.physics.max_wheel_speed = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = RaceConfig::default();
        config.judge.time_limit = 0.001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stall_window_must_fit_in_time_limit() {
        let mut config = RaceConfig::default();
        config.judge.stall_window_ticks = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "stall_window_ticks", .. })
        ));

        // 10 s at 0.02 s per tick is exactly 500 ticks
        config.physics.tick_duration = 0.02;
        config.judge.time_limit = 10.0;
        config.judge.stall_window_ticks = 500;
        assert!(config.validate().is_ok());
        config.judge.stall_window_ticks = 501;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            RaceConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = RaceConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(RaceConfig::from_json_str(&json).unwrap(), config);
    }
}
