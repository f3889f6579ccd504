//! Error types for run setup
//!
//! Only configuration-time failures are errors. Everything that goes wrong
//! during a race is resolved into a verdict by the judge.

use thiserror::Error;

/// Fatal errors raised before a race starts
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of its valid range
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Name of the offending option
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The generated centerline cannot form a drivable loop
    #[error("degenerate track: {0}")]
    DegenerateTrack(String),

    /// The centerline bends tighter than the drivable band allows
    #[error("track too tight: curvature radius {radius:.4} m is below the minimum {minimum:.4} m")]
    TrackTooTight {
        /// Smallest curvature radius found on the centerline
        radius: f64,
        /// Smallest radius the configuration accepts
        minimum: f64,
    },

    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON for a race
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The watchdog thread for the strategy could not be started
    #[error("failed to start strategy worker: {0}")]
    Worker(#[source] std::io::Error),
}

impl ConfigError {
    /// Creates an invalid parameter error
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Rejects values that are not finite and strictly positive
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            name,
            format!("must be finite and positive, got {value}"),
        ))
    }
}

/// Rejects values that are not finite and non-negative
pub(crate) fn require_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            name,
            format!("must be finite and non-negative, got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_positive() {
        assert!(require_positive("x", 1.0).is_ok());
        assert!(require_positive("x", 0.0).is_err());
        assert!(require_positive("x", f64::NAN).is_err());
        assert!(require_positive("x", f64::INFINITY).is_err());
    }

    #[test]
    fn test_error_message_names_parameter() {
        let err = ConfigError::invalid("tick_duration", "too small");
        assert_eq!(
            err.to_string(),
            "invalid parameter `tick_duration`: too small"
        );
    }

    #[test]
    fn test_worker_error_is_not_a_config_read_failure() {
        let err = ConfigError::Worker(std::io::Error::other("no threads left"));
        let message = err.to_string();
        assert!(message.starts_with("failed to start strategy worker"), "{message}");
        assert!(!message.contains("read configuration"));
    }
}
