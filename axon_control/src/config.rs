//! Controller configuration: file format, defaults, validation.
//!
//! All values have working defaults so the controller can run without a
//! config file; a TOML file selectively overrides them and the CLI overrides
//! the RT placement fields on top.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use axon_common::units::UnitScale;

use crate::state::profile::ProfileConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Cycle timing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CycleConfig {
    /// Bus exchange period [µs].
    pub cycle_time_us: u64,
    /// Overall startup budget for state transitions and drive enabling [ms].
    pub startup_timeout_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_time_us: 2_000,
            startup_timeout_ms: 5_000,
        }
    }
}

/// Motion scaling and arrival-tolerance parameters.
///
/// The tolerance values are policy, not protocol; see the arrival test in
/// the profiler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionConfig {
    /// Encoder resolution [counts/rev] (object 0x608F:01).
    pub counts_per_revolution: f64,
    /// Acceleration used when the command issuer gives none [deg/s²].
    pub default_acceleration: f64,
    /// Arrival band [counts].
    pub position_tolerance: f64,
    /// Low-speed threshold for the coarse arrival band [counts/s].
    pub velocity_tolerance: f64,
    /// Coarse arrival band applied below the low-speed threshold [counts].
    pub coarse_tolerance: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            counts_per_revolution: UnitScale::DEFAULT_COUNTS_PER_REVOLUTION,
            default_acceleration: 360.0,
            position_tolerance: 100.0,
            velocity_tolerance: 100.0,
            coarse_tolerance: 1_000.0,
        }
    }
}

/// RT thread placement.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RtConfig {
    /// CPU core to pin the cyclic thread to.
    pub cpu_core: usize,
    /// SCHED_FIFO priority.
    pub priority: i32,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: 1,
            priority: 80,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub cycle: CycleConfig,
    pub motion: MotionConfig,
    pub rt: RtConfig,
}

impl ControllerConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle.cycle_time_us == 0 {
            return Err(ConfigError::Invalid("cycle_time_us must be > 0".into()));
        }
        if self.cycle.startup_timeout_ms == 0 {
            return Err(ConfigError::Invalid("startup_timeout_ms must be > 0".into()));
        }
        if !(self.motion.counts_per_revolution.is_finite()
            && self.motion.counts_per_revolution > 0.0)
        {
            return Err(ConfigError::Invalid(
                "counts_per_revolution must be positive".into(),
            ));
        }
        if !(self.motion.default_acceleration.is_finite()
            && self.motion.default_acceleration > 0.0)
        {
            return Err(ConfigError::Invalid(
                "default_acceleration must be positive".into(),
            ));
        }
        if self.motion.position_tolerance < 0.0
            || self.motion.velocity_tolerance < 0.0
            || self.motion.coarse_tolerance < 0.0
        {
            return Err(ConfigError::Invalid("tolerances must be >= 0".into()));
        }
        if !(1..=99).contains(&self.rt.priority) {
            return Err(ConfigError::Invalid(format!(
                "rt priority {} outside 1..=99",
                self.rt.priority
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(self.cycle.cycle_time_us)
    }

    #[inline]
    pub fn cycle_time_s(&self) -> f64 {
        self.cycle.cycle_time_us as f64 / 1_000_000.0
    }

    #[inline]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle.startup_timeout_ms)
    }

    pub fn unit_scale(&self) -> UnitScale {
        UnitScale::new(self.motion.counts_per_revolution)
    }

    pub fn profile_config(&self) -> ProfileConfig {
        ProfileConfig {
            position_tolerance: self.motion.position_tolerance,
            velocity_tolerance: self.motion.velocity_tolerance,
            coarse_tolerance: self.motion.coarse_tolerance,
        }
    }
}
