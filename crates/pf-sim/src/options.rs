//! Run configuration.

use std::time::{Duration, Instant};

use pf_core::units::{self, Frequency, Time};
use pf_core::Real;
use pf_tasks::ExecutionPolicy;
use serde::Serialize;

use crate::error::ConfigError;

/// Wall-clock pacing settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RealTimeOptions {
    /// Largest tolerated lag behind the wall clock. `None` never fails.
    pub max_drift: Option<Duration>,
    /// Wall-clock instant of step 0; defaults to when the run starts.
    #[serde(skip)]
    pub start_at: Option<Instant>,
}

impl Default for RealTimeOptions {
    fn default() -> Self {
        Self {
            max_drift: Some(Duration::from_secs(1)),
            start_at: None,
        }
    }
}

/// Everything that shapes a run apart from the network itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimOptions {
    pub name: String,
    /// Base angular frequency of the dynamic phasors (rad/s).
    pub omega: Real,
    /// Fixed timestep (s).
    pub dt: Real,
    /// Simulated duration (s).
    pub final_time: Real,
    /// Worker threads for task layers; 0 lets the pool decide.
    pub threads: usize,
    pub policy: ExecutionPolicy,
    /// Pace the controller thread to the wall clock when set.
    pub realtime: Option<RealTimeOptions>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            name: "simulation".to_string(),
            omega: 2.0 * std::f64::consts::PI * 50.0,
            dt: 1e-3,
            final_time: 0.3,
            threads: 0,
            policy: ExecutionPolicy::Parallel,
            realtime: None,
        }
    }
}

impl SimOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the base frequency from a nominal grid frequency.
    pub fn with_frequency(mut self, f: Frequency) -> Self {
        self.omega = units::omega(f).value;
        self
    }

    pub fn with_timestep(mut self, dt: Time) -> Self {
        self.dt = dt.value;
        self
    }

    pub fn with_final_time(mut self, t: Time) -> Self {
        self.final_time = t.value;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy, threads: usize) -> Self {
        self.policy = policy;
        self.threads = threads;
        self
    }

    pub fn with_realtime(mut self, realtime: RealTimeOptions) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Number of steps needed to reach `final_time`.
    pub fn total_steps(&self) -> u64 {
        (self.final_time / self.dt).round() as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |what: &str| {
            Err(ConfigError::InvalidOption {
                what: what.to_string(),
            })
        };
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return invalid("timestep must be positive and finite");
        }
        if !(self.final_time.is_finite() && self.final_time > 0.0) {
            return invalid("final time must be positive and finite");
        }
        if !(self.omega.is_finite() && self.omega >= 0.0) {
            return invalid("angular frequency must be finite and non-negative");
        }
        if self.total_steps() == 0 {
            return invalid("final time is shorter than one timestep");
        }
        if let Some(rt) = &self.realtime {
            if rt.max_drift == Some(Duration::ZERO) {
                return invalid("real-time drift limit must be non-zero");
            }
            if Duration::try_from_secs_f64(self.dt).is_err() {
                return invalid("timestep does not fit a wall-clock duration");
            }
        }
        Ok(())
    }
}
