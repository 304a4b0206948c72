//! Release failure policy
//!
//! Decides what happens when a slab refuses to take back a region.

use serde::Deserialize;
use tracing::{error, warn};

use crate::error::{PoolError, Result};
use crate::metrics::METRICS;

/// What to do with a failed region release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Log the failure and keep the pool available
    #[default]
    LogAndContinue,
    /// Return the failure to the disposing caller
    Propagate,
}

impl ReleasePolicy {
    /// Apply the policy to a release outcome from `dispose()`
    pub fn handle(self, outcome: Result<()>) -> Result<()> {
        let Err(err) = outcome else {
            return Ok(());
        };

        METRICS.release_failed();
        match self {
            ReleasePolicy::LogAndContinue => {
                warn!(error = %err, "Region release failed, continuing");
                Ok(())
            }
            ReleasePolicy::Propagate => Err(err),
        }
    }

    /// Apply the policy where the failure cannot be returned (drop paths)
    pub fn handle_detached(self, outcome: Result<()>) {
        let Err(err) = outcome else {
            return;
        };

        METRICS.release_failed();
        match self {
            ReleasePolicy::LogAndContinue => {
                warn!(error = %err, "Region release failed, continuing");
            }
            ReleasePolicy::Propagate => {
                error!(error = %err, "Region release failed with no caller to report to");
            }
        }
    }
}

impl std::str::FromStr for ReleasePolicy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log_and_continue" | "log" => Ok(ReleasePolicy::LogAndContinue),
            "propagate" => Ok(ReleasePolicy::Propagate),
            other => Err(PoolError::invalid_argument(format!(
                "unknown release policy: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> PoolError {
        PoolError::ReleaseFailure {
            slab: 7,
            offset: 0,
            len: 16,
            reason: "region is not reserved",
        }
    }

    #[test]
    fn test_log_and_continue_swallows() {
        assert!(ReleasePolicy::LogAndContinue.handle(Err(failure())).is_ok());
    }

    #[test]
    fn test_propagate_returns_error() {
        let err = ReleasePolicy::Propagate.handle(Err(failure())).unwrap_err();
        assert_eq!(err, failure());
    }

    #[test]
    fn test_success_passes_through() {
        assert!(ReleasePolicy::Propagate.handle(Ok(())).is_ok());
    }

    #[test]
    fn test_parse() {
        assert_eq!("propagate".parse::<ReleasePolicy>().unwrap(), ReleasePolicy::Propagate);
        assert_eq!("log".parse::<ReleasePolicy>().unwrap(), ReleasePolicy::LogAndContinue);
        assert!("panic".parse::<ReleasePolicy>().is_err());
    }
}
