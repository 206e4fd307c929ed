//! Server error types

use crate::config::ConfigError;
use ioc_scheduler::SchedulerError;
use thiserror::Error;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Task runner could not start
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration rejected
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: ServerError = ConfigError::Invalid {
            field: "workers",
            reason: "too many".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "config error: invalid config value for workers: too many"
        );
    }
}
