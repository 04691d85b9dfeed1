//! Batcher configuration.

use std::time::Duration;

use super::errors::BatcherConfigError;

/// Settings for [`crate::BoundedBatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Maximum number of buffered events.
    pub capacity: usize,
    /// Period of the timer-driven flush.
    pub flush_interval: Duration,
    /// Fixed delay between recovery attempts for a batch the sink refused
    /// as unavailable.
    pub recovery_interval: Duration,
    /// Log a warning once more recovery loops than this are in flight.
    pub recovery_warn_threshold: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            flush_interval: Duration::from_secs(5),
            recovery_interval: Duration::from_secs(5),
            recovery_warn_threshold: 16,
        }
    }
}

impl BatcherConfig {
    pub fn new(capacity: usize, flush_interval: Duration) -> Self {
        Self {
            capacity,
            flush_interval,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), BatcherConfigError> {
        if self.capacity == 0 {
            return Err(BatcherConfigError::ZeroCapacity);
        }
        if self.flush_interval.is_zero() {
            return Err(BatcherConfigError::ZeroFlushInterval);
        }
        if self.recovery_interval.is_zero() {
            return Err(BatcherConfigError::ZeroRecoveryInterval);
        }
        Ok(())
    }
}
