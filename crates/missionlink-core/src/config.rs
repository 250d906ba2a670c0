//! Transfer engine configuration

use crate::error::TransferError;
use std::borrow::Cow;
use std::time::Duration;

/// Default time to wait for a vehicle response
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default number of resends per step
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Retry and timeout policy shared by uploads and downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// How long each step waits for its response before resending
    pub ack_timeout: Duration,

    /// Resends allowed per step; a step is sent at most `max_retries + 1` times
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl TransferConfig {
    /// Set the response timeout
    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Set the per-step retry limit
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum times a single step is sent
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if the timeout is zero.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.ack_timeout.is_zero() {
            return Err(TransferError::InvalidConfig(Cow::Borrowed(
                "ack timeout must be greater than zero",
            )));
        }
        Ok(())
    }
}
