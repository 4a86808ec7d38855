use std::time::Duration;

use serde::Deserialize;

fn default_debounce_ms() -> u64 {
    100
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    5
}
fn default_buffer_capacity() -> usize {
    100
}
fn default_count() -> usize {
    broker_api::DEFAULT_READ_COUNT
}
fn default_notification_capacity() -> usize {
    64
}

/// Tuning knobs of the synchronization layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Quiet window for filter edits before a listing request is issued.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Fixed delay between listing retries. Not exponential.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Retries after the initial attempt before escalating to a disconnect.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Message buffer capacity (newest first).
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// N for `FromBeginning` and `LastN` when the caller does not override it.
    #[serde(default = "default_count")]
    pub default_count: usize,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            buffer_capacity: default_buffer_capacity(),
            default_count: default_count(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Initial attempt plus retries.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
