//! Settings types.
//!
//! Durations are stored as milliseconds so the JSON file stays flat; the
//! accessors hand back [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlingSettings {
    /// Per-client relay tuning.
    pub relay: RelaySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Tuning for one client's relays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Capacity of each bounded queue.
    pub queue_capacity: usize,
    /// Interval between heartbeat pings.
    pub ping_interval_ms: u64,
    /// Silence allowed before a stream is considered dead. Re-armed by
    /// every pong and every received frame.
    pub read_timeout_ms: u64,
    /// Deadline for a single frame write.
    pub write_timeout_ms: u64,
    /// How long `join` waits for the four loops before aborting them.
    pub shutdown_grace_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 200,
            ping_interval_ms: 1_000,
            read_timeout_ms: 2_000,
            write_timeout_ms: 5_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl RelaySettings {
    /// Heartbeat interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Read deadline extension.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write deadline extension.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Teardown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Reject values that would stall or immediately kill a relay.
    ///
    /// The read timeout must exceed the ping interval, otherwise a healthy
    /// peer cannot answer a ping before its read deadline lapses.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "queueCapacity must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("pingIntervalMs", self.ping_interval_ms),
            ("readTimeoutMs", self.read_timeout_ms),
            ("writeTimeoutMs", self.write_timeout_ms),
            ("shutdownGraceMs", self.shutdown_grace_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if self.read_timeout_ms <= self.ping_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "readTimeoutMs ({}) must exceed pingIntervalMs ({})",
                self.read_timeout_ms, self.ping_interval_ms
            )));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
