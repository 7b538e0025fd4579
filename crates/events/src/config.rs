use std::time::Duration;

use beacon_core::error::CoreError;

/// Default capacity of the bounded intake queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default time `shutdown` waits for in-flight deliveries.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Event bus configuration.
///
/// The defaults match what every in-process consumer needs; override via
/// environment variables in deployments that publish in large bursts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusConfig {
    /// Intake queue capacity. `publish` waits once this many events are
    /// queued and not yet dispatched.
    pub queue_capacity: usize,
    /// Upper bound on how long `shutdown` waits for in-flight deliveries.
    pub shutdown_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl EventBusConfig {
    /// Load configuration from environment variables (and a `.env` file, if
    /// present) with defaults.
    ///
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `EVENT_BUS_QUEUE_CAPACITY`        | `1000`  |
    /// | `EVENT_BUS_SHUTDOWN_TIMEOUT_SECS` | `10`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let queue_capacity = match lookup("EVENT_BUS_QUEUE_CAPACITY") {
            Some(raw) => parse_positive("EVENT_BUS_QUEUE_CAPACITY", &raw)?,
            None => DEFAULT_QUEUE_CAPACITY,
        };

        let shutdown_timeout = match lookup("EVENT_BUS_SHUTDOWN_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive(
                "EVENT_BUS_SHUTDOWN_TIMEOUT_SECS",
                &raw,
            )? as u64),
            None => DEFAULT_SHUTDOWN_TIMEOUT,
        };

        Ok(Self {
            queue_capacity,
            shutdown_timeout,
        })
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize, CoreError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(CoreError::Validation(format!("{key} must be greater than zero"))),
        Ok(value) => Ok(value),
        Err(e) => Err(CoreError::Validation(format!(
            "{key} must be a positive integer, got '{raw}': {e}"
        ))),
    }
}
