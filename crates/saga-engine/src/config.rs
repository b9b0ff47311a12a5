//! Recovery scanner configuration loaded from environment variables.

use std::time::Duration;

/// Recovery scanner settings with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_STALENESS_SECS` — how long a non-terminal saga may sit untouched
///   before it is flagged (default: `1800`)
/// - `SAGA_SCAN_INTERVAL_SECS` — how often the scanner runs (default: `60`)
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub staleness: Duration,
    pub scan_interval: Duration,
}

impl RecoveryConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            staleness: Duration::from_secs(
                std::env::var("SAGA_STALENESS_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            scan_interval: Duration::from_secs(
                std::env::var("SAGA_SCAN_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(1800),
            scan_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RecoveryConfig::default();
        assert_eq!(config.staleness, Duration::from_secs(1800));
        assert_eq!(config.scan_interval, Duration::from_secs(60));
    }
}
