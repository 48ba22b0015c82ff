//! Cache configuration.
//!
//! Controls the query plan TTL cleaner and the identity stamped on
//! notifications. Loaded from the `[cache]` table of `dcache.toml`.

use std::time::Duration;

use serde::Deserialize;

use super::notification::ServiceIdentity;

// Default values for cache configuration
const DEFAULT_CLEANER_INTERVAL_MS: u64 = 10_000;
const DEFAULT_QUERY_TTL_MS: u64 = 30_000;

/// Per-cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Interval (ms) between cleaner ticks.
    pub cleaner_interval_ms: u64,
    /// Idle time (ms) after which a query plan is reclaimed.
    pub query_ttl_ms: u64,
    /// Service name carried by notifications.
    pub service_name: String,
    /// Service area carried by notifications.
    pub service_area: u8,
    /// Node identity carried by notifications.
    pub source: String,
    /// Start the background cleaner at construction.
    pub start_cleaner: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cleaner_interval_ms: DEFAULT_CLEANER_INTERVAL_MS,
            query_ttl_ms: DEFAULT_QUERY_TTL_MS,
            service_name: String::new(),
            service_area: 0,
            source: String::new(),
            start_cleaner: true,
        }
    }
}

impl CacheConfig {
    /// Cleaner tick interval, clamped to at least 1ms.
    pub fn cleaner_interval(&self) -> Duration {
        Duration::from_millis(self.cleaner_interval_ms.max(1))
    }

    /// Query plan idle TTL, clamped to at least 1ms.
    pub fn query_ttl(&self) -> Duration {
        Duration::from_millis(self.query_ttl_ms.max(1))
    }

    pub(crate) fn identity(&self) -> ServiceIdentity {
        ServiceIdentity {
            service_name: self.service_name.clone(),
            service_area: self.service_area,
            source: self.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.cleaner_interval_ms, 10_000);
        assert_eq!(config.query_ttl_ms, 30_000);
        assert!(config.service_name.is_empty());
        assert_eq!(config.service_area, 0);
        assert!(config.start_cleaner);
    }

    #[test]
    fn durations_clamp_to_min() {
        let config = CacheConfig {
            cleaner_interval_ms: 0,
            query_ttl_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.cleaner_interval(), Duration::from_millis(1));
        assert_eq!(config.query_ttl(), Duration::from_millis(1));
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"query_ttl_ms": 500, "service_name": "dhcp"}"#)
                .expect("deserialize");
        assert_eq!(config.query_ttl(), Duration::from_millis(500));
        assert_eq!(config.cleaner_interval_ms, 10_000);
        assert_eq!(config.identity().service_name, "dhcp");
    }
}
