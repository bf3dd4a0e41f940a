//! Viewer configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and defaults applied by a browse session
///
/// Deserializable so a host application can load it from its own config
/// file; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewerConfig {
    /// Page size used when a request does not name one
    pub default_page_size: u64,

    /// Largest page size a request may ask for
    pub max_page_size: u64,

    /// Row-scan ceiling for count estimation
    pub count_scan_ceiling: u64,

    /// Upper bound for every storage round trip made on behalf of a caller
    #[serde(with = "duration_milliseconds", rename = "queryTimeoutMilliseconds")]
    pub query_timeout: Duration,

    /// Read-only connections kept in the pool
    pub max_connections: u32,

    /// Whether views are listed and browsable next to tables
    pub include_views: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            count_scan_ceiling: 100_000,
            query_timeout: Duration::from_secs(30),
            max_connections: 4,
            include_views: true,
        }
    }
}

impl ViewerConfig {
    pub fn with_default_page_size(mut self, page_size: u64) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_max_page_size(mut self, page_size: u64) -> Self {
        self.max_page_size = page_size;
        self
    }

    pub fn with_count_scan_ceiling(mut self, ceiling: u64) -> Self {
        self.count_scan_ceiling = ceiling;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, connections: u32) -> Self {
        self.max_connections = connections;
        self
    }

    pub fn with_views(mut self, include_views: bool) -> Self {
        self.include_views = include_views;
        self
    }

    /// Upper page-size bound, never below one
    pub(crate) fn page_size_bound(&self) -> u64 {
        self.max_page_size.max(1)
    }

    /// Count ceiling, never below one
    pub(crate) fn count_ceiling(&self) -> u64 {
        self.count_scan_ceiling.max(1)
    }
}

mod duration_milliseconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ViewerConfig = serde_json::from_str(
            r#"{ "maxPageSize": 100, "queryTimeoutMilliseconds": 1500 }"#,
        )
        .unwrap();

        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.query_timeout, Duration::from_millis(1500));
        assert_eq!(config.default_page_size, 50);
        assert!(config.include_views);
    }

    #[test]
    fn test_bounds_never_zero() {
        let config = ViewerConfig::default()
            .with_max_page_size(0)
            .with_count_scan_ceiling(0);

        assert_eq!(config.page_size_bound(), 1);
        assert_eq!(config.count_ceiling(), 1);
    }
}
