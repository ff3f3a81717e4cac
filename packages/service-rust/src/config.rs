use std::time::Duration;

use plexus_core::auth::DEFAULT_NAMESPACE;
use plexus_core::client::DEFAULT_REQUEST_TIMEOUT;
use plexus_core::server::{DEFAULT_REGISTER_INTERVAL, DEFAULT_REGISTER_TTL};
use plexus_core::store::DEFAULT_DATABASE;

/// Settings used when the default collaborators are first constructed.
///
/// Everything here can still be overridden per service through options or
/// command-line flags.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Finished spans kept by the default tracer.
    pub trace_capacity: usize,
    /// Client call deadline.
    pub request_timeout: Duration,
    /// Registry record lifetime.
    pub register_ttl: Duration,
    /// Re-registration period. Should be well below `register_ttl`.
    pub register_interval: Duration,
    pub store_database: String,
    pub auth_namespace: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            trace_capacity: 1024,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            register_ttl: DEFAULT_REGISTER_TTL,
            register_interval: DEFAULT_REGISTER_INTERVAL,
            store_database: DEFAULT_DATABASE.to_string(),
            auth_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_interval_inside_ttl() {
        let config = ServiceConfig::default();
        assert!(config.register_interval < config.register_ttl);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
