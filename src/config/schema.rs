//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Per-connection stream settings.
    pub stream: StreamConfig,

    /// Filter chain settings.
    pub filters: FilterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Stream settings applied to every connection.
///
/// Stored on each connection under the channel-config attribute and
/// inherited by its streams.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Requests served on one connection before it drains.
    pub max_requests_per_connection: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_requests_per_connection: 4000,
        }
    }
}

/// Filter chain configuration. The only section applied on hot reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Names of filters disabled at runtime.
    pub disabled: Vec<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
