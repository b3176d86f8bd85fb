//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (request limits > 0, addresses parse)
//! - Detect duplicate filter switches
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.stream.max_requests_per_connection == 0 {
        errors.push(ValidationError::new(
            "stream.max_requests_per_connection",
            "must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for name in &config.filters.disabled {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("filters.disabled", "filter name must not be empty"));
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::new(
                "filters.disabled",
                format!("filter `{name}` listed more than once"),
            ));
        }
    }

    let observability = &config.observability;
    if !LOG_LEVELS
        .iter()
        .any(|level| level.eq_ignore_ascii_case(&observability.log_level))
    {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
