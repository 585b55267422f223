//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (idle timeout, log level)
//! - Check that default headers and cookies are sendable
//! - Detect conflicting timeouts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use http::header::{HeaderName, HeaderValue};

use crate::config::schema::ClientConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `config`, collecting every problem.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let timeouts = &config.client;
    if timeouts.request_timeout_ms > 0
        && timeouts.dial_timeout_ms > timeouts.request_timeout_ms
    {
        errors.push(ValidationError::new(
            "client.dial_timeout_ms",
            "must not exceed client.request_timeout_ms",
        ));
    }

    if !config.pool.disable_keep_alives && config.pool.idle_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "pool.idle_timeout_ms",
            "must be greater than 0 when keep-alives are enabled",
        ));
    }

    if let Some(ua) = &config.defaults.user_agent {
        if HeaderValue::from_str(ua).is_err() {
            errors.push(ValidationError::new(
                "defaults.user_agent",
                "not a valid header value",
            ));
        }
    }

    for (name, value) in &config.defaults.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("defaults.headers.{name}"),
                "not a valid header name",
            ));
        } else if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(
                format!("defaults.headers.{name}"),
                "not a valid header value",
            ));
        }
    }

    let breaks_cookie = |s: &str| s.contains(|c: char| matches!(c, ';' | '\r' | '\n'));
    for (name, value) in &config.defaults.cookies {
        if name.is_empty() || name.contains('=') || breaks_cookie(name) || breaks_cookie(value) {
            errors.push(ValidationError::new(
                format!("defaults.cookies.{name}"),
                "not a valid cookie pair",
            ));
        }
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "logging.level",
            format!("must be one of {}", LOG_LEVELS.join(", ")),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ClientConfig::default();
        config.client.request_timeout_ms = 1_000;
        config.client.dial_timeout_ms = 5_000;
        config.logging.level = "loud".into();
        config
            .defaults
            .headers
            .insert("Bad Header".into(), "x".into());
        config.defaults.cookies.insert("sid".into(), "a;b".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "client.dial_timeout_ms",
                "defaults.headers.Bad Header",
                "defaults.cookies.sid",
                "logging.level",
            ]
        );
    }
}
