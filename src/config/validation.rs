//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (request timeout below read timeout, non-zero deadlines)
//! - Validate the listen address shape (`host:port`) without resolving it
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), ValidationErrors>
//! - Runs before any listener is bound

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server name must not be empty")]
    EmptyName,

    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("request timeout ({request_ms}ms) must be smaller than read timeout ({read_ms}ms)")]
    RequestTimeoutNotBelowRead { request_ms: u64, read_ms: u64 },

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("base path {0:?} must start with '/' and must not end with '/'")]
    InvalidBasePath(String),

    #[error("endpoint path {0:?} must start with '/'")]
    InvalidEndpointPath(String),

    #[error("unsupported endpoint method {0}")]
    UnsupportedMethod(String),

    #[error("endpoint {method} {path} is registered twice")]
    DuplicateEndpoint { method: String, path: String },

    #[error("metric name must not be empty")]
    EmptyMetricName,

    #[error("unknown log level {0:?}, expected one of none, fatal, error, warn, info, debug, trace")]
    UnknownLogLevel(String),
}

/// Every problem found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self(errors)
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate a server configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    if let Err(reason) = check_address(&config.address) {
        errors.push(ValidationError::InvalidAddress {
            address: config.address.clone(),
            reason,
        });
    }

    let timeouts = &config.timeouts;
    if timeouts.request_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("request"));
    }
    if timeouts.write_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("write"));
    }
    if timeouts.request_ms >= timeouts.read_ms {
        errors.push(ValidationError::RequestTimeoutNotBelowRead {
            request_ms: timeouts.request_ms,
            read_ms: timeouts.read_ms,
        });
    }

    if let Some(base_path) = &config.base_path {
        if !base_path.starts_with('/') || base_path.len() < 2 || base_path.ends_with('/') {
            errors.push(ValidationError::InvalidBasePath(base_path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Checks that `address` looks like `host:port`.
///
/// IP literals (including bracketed IPv6) are parsed directly; anything else
/// must be a hostname made of alphanumeric labels separated by dots.
fn check_address(address: &str) -> Result<(), String> {
    if address.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| "expected host:port".to_string())?;

    port.parse::<u16>()
        .map_err(|_| format!("port {:?} is not a number between 0 and 65535", port))?;

    if host.is_empty() {
        return Err("host must not be empty".to_string());
    }

    let valid_label = |label: &str| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !host.split('.').all(valid_label) {
        return Err(format!("host {:?} is not a valid hostname", host));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TimeoutConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn request_timeout_must_be_below_read_timeout() {
        let mut config = ServerConfig::default();
        config.timeouts = TimeoutConfig {
            read_ms: 1_000,
            request_ms: 1_000,
            ..TimeoutConfig::default()
        };

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::RequestTimeoutNotBelowRead {
            request_ms: 1_000,
            read_ms: 1_000,
        }));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ServerConfig::default();
        config.name = String::new();
        config.address = "localhost".to_string();
        config.timeouts.request_ms = 5_000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.errors().len(), 3);
        assert!(errors.to_string().contains("server name must not be empty"));
    }

    #[test]
    fn address_shapes() {
        assert!(check_address("0.0.0.0:8080").is_ok());
        assert!(check_address("[::1]:3000").is_ok());
        assert!(check_address("localhost:0").is_ok());
        assert!(check_address("api.example-1.internal:443").is_ok());

        assert!(check_address("localhost").is_err());
        assert!(check_address(":8080").is_err());
        assert!(check_address("localhost:http").is_err());
        assert!(check_address("local_host:80").is_err());
        assert!(check_address("host..name:80").is_err());
    }

    #[test]
    fn base_path_shape() {
        let mut config = ServerConfig::default();

        config.base_path = Some("/api/v1".to_string());
        assert!(validate_config(&config).is_ok());

        for bad in ["api", "/", "/api/"] {
            config.base_path = Some(bad.to_string());
            let errors = validate_config(&config).unwrap_err();
            assert!(errors.contains(&ValidationError::InvalidBasePath(bad.to_string())));
        }
    }
}
