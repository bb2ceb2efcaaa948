//! # Input Validation
//!
//! Checks applied to untrusted input before it reaches the store or the
//! upstream feed: package ids and versions from request paths, and the
//! bind address from the command line.

use crate::types::{PackageId, PackageVersion};
use once_cell::sync::Lazy;
use regex::Regex;

/// NuGet's own limit on package id length.
pub const MAX_PACKAGE_ID_LENGTH: usize = 100;
pub const MAX_VERSION_LENGTH: usize = 64;

/// Regex for validating hostnames (RFC 1123 compliant)
static HOSTNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
        .unwrap_or_else(|e| unreachable!("static hostname pattern: {e}"))
});

/// Word runs joined by single `.`, `-` or `_`.
static PACKAGE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\w+([_.-]\w+)*$").unwrap_or_else(|e| unreachable!("static package id pattern: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Input too long: {actual} exceeds maximum {max}")]
    TooLong { actual: usize, max: usize },

    #[error("Input too short: {actual} is below minimum {min}")]
    TooShort { actual: usize, min: usize },

    #[error("Invalid characters in input: {input}")]
    InvalidCharacters { input: String },

    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Contains control characters")]
    ControlCharacters,
}

pub type ValidationResult<T> = Result<T, ValidationError>;

fn check_length(input: &str, max: usize) -> ValidationResult<()> {
    if input.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }
    if input.len() > max {
        return Err(ValidationError::TooLong {
            actual: input.len(),
            max,
        });
    }
    if input.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters);
    }
    Ok(())
}

pub fn validate_package_id(id: &str) -> ValidationResult<PackageId> {
    check_length(id, MAX_PACKAGE_ID_LENGTH)?;
    if !PACKAGE_ID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidCharacters {
            input: id.to_string(),
        });
    }
    Ok(PackageId::new(id))
}

pub fn validate_version(version: &str) -> ValidationResult<PackageVersion> {
    check_length(version, MAX_VERSION_LENGTH)?;
    version
        .parse()
        .map_err(|e: crate::types::VersionParseError| ValidationError::InvalidFormat {
            reason: e.to_string(),
        })
}

/// Validate a hostname or IPv4 address to bind to.
pub fn validate_hostname(hostname: &str) -> ValidationResult<String> {
    check_length(hostname, 253)?;

    if !HOSTNAME_REGEX.is_match(hostname) {
        return Err(ValidationError::InvalidCharacters {
            input: hostname.to_string(),
        });
    }
    Ok(hostname.to_string())
}

pub fn validate_port(port: u16) -> ValidationResult<u16> {
    if port == 0 {
        return Err(ValidationError::InvalidFormat {
            reason: "port must be between 1 and 65535".to_string(),
        });
    }
    Ok(port)
}
