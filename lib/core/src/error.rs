//! Error handling foundation for vo-federation.
//!
//! This module provides the `Result` type alias using rootcause and the
//! coarse error taxonomy shared by every crate. Each crate defines its own
//! domain-specific error types in their own error modules, maps lower-layer
//! reports into them with `map_err` as errors propagate up the stack, and
//! classifies them through [`Classify`].

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer converts the reports it receives into its own context type.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Coarse classification of domain errors.
///
/// The class decides how an error is surfaced: protocol violations are
/// rejected explicitly, upstream transport failures are reported (login) or
/// retried (notification queue), and the remaining classes map onto the
/// usual not-found / conflict / validation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Insecure transport, state/nonce mismatch, audience mismatch, expired token.
    Protocol,
    /// Network failure talking to an identity provider or a federation partner.
    UpstreamTransport,
    /// Unknown provider, missing session, missing share.
    NotFound,
    /// Duplicate identifier, already-shared resource.
    Conflict,
    /// Missing subject claim, malformed cloud id, missing required field.
    Validation,
    /// Storage or other internal failure.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Protocol => "protocol",
            Self::UpstreamTransport => "upstream_transport",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Implemented by every domain error so outer layers can decide how to
/// surface it without matching on foreign variants.
pub trait Classify {
    /// Returns the class of this error.
    fn class(&self) -> ErrorClass;
}

/// Errors from the storage layer backing any of the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint was violated.
    Duplicate { entity: &'static str, key: String },
    /// The backing store failed.
    Backend { details: String },
    /// A stored row could not be decoded.
    Corrupt { entity: &'static str, details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { entity, key } => {
                write!(f, "{entity} with key '{key}' already exists")
            }
            Self::Backend { details } => write!(f, "storage backend error: {details}"),
            Self::Corrupt { entity, details } => {
                write!(f, "stored {entity} is corrupt: {details}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Duplicate { .. } => ErrorClass::Conflict,
            Self::Backend { .. } | Self::Corrupt { .. } => ErrorClass::Internal,
        }
    }
}
