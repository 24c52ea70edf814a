//! Core types and utilities for vo-federation.
//!
//! This crate provides the foundational types shared by the identity,
//! groups and sharing crates: integer row IDs, the error taxonomy with its
//! rootcause `Result` alias, and the outbound HTTP seam.

pub mod error;
pub mod http;
pub mod id;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{Classify, ErrorClass, Result, StoreError};
pub use http::{HttpClient, HttpError, HttpResponse, ReqwestHttpClient};
pub use id::{
    FederatedGroupShareId, InstanceId, ParseIdError, ProviderId, SessionId, ShareRowId,
    TrustedInstanceId,
};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockHttpClient, RecordedRequest};
