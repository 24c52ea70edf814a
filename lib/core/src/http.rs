//! Outbound HTTP seam.
//!
//! Every network call the services make (token exchange, JWKS, userinfo,
//! remote share notifications) goes through [`HttpClient`] so the call
//! sequence can be asserted in tests and the transport timeout lives in one
//! place.

use async_trait::async_trait;
use base64::Engine;
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

use crate::error::{Classify, ErrorClass};

/// A single request header.
pub type Header = (String, String);

/// Builds an `Authorization: Bearer` header.
#[must_use]
pub fn bearer(token: &str) -> Header {
    ("Authorization".to_string(), format!("Bearer {token}"))
}

/// Builds an `Authorization: Basic` header from client credentials.
#[must_use]
pub fn basic(user: &str, password: &str) -> Header {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    ("Authorization".to_string(), format!("Basic {encoded}"))
}

/// Raw response: status code and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Report<HttpError>> {
        serde_json::from_slice(&self.body).map_err(|e| {
            HttpError::InvalidBody {
                details: e.to_string(),
            }
            .into()
        })
    }
}

/// Errors from outbound HTTP calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The request could not be sent or the connection failed.
    Transport { url: String, details: String },
    /// The request did not complete within the configured timeout.
    Timeout { url: String },
    /// The response body was not what the caller expected.
    InvalidBody { details: String },
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { url, details } => {
                write!(f, "request to '{url}' failed: {details}")
            }
            Self::Timeout { url } => write!(f, "request to '{url}' timed out"),
            Self::InvalidBody { details } => write!(f, "invalid response body: {details}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl Classify for HttpError {
    fn class(&self) -> ErrorClass {
        ErrorClass::UpstreamTransport
    }
}

/// Minimal HTTP client used for all outbound calls.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    async fn get(&self, url: &str, headers: &[Header]) -> Result<HttpResponse, Report<HttpError>>;

    /// Sends a form-encoded POST request.
    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>>;

    /// Sends a JSON POST request.
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>>;
}

/// [`HttpClient`] backed by reqwest.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Creates a client with the given per-request timeout.
    ///
    /// Redirects are not followed; identity provider endpoints are expected
    /// to answer directly.
    pub fn new(timeout: Duration) -> Result<Self, Report<HttpError>> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Transport {
                url: String::new(),
                details: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>> {
        let mut request = request;
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| map_reqwest_error(url, &e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?;

        tracing::debug!(url, status, bytes = body.len(), "outbound request completed");

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(url: &str, error: &reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::Timeout {
            url: url.to_string(),
        }
    } else {
        HttpError::Transport {
            url: url.to_string(),
            details: error.to_string(),
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &[Header]) -> Result<HttpResponse, Report<HttpError>> {
        self.send(url, self.client.get(url), headers).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>> {
        self.send(url, self.client.post(url).form(form), headers)
            .await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>> {
        self.send(url, self.client.post(url).json(body), headers)
            .await
    }
}
