//! Canned-response [`HttpClient`] for tests in this and dependent crates.
//!
//! Available under `cfg(test)` and the `test-utils` feature.

use crate::http::{Header, HttpClient, HttpError, HttpResponse};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::{Mutex, PoisonError};

/// A request recorded by [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// `GET` or `POST`.
    pub method: &'static str,
    /// Full request URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<Header>,
    /// Form fields for form posts.
    pub form: Vec<(String, String)>,
    /// Body for JSON posts.
    pub json: Option<serde_json::Value>,
}

impl RecordedRequest {
    /// Returns the value of a form field.
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

enum MockReply {
    Respond(HttpResponse),
    Fail,
}

/// An [`HttpClient`] answering from canned responses (for testing).
///
/// Responses are keyed by method and exact URL. Unknown routes fail with a
/// transport error. Every request is recorded so tests can assert on call
/// counts and payloads.
#[derive(Default)]
pub struct MockHttpClient {
    routes: Mutex<Vec<(&'static str, String, MockReply)>>,
    calls: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    /// Creates a client with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `method url` with the given status and JSON body.
    pub fn respond_json(&self, method: &'static str, url: &str, status: u16, body: &serde_json::Value) {
        self.respond(method, url, HttpResponse::new(status, body.to_string()));
    }

    /// Answers `method url` with the given response.
    pub fn respond(&self, method: &'static str, url: &str, response: HttpResponse) {
        self.set_route(method, url, MockReply::Respond(response));
    }

    /// Makes `method url` fail with a transport error.
    pub fn fail(&self, method: &'static str, url: &str) {
        self.set_route(method, url, MockReply::Fail);
    }

    fn set_route(&self, method: &'static str, url: &str, reply: MockReply) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.retain(|(m, u, _)| !(*m == method && u == url));
        routes.push((method, url.to_string(), reply));
    }

    /// Returns every recorded request in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the total number of requests made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns the number of requests made to a URL.
    #[must_use]
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.url == url)
            .count()
    }

    fn dispatch(&self, request: RecordedRequest) -> Result<HttpResponse, Report<HttpError>> {
        let method = request.method;
        let url = request.url.clone();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes.iter().find(|(m, u, _)| *m == method && *u == url) {
            Some((_, _, MockReply::Respond(response))) => Ok(response.clone()),
            Some((_, _, MockReply::Fail)) => Err(HttpError::Transport {
                url,
                details: "connection refused".to_string(),
            }
            .into()),
            None => Err(HttpError::Transport {
                url,
                details: "no route configured".to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &[Header]) -> Result<HttpResponse, Report<HttpError>> {
        self.dispatch(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            headers: headers.to_vec(),
            form: Vec::new(),
            json: None,
        })
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>> {
        self.dispatch(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            headers: headers.to_vec(),
            form: form.to_vec(),
            json: None,
        })
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[Header],
    ) -> Result<HttpResponse, Report<HttpError>> {
        self.dispatch(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            headers: headers.to_vec(),
            form: Vec::new(),
            json: Some(body.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_fails_unknown_routes() {
        let mock = MockHttpClient::new();
        mock.respond_json("GET", "https://idp/jwks", 200, &serde_json::json!({"keys": []}));
        mock.fail("GET", "https://idp/down");

        let ok = mock.get("https://idp/jwks", &[]).await.expect("configured");
        assert!(ok.is_success());
        assert!(mock.get("https://idp/other", &[]).await.is_err());
        assert!(mock.get("https://idp/down", &[]).await.is_err());

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.calls_to("https://idp/jwks"), 1);
        assert_eq!(mock.calls()[0].method, "GET");
    }
}
