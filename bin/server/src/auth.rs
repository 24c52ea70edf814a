//! Local user extractors.
//!
//! The host platform authenticates its users and forwards the user id in a
//! trusted header (`user_header` in the configuration). The server never
//! authenticates local users itself.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::sync::Arc;
use vo_federation_identity::RequestContext;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Extractor for requiring a local user.
pub struct LocalUser(pub String);

impl<S> FromRequestParts<S> for LocalUser
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let uid = parts
            .headers
            .get(app_state.config.user_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .ok_or(ApiError::NotAuthenticated)?;

        Ok(LocalUser(uid.to_string()))
    }
}

/// Extractor for requiring a local administrator.
pub struct AdminUser(pub String);

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let LocalUser(uid) = LocalUser::from_request_parts(parts, state).await?;

        let app_state = Arc::<AppState>::from_ref(state);
        if !app_state.config.is_admin(&uid) {
            return Err(ApiError::AdminRequired);
        }

        Ok(AdminUser(uid))
    }
}

/// Whether the request reached the fronting proxy over https.
///
/// Falls back to the scheme of the public URL when the proxy does not
/// forward the protocol.
pub fn request_context(headers: &HeaderMap, public_url: &str) -> RequestContext {
    let secure = match headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
    {
        Some(proto) => proto.eq_ignore_ascii_case("https"),
        None => public_url.starts_with("https://"),
    };
    RequestContext { secure }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_proto_wins_over_public_url() {
        let mut headers = HeaderMap::new();
        assert!(request_context(&headers, "https://cloud.example").secure);
        assert!(!request_context(&headers, "http://cloud.example").secure);

        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("http"));
        assert!(!request_context(&headers, "https://cloud.example").secure);
        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("HTTPS"));
        assert!(request_context(&headers, "http://cloud.example").secure);
    }
}
