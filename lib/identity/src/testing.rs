//! Token signing helpers for tests.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

pub(crate) const TEST_KID: &str = "test-key-1";

pub(crate) const TEST_SECRET: &[u8] = b"vo-federation-test-signing-key!!";

/// A JWKS document holding the test HMAC key.
pub(crate) fn jwks_document(kid: Option<&str>) -> Value {
    let mut key = json!({
        "kty": "oct",
        "k": URL_SAFE_NO_PAD.encode(TEST_SECRET),
        "alg": "HS256",
    });
    if let Some(kid) = kid {
        key["kid"] = json!(kid);
    }
    json!({ "keys": [key] })
}

/// Signs claims with the test key.
pub(crate) fn sign(claims: &Value, kid: Option<&str>) -> String {
    sign_with_secret(claims, kid, TEST_SECRET)
}

pub(crate) fn sign_with_secret(claims: &Value, kid: Option<&str>, secret: &[u8]) -> String {
    let header = Header {
        kid: kid.map(str::to_string),
        ..Header::new(Algorithm::HS256)
    };
    encode(&header, claims, &EncodingKey::from_secret(secret)).expect("sign token")
}
