//! ID token verification.
//!
//! Verification is parameterised by an immutable [`VerificationConfig`]
//! passed into every call; there is no process-wide leeway or algorithm
//! registry.

use crate::claims::ClaimSet;
use crate::error::TokenError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use rootcause::prelude::Report;
use serde_json::{Map, Value};
use std::fmt;

/// Clock-skew leeway applied to time-bound claims.
pub const DEFAULT_LEEWAY_SECONDS: u64 = 60;

/// Leeway and algorithm allowlist for ID token verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    leeway_seconds: u64,
    allowed_algorithms: Vec<Algorithm>,
}

impl VerificationConfig {
    /// Creates a configuration.
    #[must_use]
    pub fn new(leeway_seconds: u64, allowed_algorithms: Vec<Algorithm>) -> Self {
        Self {
            leeway_seconds,
            allowed_algorithms,
        }
    }

    /// Clock-skew leeway in seconds.
    #[must_use]
    pub fn leeway_seconds(&self) -> u64 {
        self.leeway_seconds
    }

    /// Algorithms a token may be signed with.
    #[must_use]
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    fn allows(&self, alg: Algorithm) -> bool {
        self.allowed_algorithms.contains(&alg)
    }
}

impl Default for VerificationConfig {
    /// Every algorithm jsonwebtoken supports, 60 seconds leeway. Key family
    /// checks prevent an HMAC token from verifying against a public key.
    fn default() -> Self {
        Self::new(
            DEFAULT_LEEWAY_SECONDS,
            vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
                Algorithm::ES256,
                Algorithm::ES384,
                Algorithm::EdDSA,
                Algorithm::HS256,
                Algorithm::HS384,
                Algorithm::HS512,
            ],
        )
    }
}

struct KeyEntry {
    kid: Option<String>,
    key: DecodingKey,
}

/// Decoding keys from a provider's JWKS document.
pub struct KeySet {
    keys: Vec<KeyEntry>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field(
                "kids",
                &self.keys.iter().map(|k| k.kid.as_deref()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl KeySet {
    /// Parses a JWKS document.
    ///
    /// Keys that cannot be decoded (unknown key types, encryption keys) are
    /// skipped. A document with no usable key is an error.
    pub fn from_json(document: &[u8]) -> Result<Self, Report<TokenError>> {
        let value: Value =
            serde_json::from_slice(document).map_err(|e| TokenError::InvalidKeySet {
                details: e.to_string(),
            })?;
        let raw_keys = value
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| TokenError::InvalidKeySet {
                details: "document has no 'keys' array".to_string(),
            })?;

        let mut keys = Vec::with_capacity(raw_keys.len());
        for raw in raw_keys {
            let jwk: Jwk = match serde_json::from_value(raw.clone()) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable JWK");
                    continue;
                }
            };
            match decoding_key(&jwk) {
                Some(key) => keys.push(KeyEntry {
                    kid: jwk.common.key_id.clone(),
                    key,
                }),
                None => {
                    tracing::debug!(kid = ?jwk.common.key_id, "skipping unsupported JWK");
                }
            }
        }

        if keys.is_empty() {
            return Err(TokenError::InvalidKeySet {
                details: "no usable keys".to_string(),
            }
            .into());
        }
        Ok(Self { keys })
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Picks the key for a token.
    ///
    /// A single key without a key id acts as the default key, both for
    /// tokens without a `kid` and for tokens whose `kid` matches nothing.
    fn select(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        if let Some(kid) = kid {
            if let Some(entry) = self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)) {
                return Some(&entry.key);
            }
        }
        match self.keys.as_slice() {
            [only] if kid.is_none() || only.kid.is_none() => Some(&only.key),
            _ if kid.is_none() => {
                let mut unnamed = self.keys.iter().filter(|k| k.kid.is_none());
                match (unnamed.next(), unnamed.next()) {
                    (Some(entry), None) => Some(&entry.key),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x).ok(),
        AlgorithmParameters::OctetKey(oct) => URL_SAFE_NO_PAD
            .decode(oct.value.trim_end_matches('='))
            .ok()
            .map(|secret| DecodingKey::from_secret(&secret)),
    }
}

/// Verifies an ID token's signature and expiry and returns its claims.
///
/// The signature is checked first, with `leeway_seconds` applied to `nbf`.
/// The token then fails with [`TokenError::Expired`] when `exp` is at or
/// before `now`. Audience and nonce are left to the caller.
pub fn verify_id_token(
    token: &str,
    keys: &KeySet,
    config: &VerificationConfig,
    now: i64,
) -> Result<ClaimSet, Report<TokenError>> {
    let header = decode_header(token).map_err(|e| TokenError::Malformed {
        details: e.to_string(),
    })?;

    if !config.allows(header.alg) {
        return Err(TokenError::UnsupportedAlgorithm {
            algorithm: format!("{:?}", header.alg),
        }
        .into());
    }

    let key = keys
        .select(header.kid.as_deref())
        .ok_or_else(|| TokenError::NoMatchingKey {
            kid: header.kid.clone(),
        })?;

    let mut validation = Validation::new(header.alg);
    validation.leeway = config.leeway_seconds();
    validation.validate_exp = false;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Map<String, Value>>(token, key, &validation).map_err(|e| {
        match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::ImmatureSignature => {
                TokenError::InvalidSignature {
                    details: e.to_string(),
                }
            }
            ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm {
                algorithm: format!("{:?}", header.alg),
            },
            _ => TokenError::Malformed {
                details: e.to_string(),
            },
        }
    })?;

    let claims = ClaimSet::new(data.claims);
    let exp = claims.integer("exp").ok_or_else(|| TokenError::Malformed {
        details: "exp claim is not a number".to_string(),
    })?;
    if exp <= now {
        return Err(TokenError::Expired { exp }.into());
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TEST_KID, jwks_document, sign, sign_with_secret};
    use serde_json::json;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn keys() -> KeySet {
        KeySet::from_json(jwks_document(Some(TEST_KID)).to_string().as_bytes()).expect("keys")
    }

    #[test]
    fn valid_token_yields_claims() {
        let token = sign(&json!({"sub": "alice", "exp": now() + 300}), Some(TEST_KID));
        let claims =
            verify_id_token(&token, &keys(), &VerificationConfig::default(), now()).expect("valid");
        assert_eq!(claims.string("sub"), Some("alice"));
    }

    #[test]
    fn expired_token_fails_after_signature_check() {
        let token = sign(&json!({"sub": "alice", "exp": now() - 10}), Some(TEST_KID));
        let err = verify_id_token(&token, &keys(), &VerificationConfig::default(), now())
            .expect_err("expired");
        assert!(matches!(err.current_context(), TokenError::Expired { .. }));
    }

    #[test]
    fn exp_equal_to_now_is_expired() {
        let at = now();
        let token = sign(&json!({"sub": "alice", "exp": at}), Some(TEST_KID));
        let err = verify_id_token(&token, &keys(), &VerificationConfig::default(), at)
            .expect_err("expired");
        assert_eq!(err.current_context(), &TokenError::Expired { exp: at });
    }

    #[test]
    fn wrong_signature_wins_over_expiry() {
        let token = sign_with_secret(
            &json!({"sub": "alice", "exp": now() - 10}),
            Some(TEST_KID),
            b"another-secret-entirely-32bytes!",
        );
        let err = verify_id_token(&token, &keys(), &VerificationConfig::default(), now())
            .expect_err("bad signature");
        assert!(matches!(
            err.current_context(),
            TokenError::InvalidSignature { .. }
        ));
    }

    #[test]
    fn disallowed_algorithm_is_rejected() {
        let token = sign(&json!({"sub": "alice", "exp": now() + 300}), Some(TEST_KID));
        let config = VerificationConfig::new(60, vec![Algorithm::RS256]);
        let err = verify_id_token(&token, &keys(), &config, now()).expect_err("alg");
        assert!(matches!(
            err.current_context(),
            TokenError::UnsupportedAlgorithm { .. }
        ));
    }

    #[test]
    fn single_key_without_kid_is_default() {
        let keys =
            KeySet::from_json(jwks_document(None).to_string().as_bytes()).expect("keys");
        let with_kid = sign(&json!({"sub": "a", "exp": now() + 300}), Some("rotated"));
        let without_kid = sign(&json!({"sub": "a", "exp": now() + 300}), None);

        let config = VerificationConfig::default();
        assert!(verify_id_token(&with_kid, &keys, &config, now()).is_ok());
        assert!(verify_id_token(&without_kid, &keys, &config, now()).is_ok());
    }

    #[test]
    fn unknown_kid_with_named_keys_fails() {
        let token = sign(&json!({"sub": "a", "exp": now() + 300}), Some("unknown"));
        let err = verify_id_token(&token, &keys(), &VerificationConfig::default(), now())
            .expect_err("no key");
        assert!(matches!(
            err.current_context(),
            TokenError::NoMatchingKey { .. }
        ));
    }

    #[test]
    fn key_set_skips_unusable_keys() {
        let mut document = jwks_document(Some(TEST_KID));
        document["keys"]
            .as_array_mut()
            .expect("array")
            .push(json!({"kty": "unknown", "kid": "junk"}));
        let keys = KeySet::from_json(document.to_string().as_bytes()).expect("keys");
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn empty_key_set_is_rejected() {
        assert!(KeySet::from_json(br#"{"keys": []}"#).is_err());
        assert!(KeySet::from_json(b"not json").is_err());
    }
}
