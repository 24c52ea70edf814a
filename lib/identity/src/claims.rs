//! Typed access to ID token and userinfo claims.
//!
//! Claim names come from provider configuration, so claims are kept as a
//! string-keyed JSON map and read through accessors that make a missing or
//! mistyped claim explicit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A set of claims from an ID token or userinfo response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    /// Wraps a claim map.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Builds a claim set from a JSON value; non-objects yield `None`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns the raw claim.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    /// Returns a string claim, or `None` when absent, empty or not a string.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Returns a claim rendered as a string. Numbers are accepted since some
    /// providers issue numeric user ids.
    #[must_use]
    pub fn identifier(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Returns an integer claim.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        let value = self.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    }

    /// Returns a list-of-strings claim. A single string is treated as a
    /// one-element list; non-string entries are skipped; absence yields an
    /// empty list.
    #[must_use]
    pub fn strings(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Returns whether the `aud` claim equals or contains `client_id`.
    #[must_use]
    pub fn audience_contains(&self, client_id: &str) -> bool {
        match self.get("aud") {
            Some(Value::String(aud)) => aud == client_id,
            Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(client_id)),
            _ => false,
        }
    }
}
