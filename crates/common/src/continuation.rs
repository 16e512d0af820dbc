//! Opaque search cursors.
//!
//! A token wraps the sort position of the last item of a page as
//! URL-safe, unpadded base64 of a small JSON object. Tokens are not signed;
//! the index only ever uses them as a query bound.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexError;

/// Position to resume a search after.
///
/// `id` is only set when the next item shares `created_at_ms` with the last
/// returned one, so the timestamp alone cannot separate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    #[serde(rename = "ts")]
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn encode(created_at_ms: i64, id: Option<Uuid>) -> Self {
        Continuation { created_at_ms, id }.into()
    }

    pub fn decode(&self) -> Result<Continuation, IndexError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| IndexError::InvalidContinuationToken)?;
        serde_json::from_slice(&bytes).map_err(|_| IndexError::InvalidContinuationToken)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Continuation> for ContinuationToken {
    fn from(continuation: Continuation) -> Self {
        // serializing an i64 and an optional uuid cannot fail
        let json = serde_json::to_vec(&continuation).unwrap_or_default();
        Self(URL_SAFE_NO_PAD.encode(json))
    }
}

impl From<String> for ContinuationToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for ContinuationToken {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
