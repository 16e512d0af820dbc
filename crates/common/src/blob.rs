use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject used for blobs that are not associated with any subject.
pub const NULL_SUBJECT: &str = "$null";

/// Identifies a stored blob. The id is generated by the writer before
/// anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey {
    pub subject: String,
    pub id: Uuid,
}

impl BlobKey {
    pub fn new(subject: impl Into<String>, id: Uuid) -> Self {
        Self {
            subject: subject.into(),
            id,
        }
    }

    /// A key with a freshly generated random id.
    pub fn generate(subject: impl Into<String>) -> Self {
        Self::new(subject, Uuid::new_v4())
    }

    /// `<id>-<subject>`, the form used in blob URLs.
    pub fn combined_id(&self) -> String {
        format!("{}-{}", self.id, self.subject)
    }

    /// Inverse of [`BlobKey::combined_id`].
    pub fn from_combined_id(combined: &str) -> Option<Self> {
        // 36 chars of hyphenated uuid, a separator, then a non-empty subject
        if combined.len() < 38 || !combined.is_char_boundary(36) {
            return None;
        }
        let (id, rest) = combined.split_at(36);
        let id = Uuid::parse_str(id).ok()?;
        let subject = rest.strip_prefix('-')?;
        Some(Self::new(subject, id))
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.id)
    }
}

/// Tags attached to a blob.
///
/// Custom tag names are stored lower-cased; each name maps to an ordered
/// set of values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobTags {
    pub device: Option<String>,
    pub name: Option<String>,
    pub session: Option<String>,
    pub content_type: Option<String>,
    /// Only meaningful at write time. The index turns it into
    /// [`BlobInfo::expires_at`] and does not keep it.
    #[serde(skip)]
    pub time_to_live: Option<Duration>,
    pub custom_tags: BTreeMap<String, Vec<String>>,
}

/// A stored blob as seen through the metadata index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub key: BlobKey,
    pub tags: BlobTags,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlobInfo {
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= at)
    }
}

/// Converts a millisecond unix timestamp as persisted by the index.
pub fn millis_to_time(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Current time truncated to the millisecond precision the index stores.
pub fn now_millis() -> DateTime<Utc> {
    millis_to_time(Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_id_round_trip() {
        let key = BlobKey::generate("patient-1");
        let combined = key.combined_id();
        assert_eq!(BlobKey::from_combined_id(&combined), Some(key));

        let null = BlobKey::generate(NULL_SUBJECT);
        assert_eq!(
            BlobKey::from_combined_id(&null.combined_id()),
            Some(null)
        );
    }

    #[test]
    fn test_combined_id_rejects_garbage() {
        assert!(BlobKey::from_combined_id("abc").is_none());
        assert!(BlobKey::from_combined_id(&Uuid::new_v4().to_string()).is_none());
        let id = Uuid::new_v4();
        assert!(BlobKey::from_combined_id(&format!("{}-", id)).is_none());
        assert!(BlobKey::from_combined_id(&format!("{}_subject", id)).is_none());
        assert!(BlobKey::from_combined_id("😁😁😁😁😁😁😁😁😁😁-subject-subject-subject-x").is_none());
    }

    #[test]
    fn test_millis_precision() {
        let now = now_millis();
        assert_eq!(millis_to_time(now.timestamp_millis()), now);
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
