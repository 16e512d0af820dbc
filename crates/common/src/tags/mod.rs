//! Tag parsing and validation for incoming blobs.

mod duration;
pub mod validate;

use std::collections::BTreeMap;

pub use duration::parse_duration;

use crate::blob::{BlobTags, NULL_SUBJECT};
use crate::error::TagError;

pub const SUBJECT_TAG: &str = "subject";
pub const DEVICE_TAG: &str = "device";
pub const NAME_TAG: &str = "name";
pub const SESSION_TAG: &str = "session";
pub const TIME_TO_LIVE_TAG: &str = "_ttl";
/// Alternate spelling of [`TIME_TO_LIVE_TAG`].
pub const TTL_TAG: &str = "ttl";

/// Tags matched against dedicated single-valued index columns.
pub const SYSTEM_TAGS: &[&str] = &[SUBJECT_TAG, DEVICE_TAG, NAME_TAG, SESSION_TAG];

/// Multi-valued tag map keyed by lower-cased tag name.
pub type TagMap = BTreeMap<String, Vec<String>>;

/// Builds a [`TagMap`] from raw name/value pairs, folding names to lower case
/// and merging values of names that differ only by case.
pub fn normalize_tag_map<I, K, V>(pairs: I) -> TagMap
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut map = TagMap::new();
    for (name, value) in pairs {
        map.entry(name.as_ref().to_lowercase())
            .or_default()
            .push(value.into());
    }
    map
}

/// Validated tags of a blob about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTags {
    pub subject: String,
    pub tags: BlobTags,
}

/// Validates a tag map and splits it into the subject and [`BlobTags`].
///
/// Nothing is partially applied: the first invalid tag fails the whole map.
pub fn parse_blob_tags(mut tags: TagMap, content_type: Option<&str>) -> Result<ParsedTags, TagError> {
    let mut subject_values = tags.remove(SUBJECT_TAG).ok_or_else(|| {
        TagError::InvalidTag(format!(
            "The subject tag is missing and must be provided. If no subject is associated with the blob, specify `{}`",
            NULL_SUBJECT
        ))
    })?;
    validate::run(validate::SUBJECT, SUBJECT_TAG, &subject_values)?;
    let subject = subject_values.swap_remove(0);

    if tags.contains_key(TIME_TO_LIVE_TAG) && tags.contains_key(TTL_TAG) {
        return Err(TagError::InvalidTag(format!(
            "only one of '{}' and '{}' can be given",
            TTL_TAG, TIME_TO_LIVE_TAG
        )));
    }

    let mut blob_tags = BlobTags {
        content_type: content_type
            .filter(|content_type| !content_type.is_empty())
            .map(str::to_string),
        ..Default::default()
    };

    for (name, values) in tags {
        match name.as_str() {
            DEVICE_TAG => blob_tags.device = Some(single_system_value(&name, values)?),
            NAME_TAG => blob_tags.name = Some(single_system_value(&name, values)?),
            SESSION_TAG => blob_tags.session = Some(single_system_value(&name, values)?),
            TIME_TO_LIVE_TAG | TTL_TAG => {
                validate::run(validate::TIME_TO_LIVE, &name, &values)?;
                let ttl = parse_duration(&values[0]).map_err(|reason| {
                    TagError::InvalidTimeToLive {
                        value: values[0].clone(),
                        reason,
                    }
                })?;
                blob_tags.time_to_live = Some(ttl);
            }
            _ => {
                validate::run(validate::COMMON, &name, &values)?;
                blob_tags.custom_tags.insert(name, dedup(values));
            }
        }
    }

    Ok(ParsedTags {
        subject,
        tags: blob_tags,
    })
}

fn single_system_value(name: &str, mut values: Vec<String>) -> Result<String, TagError> {
    validate::run(validate::SYSTEM, name, &values)?;
    Ok(values.swap_remove(0))
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<ParsedTags, TagError> {
        parse_blob_tags(normalize_tag_map(pairs.iter().copied()), Some("text/plain"))
    }

    #[test]
    fn test_parse_system_and_custom_tags() {
        let parsed = parse(&[
            ("subject", "s1"),
            ("Name", "myname"),
            ("device", "mydevice"),
            ("session", "sess"),
            ("mytag", "TAGVALUE1"),
            ("MYTAG", "TAGVALUE2"),
            ("_ttl", "5m"),
        ])
        .unwrap();

        assert_eq!(parsed.subject, "s1");
        assert_eq!(parsed.tags.name.as_deref(), Some("myname"));
        assert_eq!(parsed.tags.device.as_deref(), Some("mydevice"));
        assert_eq!(parsed.tags.session.as_deref(), Some("sess"));
        assert_eq!(parsed.tags.content_type.as_deref(), Some("text/plain"));
        assert_eq!(parsed.tags.time_to_live, Some(Duration::from_secs(300)));
        assert_eq!(
            parsed.tags.custom_tags.get("mytag").unwrap(),
            &vec!["TAGVALUE1".to_string(), "TAGVALUE2".to_string()]
        );
    }

    #[test]
    fn test_ttl_spellings() {
        let parsed = parse(&[("subject", "s"), ("ttl", "0s")]).unwrap();
        assert_eq!(parsed.tags.time_to_live, Some(Duration::ZERO));
        assert!(parsed.tags.custom_tags.is_empty());

        let parsed = parse(&[("subject", "s"), ("TTL", "1h30m")]).unwrap();
        assert_eq!(parsed.tags.time_to_live, Some(Duration::from_secs(5400)));

        let err = parse(&[("subject", "s"), ("ttl", "1m"), ("_ttl", "1m")]).unwrap_err();
        assert_eq!(err.code(), "InvalidTag");

        let err = parse(&[("subject", "s"), ("ttl", "-1m")]).unwrap_err();
        assert!(matches!(err, TagError::InvalidTimeToLive { .. }));
    }

    #[test]
    fn test_duplicate_custom_values_collapse() {
        let parsed = parse(&[("subject", "s"), ("a", "x"), ("A", "x"), ("a", "y")]).unwrap();
        assert_eq!(parsed.tags.custom_tags["a"], vec!["x", "y"]);
    }

    #[test]
    fn test_empty_content_type_is_absent() {
        let parsed = parse_blob_tags(normalize_tag_map([("subject", "s")]), Some("")).unwrap();
        assert!(parsed.tags.content_type.is_none());
    }

    #[test]
    fn test_invalid_tag_maps() {
        let long_name = "a".repeat(65);
        let long_value = "a".repeat(200);
        let cases: Vec<(&str, Vec<(&str, &str)>, &str)> = vec![
            ("leading underscore", vec![("subject", "s"), ("_r", "s")], "InvalidTag"),
            ("unsupported char", vec![("subject", "s"), ("a*", "s")], "InvalidTag"),
            ("name too long", vec![("subject", "s"), (long_name.as_str(), "abc")], "InvalidTag"),
            ("location", vec![("subject", "s"), ("location", "l")], "InvalidTag"),
            ("last modified", vec![("subject", "s"), ("lastModified", "x")], "InvalidTag"),
            ("bad ttl", vec![("subject", "s"), ("_ttl", "not-an-interval")], "InvalidTag"),
            ("negative ttl", vec![("subject", "s"), ("_ttl", "-1h")], "InvalidTag"),
            ("many subjects", vec![("subject", "s"), ("subject", "s2")], "InvalidSubject"),
            ("empty subject", vec![("subject", "")], "InvalidSubject"),
            ("no subject", vec![], "InvalidTag"),
            ("many devices", vec![("subject", "s"), ("device", "d1"), ("device", "d2")], "InvalidTag"),
            ("many names", vec![("subject", "s"), ("name", "n1"), ("name", "n2")], "InvalidTag"),
            ("many sessions", vec![("subject", "s"), ("session", "a"), ("session", "b")], "InvalidTag"),
            ("value too long", vec![("subject", "s"), ("a", long_value.as_str())], "InvalidTag"),
        ];

        for (case, pairs, code) in cases {
            let err = parse(&pairs).expect_err(case);
            assert_eq!(err.code(), code, "{}", case);
        }
    }

    #[test]
    fn test_null_subject_and_unicode() {
        let parsed = parse(&[("subject", "$null"), ("name", "😁"), ("mytag", "😀")]).unwrap();
        assert_eq!(parsed.subject, NULL_SUBJECT);
        assert_eq!(parsed.tags.name.as_deref(), Some("😁"));
        assert_eq!(parsed.tags.custom_tags["mytag"], vec!["😀"]);
    }
}
