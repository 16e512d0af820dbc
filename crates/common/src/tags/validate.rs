//! Tag validation steps.
//!
//! Each step is a plain function over a tag name and its values. Steps are
//! composed into ordered chains and applied left to right; the first failing
//! step wins.

use std::sync::OnceLock;

use regex::Regex;

use super::duration::parse_duration;
use crate::error::TagError;

/// Longest accepted tag value, in characters.
pub const MAX_TAG_VALUE_CHARS: usize = 128;

const RESERVED_TAG_NAMES: &[&str] = &[
    "location",
    "last-modified",
    "lastmodified",
    "content-type",
    "contenttype",
    "subject",
];

const NULL_TAG_NAME: &str = "$null";

pub type TagValidator = fn(&str, &[String]) -> Result<(), TagError>;

/// Every tag: name shape, reserved names, value lengths.
pub const COMMON: &[TagValidator] = &[validate_name, validate_not_reserved, validate_value_lengths];

/// `device`, `name`, `session`.
pub const SYSTEM: &[TagValidator] = &[
    validate_name,
    validate_not_reserved,
    validate_value_lengths,
    validate_single_value,
];

/// The subject is a reserved name, so its chain skips the reserved check.
pub const SUBJECT: &[TagValidator] = &[
    validate_name,
    validate_value_lengths,
    validate_single_subject,
    validate_subject_value,
];

/// The time-to-live (`ttl` or `_ttl`) is never stored as a tag, so only its
/// value is checked.
pub const TIME_TO_LIVE: &[TagValidator] = &[
    validate_value_lengths,
    validate_single_value,
    validate_time_to_live,
];

pub fn run(chain: &[TagValidator], tag_name: &str, tag_values: &[String]) -> Result<(), TagError> {
    chain
        .iter()
        .try_for_each(|validator| validator(tag_name, tag_values))
}

fn tag_name_regex() -> &'static Regex {
    static TAG_NAME: OnceLock<Regex> = OnceLock::new();
    TAG_NAME.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9_\-]{0,63}$").expect("tag name pattern is valid")
    })
}

pub fn validate_name(tag_name: &str, _: &[String]) -> Result<(), TagError> {
    if tag_name == NULL_TAG_NAME || tag_name_regex().is_match(tag_name) {
        return Ok(());
    }

    Err(TagError::InvalidTag(format!(
        "tag name '{}' is invalid: it must be '$null' or start with a letter a-z, followed by up to 63 letters (a-z), numbers, hyphens, or underscores",
        tag_name
    )))
}

pub fn validate_not_reserved(tag_name: &str, _: &[String]) -> Result<(), TagError> {
    if RESERVED_TAG_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(tag_name))
    {
        return Err(TagError::InvalidTag(format!(
            "tag name '{}' is reserved",
            tag_name
        )));
    }
    Ok(())
}

pub fn validate_value_lengths(tag_name: &str, tag_values: &[String]) -> Result<(), TagError> {
    if tag_values
        .iter()
        .any(|value| value.chars().count() > MAX_TAG_VALUE_CHARS)
    {
        return Err(TagError::InvalidTag(format!(
            "the value for tag '{}' is longer than {} UTF-8 characters",
            tag_name, MAX_TAG_VALUE_CHARS
        )));
    }
    Ok(())
}

pub fn validate_single_value(tag_name: &str, tag_values: &[String]) -> Result<(), TagError> {
    if tag_values.len() != 1 {
        return Err(TagError::InvalidTag(format!(
            "only one value for tag '{}' can be given",
            tag_name
        )));
    }
    Ok(())
}

fn validate_single_subject(_: &str, tag_values: &[String]) -> Result<(), TagError> {
    if tag_values.len() != 1 {
        return Err(TagError::InvalidSubject(
            "only one value for the subject tag can be given".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_subject_value(_: &str, tag_values: &[String]) -> Result<(), TagError> {
    if tag_values.first().map_or(true, String::is_empty) {
        return Err(TagError::InvalidSubject(
            "the subject tag cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_time_to_live(_: &str, tag_values: &[String]) -> Result<(), TagError> {
    for value in tag_values {
        parse_duration(value).map_err(|reason| TagError::InvalidTimeToLive {
            value: value.clone(),
            reason,
        })?;
    }
    Ok(())
}
