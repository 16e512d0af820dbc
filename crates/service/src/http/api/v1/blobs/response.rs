//! Blob representations shared by the blob handlers.

use axum::http::header::{CONTENT_TYPE, EXPIRES, HOST, LAST_MODIFIED};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use url::Url;

use common::blob::{BlobInfo, BlobKey};

use super::BLOBS_PATH;

/// Prefix of the response headers carrying blob tags.
pub const TAG_HEADER_PREFIX: &str = "Stash-Tag-";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn tag_header_name(tag: &str) -> String {
    format!("{}{}", TAG_HEADER_PREFIX, tag)
}

/// Scheme and authority the client used to reach us.
pub fn base_url(headers: &HeaderMap) -> Url {
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    Url::parse(&format!("http://{}/", host))
        .unwrap_or_else(|_| Url::parse("http://localhost/").expect("static url is valid"))
}

fn blob_url(base: &Url, key: &BlobKey, data: bool) -> String {
    let mut url = base.clone();
    url.set_query(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear();
        segments.extend(BLOBS_PATH.trim_start_matches('/').split('/'));
        segments.push(&key.combined_id());
        if data {
            segments.push("data");
        }
    }
    url.to_string()
}

/// Metadata URL of a blob.
pub fn location(base: &Url, key: &BlobKey) -> String {
    blob_url(base, key, false)
}

/// Payload URL of a blob.
pub fn data_location(base: &Url, key: &BlobKey) -> String {
    blob_url(base, key, true)
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// JSON representation of a blob. Custom tags become top level fields: a
/// string when single valued, an array otherwise.
pub fn blob_json(base: &Url, info: &BlobInfo) -> Value {
    let mut json = Map::new();
    json.insert("lastModified".into(), rfc3339(info.created_at).into());
    if let Some(expires_at) = info.expires_at {
        json.insert("expires".into(), rfc3339(expires_at).into());
    }

    json.insert("subject".into(), info.key.subject.clone().into());
    let tags = &info.tags;
    for (field, value) in [
        ("contentType", &tags.content_type),
        ("device", &tags.device),
        ("name", &tags.name),
        ("session", &tags.session),
    ] {
        if let Some(value) = value {
            json.insert(field.into(), value.clone().into());
        }
    }
    json.insert("location".into(), location(base, &info.key).into());
    json.insert("data".into(), data_location(base, &info.key).into());

    for (name, values) in &tags.custom_tags {
        let value = match values.as_slice() {
            [single] => Value::from(single.clone()),
            many => Value::from(many.to_vec()),
        };
        json.insert(name.clone(), value);
    }

    Value::Object(json)
}

/// Headers sent with a blob payload.
pub fn data_headers(info: &BlobInfo) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let tags = &info.tags;

    let content_type = tags.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
    append(&mut headers, CONTENT_TYPE.as_str(), content_type);
    append(&mut headers, LAST_MODIFIED.as_str(), &http_date(info.created_at));
    if let Some(expires_at) = info.expires_at {
        append(&mut headers, EXPIRES.as_str(), &http_date(expires_at));
    }

    for (tag, value) in [
        ("Device", &tags.device),
        ("Name", &tags.name),
        ("Session", &tags.session),
    ] {
        if let Some(value) = value {
            append(&mut headers, &tag_header_name(tag), value);
        }
    }
    append(&mut headers, &tag_header_name("Subject"), &info.key.subject);

    for (name, values) in &tags.custom_tags {
        for value in values {
            append(&mut headers, &tag_header_name(name), value);
        }
    }

    headers
}

fn append(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_bytes(value.as_bytes()),
    ) {
        (Ok(header), Ok(value)) => {
            headers.append(header, value);
        }
        _ => tracing::warn!(header = name, "value cannot be sent as a header"),
    }
}
