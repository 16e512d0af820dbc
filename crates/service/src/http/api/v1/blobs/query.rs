//! Query string handling for blob requests.
//!
//! Tags travel as repeated query parameters, which serde based extractors
//! would collapse, so the raw query is decoded here.

use chrono::{DateTime, Utc};

use common::continuation::ContinuationToken;
use common::index::{clamp_page_size, SearchQuery};
use common::tags::{normalize_tag_map, TagMap, SUBJECT_TAG};

use crate::http::error::ApiError;

const AT_PARAM: &str = "_at";
const LIMIT_PARAM: &str = "_limit";
pub const CONTINUATION_PARAM: &str = "_ct";

/// Decode a raw query string into a tag map with lower-cased names.
pub fn tag_map(raw_query: Option<&str>) -> TagMap {
    let query = raw_query.unwrap_or_default();
    normalize_tag_map(url::form_urlencoded::parse(query.as_bytes()).into_owned())
}

/// Split a search request into the tag filter and its paging parameters.
pub fn search_query(raw_query: Option<&str>) -> Result<SearchQuery, ApiError> {
    let mut tags = tag_map(raw_query);

    if !tags.contains_key(SUBJECT_TAG) {
        return Err(ApiError::InvalidQuery(
            "'subject' query parameter is mandatory. To search for blobs not associated with a subject, specify 'subject=$null'".to_string(),
        ));
    }

    let at = match tags.remove(AT_PARAM) {
        Some(values) => Some(parse_at(&values)?),
        None => None,
    };

    let page_size = tags
        .remove(LIMIT_PARAM)
        .and_then(|values| values.first().and_then(|v| v.parse::<i64>().ok()));

    let continuation = match tags.remove(CONTINUATION_PARAM) {
        Some(values) if values.len() > 1 => {
            return Err(ApiError::InvalidContinuationToken(
                "The '_ct' parameter was specified multiple times in the URL.".to_string(),
            ))
        }
        Some(mut values) => values.pop().map(ContinuationToken::from),
        None => None,
    };

    let mut query = SearchQuery::new(tags).page_size(clamp_page_size(page_size));
    if let Some(at) = at {
        query = query.at(at);
    }
    if let Some(token) = continuation {
        query = query.continuation(token);
    }
    Ok(query)
}

fn parse_at(values: &[String]) -> Result<DateTime<Utc>, ApiError> {
    match values {
        [value] => DateTime::parse_from_rfc3339(value)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|_| {
                ApiError::InvalidParameter(
                    "The format of the '_at' parameter is invalid.".to_string(),
                )
            }),
        _ => Err(ApiError::InvalidParameter(
            "The '_at' parameter was specified multiple times in the URL.".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_tag_map_merges_case_and_repeats() {
        let tags = tag_map(Some("subject=s&MyTag=a&mytag=b&name=N%20x"));
        assert_eq!(tags["subject"], vec!["s"]);
        assert_eq!(tags["mytag"], vec!["a", "b"]);
        assert_eq!(tags["name"], vec!["N x"]);
        assert!(tag_map(None).is_empty());
    }

    #[test]
    fn test_search_query() {
        let query =
            search_query(Some("subject=s&_AT=2021-10-18T16:56:15.693%2B01:00&_limit=3&t=v&_ct=abc"))
                .unwrap();
        assert_eq!(
            query.at,
            Some(Utc.with_ymd_and_hms(2021, 10, 18, 15, 56, 15).unwrap() + chrono::Duration::milliseconds(693))
        );
        assert_eq!(query.page_size, 3);
        assert_eq!(query.continuation, Some(ContinuationToken::from("abc")));
        assert_eq!(query.filter.len(), 2);
        assert_eq!(query.filter["t"], vec!["v"]);
    }

    #[test]
    fn test_search_query_limits() {
        for (limit, expected) in [("0", 100), ("101", 100), ("abc", 100), ("-1", 100), ("50", 50)] {
            let query = search_query(Some(&format!("subject=s&_limit={}", limit))).unwrap();
            assert_eq!(query.page_size, expected, "limit {}", limit);
        }
        assert_eq!(search_query(Some("subject=s")).unwrap().page_size, 100);
    }

    #[test]
    fn test_search_query_rejects_bad_parameters() {
        assert!(matches!(
            search_query(Some("name=x")),
            Err(ApiError::InvalidQuery(_))
        ));
        assert!(matches!(
            search_query(Some("subject=s&_at=yesterday")),
            Err(ApiError::InvalidParameter(_))
        ));
        assert!(matches!(
            search_query(Some("subject=s&_at=2021-10-18T16:56:15Z&_at=2021-10-18T16:56:15Z")),
            Err(ApiError::InvalidParameter(_))
        ));
        assert!(matches!(
            search_query(Some("subject=s&_ct=a&_ct=b")),
            Err(ApiError::InvalidContinuationToken(_))
        ));
    }
}
