use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::blob::{BlobInfo, BlobKey, BlobTags};
use crate::continuation::ContinuationToken;
use crate::error::IndexError;
use crate::index::{MetadataIndex, SearchQuery};
use crate::tags::{normalize_tag_map, TagMap};

fn unique_subject(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn tags_with(custom: &[(&str, &str)]) -> BlobTags {
    BlobTags {
        custom_tags: normalize_tag_map(custom.iter().copied()),
        ..Default::default()
    }
}

fn subject_filter(subject: &str) -> TagMap {
    normalize_tag_map([("subject", subject)])
}

async fn stage_and_complete(
    index: &dyn MetadataIndex,
    subject: &str,
    tags: &BlobTags,
) -> Result<BlobInfo, IndexError> {
    let key = BlobKey::generate(subject);
    let info = index.stage(&key, tags).await?;
    index.complete(&key).await?;
    Ok(info)
}

/// Run the full metadata index conformance suite.
///
/// # Errors
///
/// Returns the first unexpected index error. Behavioral mismatches panic.
pub async fn run_index_conformance_tests(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    test_health_check(index).await?;
    test_staged_records_are_invisible(index).await?;
    test_completed_record_matches_staged(index).await?;
    test_revert_removes_staged_record(index).await?;
    test_delete_is_idempotent(index).await?;
    test_stage_rejects_existing_key(index).await?;
    test_repeated_filter_values_are_anded(index).await?;
    test_system_tag_filters(index).await?;
    test_tag_case_sensitivity(index).await?;
    test_pagination_visits_every_record(index).await?;
    test_search_at(index).await?;
    test_expiration_visibility(index).await?;
    test_invalid_continuation_token(index).await?;
    test_scan_stale_or_expired(index).await?;
    Ok(())
}

async fn test_health_check(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    index.health_check().await
}

async fn test_staged_records_are_invisible(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("staged");
    let key = BlobKey::generate(&subject);
    index.stage(&key, &tags_with(&[("a", "b")])).await?;

    assert!(
        matches!(index.get(&key, Utc::now()).await, Err(IndexError::RecordNotFound)),
        "staged record must not be readable"
    );
    let page = index.search(&SearchQuery::new(subject_filter(&subject))).await?;
    assert!(page.items.is_empty(), "staged record must not be searchable");
    Ok(())
}

async fn test_completed_record_matches_staged(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("complete");
    let key = BlobKey::generate(&subject);
    let mut tags = BlobTags {
        device: Some("mydevice".to_string()),
        name: Some("myname".to_string()),
        session: Some("mysession".to_string()),
        content_type: Some("text/plain".to_string()),
        time_to_live: Some(Duration::from_secs(3600)),
        ..Default::default()
    };
    tags.custom_tags = normalize_tag_map([("Tag1", "a"), ("tag1", "b"), ("tag2", "😀")]);

    let staged = index.stage(&key, &tags).await?;
    assert_eq!(staged.key, key);
    assert!(staged.tags.time_to_live.is_none(), "ttl is not retained");
    assert_eq!(
        staged.expires_at,
        Some(staged.created_at + chrono::Duration::seconds(3600))
    );

    index.complete(&key).await?;
    let read = index.get(&key, Utc::now()).await?;
    assert_eq!(read, staged);
    assert_eq!(read.tags.custom_tags["tag1"], vec!["a", "b"]);

    assert!(
        matches!(index.complete(&key).await, Err(IndexError::StagedRecordNotFound)),
        "completing twice must fail"
    );
    assert!(
        matches!(index.revert(&key).await, Err(IndexError::StagedRecordNotFound)),
        "complete records cannot be reverted"
    );
    Ok(())
}

async fn test_revert_removes_staged_record(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("revert");
    let key = BlobKey::generate(&subject);
    index.stage(&key, &tags_with(&[("foo", "bar")])).await?;

    index.revert(&key).await?;

    assert!(matches!(index.get(&key, Utc::now()).await, Err(IndexError::RecordNotFound)));
    assert!(matches!(index.complete(&key).await, Err(IndexError::StagedRecordNotFound)));
    assert!(matches!(index.revert(&key).await, Err(IndexError::StagedRecordNotFound)));

    // no tag rows survive the revert
    index.stage(&key, &BlobTags::default()).await?;
    index.complete(&key).await?;
    let info = index.get(&key, Utc::now()).await?;
    assert!(
        info.tags.custom_tags.is_empty(),
        "residual custom tags remain after revert"
    );
    Ok(())
}

async fn test_delete_is_idempotent(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let never_staged = BlobKey::generate(unique_subject("never"));
    assert!(matches!(index.delete(&never_staged).await, Err(IndexError::RecordNotFound)));
    assert!(matches!(
        index.complete(&never_staged).await,
        Err(IndexError::StagedRecordNotFound)
    ));

    let info = stage_and_complete(index, &unique_subject("delete"), &tags_with(&[("x", "y")])).await?;
    index.delete(&info.key).await?;
    assert!(matches!(index.delete(&info.key).await, Err(IndexError::RecordNotFound)));
    assert!(matches!(
        index.get(&info.key, Utc::now()).await,
        Err(IndexError::RecordNotFound)
    ));
    Ok(())
}

async fn test_stage_rejects_existing_key(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let key = BlobKey::generate(unique_subject("conflict"));
    index.stage(&key, &BlobTags::default()).await?;
    assert!(
        matches!(
            index.stage(&key, &BlobTags::default()).await,
            Err(IndexError::KeyConflict(_))
        ),
        "staging an existing key must fail"
    );
    index.revert(&key).await
}

async fn test_repeated_filter_values_are_anded(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("and");
    let only_v1 = stage_and_complete(index, &subject, &tags_with(&[("t", "v1")])).await?;
    let both = stage_and_complete(index, &subject, &tags_with(&[("t", "v1"), ("t", "v2")])).await?;

    let mut filter = subject_filter(&subject);
    filter.insert("t".to_string(), vec!["v1".to_string(), "v2".to_string()]);
    let page = index.search(&SearchQuery::new(filter)).await?;
    let keys: Vec<_> = page.items.iter().map(|i| i.key.clone()).collect();
    assert_eq!(keys, vec![both.key.clone()]);

    let mut filter = subject_filter(&subject);
    filter.insert("t".to_string(), vec!["v1".to_string()]);
    let page = index.search(&SearchQuery::new(filter)).await?;
    assert_eq!(page.items.len(), 2);
    assert!(page.items.iter().any(|i| i.key == only_v1.key));
    Ok(())
}

async fn test_system_tag_filters(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("system");
    let tags = BlobTags {
        device: Some("dev-1".to_string()),
        name: Some("name-1".to_string()),
        session: Some("sess-1".to_string()),
        ..Default::default()
    };
    let info = stage_and_complete(index, &subject, &tags).await?;
    stage_and_complete(index, &subject, &BlobTags::default()).await?;

    for (tag, value) in [("device", "dev-1"), ("name", "name-1"), ("session", "sess-1")] {
        let mut filter = subject_filter(&subject);
        filter.insert(tag.to_string(), vec![value.to_string()]);
        let page = index.search(&SearchQuery::new(filter)).await?;
        assert_eq!(page.items.len(), 1, "filter on {}", tag);
        assert_eq!(page.items[0].key, info.key);
    }

    // a single-valued tag cannot equal two different values
    let mut filter = subject_filter(&subject);
    filter.insert("device".to_string(), vec!["dev-1".to_string(), "dev-2".to_string()]);
    assert!(index.search(&SearchQuery::new(filter)).await?.items.is_empty());
    Ok(())
}

async fn test_tag_case_sensitivity(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("S-Case");
    let tags = BlobTags {
        name: Some("MYNAME".to_string()),
        custom_tags: normalize_tag_map([("mytag", "TAGVALUE1"), ("MYTAG", "TAGVALUE2")]),
        ..Default::default()
    };
    stage_and_complete(index, &subject, &tags).await?;

    let search = |pairs: Vec<(&'static str, String)>| async move {
        index
            .search(&SearchQuery::new(normalize_tag_map(pairs)))
            .await
            .map(|page| page.items.len())
    };

    assert_eq!(
        search(vec![
            ("subject", subject.clone()),
            ("name", "MYNAME".into()),
            ("MyTag", "TAGVALUE1".into())
        ])
        .await?,
        1
    );
    assert_eq!(
        search(vec![("subject", subject.to_lowercase()), ("name", "MYNAME".into())]).await?,
        0
    );
    assert_eq!(
        search(vec![("subject", subject.clone()), ("name", "myname".into())]).await?,
        0
    );
    assert_eq!(
        search(vec![("subject", subject.clone()), ("mytag", "tagvalue1".into())]).await?,
        0
    );
    Ok(())
}

async fn test_pagination_visits_every_record(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("page");
    let mut expected = HashSet::new();
    for i in 0..10 {
        let info = stage_and_complete(index, &subject, &BlobTags::default()).await?;
        expected.insert(info.key.id);
        // mix distinct and shared timestamps
        if i % 3 == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    for page_size in [1, 2, 3, 4, 9, 10, 11, 100] {
        let mut seen = Vec::new();
        let mut query = SearchQuery::new(subject_filter(&subject)).page_size(page_size);
        loop {
            let page = index.search(&query).await?;
            assert!(page.items.len() <= page_size);
            seen.extend(page.items.iter().map(|i| (i.created_at, i.key.id)));
            match page.next {
                Some(token) => query = query.continuation(token),
                None => break,
            }
        }

        assert_eq!(seen.len(), expected.len(), "page size {}", page_size);
        let ids: HashSet<_> = seen.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, expected, "page size {}", page_size);
        assert!(
            seen.windows(2).all(|w| w[0] > w[1]),
            "results must be ordered by (created_at, id) descending"
        );
    }

    let first = index
        .search(&SearchQuery::new(subject_filter(&subject)).page_size(3))
        .await?;
    assert_eq!(first.items.len(), 3);
    assert!(first.next.is_some());
    Ok(())
}

async fn test_search_at(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("at");
    let older = stage_and_complete(index, &subject, &BlobTags::default()).await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = stage_and_complete(index, &subject, &BlobTags::default()).await?;

    let latest = index
        .search(&SearchQuery::new(subject_filter(&subject)).page_size(1))
        .await?;
    assert_eq!(latest.items[0].key, newer.key);

    let at_older = index
        .search(&SearchQuery::new(subject_filter(&subject)).at(older.created_at))
        .await?;
    let keys: Vec<_> = at_older.items.iter().map(|i| i.key.clone()).collect();
    assert_eq!(keys, vec![older.key]);
    Ok(())
}

async fn test_expiration_visibility(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("expiring");
    let tags = BlobTags {
        time_to_live: Some(Duration::from_secs(300)),
        ..Default::default()
    };
    let info = stage_and_complete(index, &subject, &tags).await?;
    let expires_at = info.expires_at.expect("ttl sets an expiration");

    index.get(&info.key, Utc::now()).await?;
    index
        .get(&info.key, expires_at - chrono::Duration::milliseconds(1))
        .await?;
    assert!(matches!(
        index.get(&info.key, expires_at).await,
        Err(IndexError::RecordNotFound)
    ));
    assert!(matches!(
        index
            .get(&info.key, Utc::now() + chrono::Duration::minutes(10))
            .await,
        Err(IndexError::RecordNotFound)
    ));

    let now = index.search(&SearchQuery::new(subject_filter(&subject))).await?;
    assert_eq!(now.items.len(), 1);
    let later = index
        .search(&SearchQuery::new(subject_filter(&subject)).at(Utc::now() + chrono::Duration::minutes(10)))
        .await?;
    assert!(later.items.is_empty(), "expired records are excluded from search");
    Ok(())
}

async fn test_invalid_continuation_token(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let query = SearchQuery::new(subject_filter("x")).continuation(ContinuationToken::from("3"));
    assert!(matches!(
        index.search(&query).await,
        Err(IndexError::InvalidContinuationToken)
    ));
    Ok(())
}

async fn test_scan_stale_or_expired(index: &dyn MetadataIndex) -> Result<(), IndexError> {
    let subject = unique_subject("scan");

    let staged = BlobKey::generate(&subject);
    index.stage(&staged, &BlobTags::default()).await?;

    let expired = stage_and_complete(
        index,
        &subject,
        &BlobTags {
            time_to_live: Some(Duration::ZERO),
            ..Default::default()
        },
    )
    .await?;
    let permanent = stage_and_complete(index, &subject, &BlobTags::default()).await?;

    let long_ago = expired.created_at - chrono::Duration::seconds(60);
    let before = index.scan_stale_or_expired(long_ago, 10_000).await?;
    assert!(!before.contains(&staged));
    assert!(!before.contains(&expired.key));

    let threshold = Utc::now() + chrono::Duration::seconds(1);
    let keys = index.scan_stale_or_expired(threshold, 10_000).await?;
    assert!(keys.contains(&staged), "stale staged record is collected");
    assert!(keys.contains(&expired.key), "expired complete record is collected");
    assert!(!keys.contains(&permanent.key), "complete records without ttl are kept");

    let limited = index.scan_stale_or_expired(threshold, 1).await?;
    assert_eq!(limited.len(), 1);
    Ok(())
}
