/// Conformance suite for [`crate::index::MetadataIndex`] implementations.
///
/// Every backend runs the same checks against a fresh index. The checks use
/// their own random subjects, so they can share one index instance.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_conformance() {
///     let index = MyIndex::in_memory().await.unwrap();
///     common::testkit::run_index_conformance_tests(&index).await.unwrap();
/// }
/// ```
mod conformance;

pub use conformance::run_index_conformance_tests;
