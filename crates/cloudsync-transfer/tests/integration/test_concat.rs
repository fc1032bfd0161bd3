//! Fragment concatenation tests

use std::sync::atomic::Ordering;

use cloudsync_core::domain::{ObjectMetadata, ObjectRef};
use cloudsync_transfer::concat::FragmentConcatenator;
use cloudsync_transfer::TransferError;

use crate::common::{self, MemoryStore, SMALL_MIN_CHUNK};

/// Store the fragments and return their refs and the expected joined data
fn seed(store: &MemoryStore, sizes: &[usize]) -> (Vec<ObjectRef>, Vec<u8>) {
    let mut refs = Vec::new();
    let mut joined = Vec::new();
    for (i, &size) in sizes.iter().enumerate() {
        let object = common::object(&format!("frag-{i:03}"));
        let data: Vec<u8> = common::content(size).into_iter().map(|b| b.wrapping_add(i as u8)).collect();
        joined.extend_from_slice(&data);
        store.insert_object(&object, data, ObjectMetadata::default());
        refs.push(object);
    }
    (refs, joined)
}

#[tokio::test]
async fn test_concat_smaller_than_minimum_is_fatal() {
    let store = MemoryStore::new();
    let (fragments, _) = seed(&store, &[4, 5, 6]);
    let (store, dyn_store) = common::shared(store);

    let concatenator =
        FragmentConcatenator::new(dyn_store, common::fast_pacer(), common::small_options(2), SMALL_MIN_CHUNK);
    let err = concatenator
        .concat(&fragments, &common::object("joined"), &ObjectMetadata::default())
        .await
        .unwrap_err();

    assert!(
        matches!(err, TransferError::ConcatTooSmall { total: 15, min_chunk_size: SMALL_MIN_CHUNK }),
        "{err}"
    );
    assert_eq!(store.initiate_calls.load(Ordering::SeqCst), 0);
    assert!(store.object(&common::object("joined")).is_none());
}

#[tokio::test]
async fn test_concat_merges_small_fragments_and_copies_large_ones() {
    let store = MemoryStore::new();
    let (fragments, joined) = seed(&store, &[5, 30, 7, 3, 40, 2]);
    let (store, dyn_store) = common::shared(store);

    let concatenator =
        FragmentConcatenator::new(dyn_store, common::fast_pacer(), common::small_options(2), SMALL_MIN_CHUNK);
    let outcome = concatenator
        .concat(&fragments, &common::object("joined"), &ObjectMetadata::default())
        .await
        .unwrap();

    // The store rejects undersized non-final parts on "complete"
    assert_eq!(outcome.size, joined.len() as u64);
    assert_eq!(store.object(&common::object("joined")).unwrap().data, joined);
    assert_eq!(store.abort_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concat_beyond_part_ceiling_merges_pairs_and_cleans_up() {
    let store = MemoryStore::new();
    let sizes = vec![10; 10];
    let (fragments, joined) = seed(&store, &sizes);
    let (store, dyn_store) = common::shared(store);

    let mut options = common::small_options(2);
    options.max_upload_parts = 4;
    let concatenator = FragmentConcatenator::new(dyn_store, common::fast_pacer(), options, SMALL_MIN_CHUNK);
    concatenator
        .concat(&fragments, &common::object("joined"), &ObjectMetadata::default())
        .await
        .unwrap();

    assert_eq!(store.object(&common::object("joined")).unwrap().data, joined);
    let leftovers: Vec<String> = store
        .object_keys()
        .into_iter()
        .filter(|key| key.contains(".concat-"))
        .collect();
    assert!(leftovers.is_empty(), "temporary objects left: {leftovers:?}");
}

#[tokio::test]
async fn test_concat_grows_copy_ranges_to_fit_part_ceiling() {
    let store = MemoryStore::new();
    let (fragments, joined) = seed(&store, &[16, 16, 2 * 1024 * 1024 + 1000]);
    let (store, dyn_store) = common::shared(store);

    let mut options = common::small_options(2);
    options.max_upload_parts = 3;
    let concatenator = FragmentConcatenator::new(dyn_store, common::fast_pacer(), options, 1024 * 1024);
    let outcome = concatenator
        .concat(&fragments, &common::object("joined"), &ObjectMetadata::default())
        .await
        .unwrap();

    assert_eq!(outcome.parts.len(), 3);
    assert_eq!(outcome.part_size, 4 * 1024 * 1024);
    assert_eq!(store.object(&common::object("joined")).unwrap().data, joined);
    assert!(store.object_keys().iter().all(|key| !key.contains(".concat-")));
}

#[tokio::test]
async fn test_concat_failure_still_removes_temporaries() {
    let store = MemoryStore::new();
    let (fragments, _) = seed(&store, &[20; 6]);
    // Fail every upload of part 2 so a later multipart step breaks
    store.fail_part(2, usize::MAX, common::rejected(403, "AccessDenied", "denied"));
    let (store, dyn_store) = common::shared(store);

    let mut options = common::small_options(1);
    options.max_upload_parts = 2;
    let concatenator = FragmentConcatenator::new(dyn_store, common::fast_pacer(), options, SMALL_MIN_CHUNK);
    let result = concatenator
        .concat(&fragments, &common::object("joined"), &ObjectMetadata::default())
        .await;

    assert!(result.is_err());
    assert!(store.object(&common::object("joined")).is_none());
    assert!(store.object_keys().iter().all(|key| !key.contains(".concat-")));
    assert_eq!(store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_concat_of_no_fragments_is_rejected() {
    let (_, dyn_store) = common::shared(MemoryStore::new());
    let concatenator =
        FragmentConcatenator::new(dyn_store, common::fast_pacer(), common::small_options(1), SMALL_MIN_CHUNK);
    let err = concatenator
        .concat(&[], &common::object("joined"), &ObjectMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Domain(_)));
}
