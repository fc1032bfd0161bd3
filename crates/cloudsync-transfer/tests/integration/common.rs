//! Shared test helpers: an in-memory `ObjectStore` with fault injection
//!
//! The store keeps objects and pending multipart uploads in memory, emulates
//! the provider's ETag scheme, enforces the minimum part size on "complete",
//! and records every call the tests assert on.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cloudsync_core::domain::{
    ByteRange, CompletedPart, CreateBucketOutcome, InitiatedUpload, MetadataDirective,
    ObjectInfo, ObjectMetadata, ObjectRef, PendingUpload, ProviderQuirks, StoreError,
};
use cloudsync_core::ports::{ObjectStore, PendingUploadPage, UploadMarker};
use cloudsync_transfer::pacer::{Pacer, PacerConfig};
use cloudsync_transfer::upload::UploadOptions;
use md5::{Digest, Md5};

pub const BUCKET: &str = "test-bucket";

/// Minimum part size used by the in-memory provider
pub const SMALL_MIN_CHUNK: u64 = 16;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub metadata: ObjectMetadata,
}

#[derive(Debug)]
struct PendingMultipart {
    target: ObjectRef,
    metadata: ObjectMetadata,
    parts: BTreeMap<u32, (Vec<u8>, String)>,
    initiated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), StoredObject>,
    uploads: BTreeMap<String, PendingMultipart>,
    next_upload: u64,
    part_faults: HashMap<u32, (usize, StoreError)>,
    initiate_faults: Vec<StoreError>,
    create_fault: Option<StoreError>,
    completed: Vec<Vec<u32>>,
    put_md5s: Vec<Option<String>>,
    copy_directives: Vec<MetadataDirective>,
    regions: Vec<String>,
    initiate_metadata: Vec<ObjectMetadata>,
}

/// In-memory S3 double
pub struct MemoryStore {
    quirks: ProviderQuirks,
    state: Mutex<State>,
    part_delay: Mutex<Option<Box<dyn Fn(u32) -> Duration + Send + Sync>>>,
    create_delay: Mutex<Duration>,
    page_size: usize,
    corrupt_complete: std::sync::atomic::AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub upload_part_calls: AtomicUsize,
    pub create_bucket_calls: AtomicUsize,
    pub head_bucket_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub initiate_calls: AtomicUsize,
    pub location_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_quirks(small_quirks())
    }

    pub fn with_quirks(quirks: ProviderQuirks) -> Self {
        Self {
            quirks,
            state: Mutex::new(State::default()),
            part_delay: Mutex::new(None),
            create_delay: Mutex::new(Duration::ZERO),
            page_size: 2,
            corrupt_complete: std::sync::atomic::AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            upload_part_calls: AtomicUsize::new(0),
            create_bucket_calls: AtomicUsize::new(0),
            head_bucket_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            initiate_calls: AtomicUsize::new(0),
            location_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // ---- setup ----

    pub fn add_bucket(&self, bucket: &str) {
        self.state().buckets.insert(bucket.to_string());
    }

    pub fn insert_object(&self, object: &ObjectRef, data: Vec<u8>, metadata: ObjectMetadata) {
        let etag = quoted_md5(&data);
        self.state().objects.insert(
            key_of(object),
            StoredObject {
                data,
                etag,
                metadata,
            },
        );
    }

    /// Add a pending multipart upload initiated at `initiated`
    pub fn insert_pending(&self, key: &str, initiated: DateTime<Utc>) -> String {
        let mut state = self.state();
        state.next_upload += 1;
        let upload_id = format!("upload-{:04}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingMultipart {
                target: ObjectRef::new(BUCKET, key).unwrap(),
                metadata: ObjectMetadata::default(),
                parts: BTreeMap::new(),
                initiated,
            },
        );
        upload_id
    }

    /// Fail `upload_part` for `part_number` the next `times` calls
    pub fn fail_part(&self, part_number: u32, times: usize, error: StoreError) {
        self.state().part_faults.insert(part_number, (times, error));
    }

    /// Fail the next "initiate" calls with these errors, in order
    pub fn fail_initiate(&self, errors: Vec<StoreError>) {
        self.state().initiate_faults = errors;
    }

    pub fn fail_create_bucket(&self, error: StoreError) {
        self.state().create_fault = Some(error);
    }

    pub fn set_part_delay(&self, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) {
        *self.part_delay.lock().unwrap() = Some(Box::new(delay));
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    /// Report a final ETag that does not match the parts
    pub fn corrupt_complete_etag(&self) {
        self.corrupt_complete.store(true, Ordering::SeqCst);
    }

    // ---- inspection ----

    pub fn object(&self, object: &ObjectRef) -> Option<StoredObject> {
        self.state().objects.get(&key_of(object)).cloned()
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state().objects.keys().map(|(_, k)| k.clone()).collect();
        keys.sort();
        keys
    }

    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Part numbers submitted to each "complete" call
    pub fn completed_part_lists(&self) -> Vec<Vec<u32>> {
        self.state().completed.clone()
    }

    pub fn put_md5s(&self) -> Vec<Option<String>> {
        self.state().put_md5s.clone()
    }

    pub fn copy_directives(&self) -> Vec<MetadataDirective> {
        self.state().copy_directives.clone()
    }

    pub fn regions(&self) -> Vec<String> {
        self.state().regions.clone()
    }

    pub fn initiate_metadata(&self) -> Vec<ObjectMetadata> {
        self.state().initiate_metadata.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_part_fault(&self, part_number: u32) -> Option<StoreError> {
        let mut state = self.state();
        let (remaining, error) = state.part_faults.get_mut(&part_number)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn source_data(&self, source: &ObjectRef, range: ByteRange) -> Result<Vec<u8>, StoreError> {
        let state = self.state();
        let object = state
            .objects
            .get(&key_of(source))
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
        let end = usize::try_from(range.end()).unwrap();
        if end > object.data.len() {
            return Err(rejected(416, "InvalidRange", "range beyond object"));
        }
        Ok(object.data[range.start() as usize..end].to_vec())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn quirks(&self) -> &ProviderQuirks {
        &self.quirks
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        self.head_bucket_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().buckets.contains(bucket))
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        _acl: Option<&str>,
        _location_constraint: Option<&str>,
    ) -> Result<CreateBucketOutcome, StoreError> {
        self.create_bucket_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(error) = state.create_fault.clone() {
            return Err(error);
        }
        if state.buckets.insert(bucket.to_string()) {
            Ok(CreateBucketOutcome::Created)
        } else {
            Ok(CreateBucketOutcome::AlreadyOwned)
        }
    }

    async fn get_bucket_location(&self, _bucket: &str) -> Result<String, StoreError> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        Ok("eu-west-1".to_string())
    }

    fn set_region(&self, region: &str) -> Result<(), StoreError> {
        self.state().regions.push(region.to_string());
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<InitiatedUpload, StoreError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if !state.initiate_faults.is_empty() {
            return Err(state.initiate_faults.remove(0));
        }
        state.next_upload += 1;
        let upload_id = format!("upload-{:04}", state.next_upload);
        state.initiate_metadata.push(metadata.clone());
        state.uploads.insert(
            upload_id.clone(),
            PendingMultipart {
                target: target.clone(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
                initiated: Utc::now(),
            },
        );
        Ok(InitiatedUpload {
            upload_id,
            abort_date: None,
        })
    }

    async fn upload_part(
        &self,
        _target: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        body: &[u8],
        content_md5: Option<&str>,
    ) -> Result<String, StoreError> {
        self.upload_part_calls.fetch_add(1, Ordering::SeqCst);
        self.enter();
        let delay = self.part_delay.lock().unwrap().as_ref().map(|f| f(part_number));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = (|| {
            if let Some(error) = self.take_part_fault(part_number) {
                return Err(error);
            }
            if let Some(md5) = content_md5 {
                use base64::Engine;
                let want = base64::engine::general_purpose::STANDARD.encode(Md5::digest(body));
                if md5 != want {
                    return Err(rejected(400, "BadDigest", "Content-MD5 mismatch"));
                }
            }
            let etag = quoted_md5(body);
            let mut state = self.state();
            let upload = state
                .uploads
                .get_mut(upload_id)
                .ok_or_else(|| StoreError::NotFound(upload_id.to_string()))?;
            upload.parts.insert(part_number, (body.to_vec(), etag.clone()));
            Ok(etag)
        })();
        self.leave();
        result
    }

    async fn upload_part_copy(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        source: &ObjectRef,
        range: ByteRange,
    ) -> Result<String, StoreError> {
        let data = self.source_data(source, range)?;
        self.upload_part(target, upload_id, part_number, &data, None)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        _target: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, StoreError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state
            .completed
            .push(parts.iter().map(|p| p.part_number).collect());

        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StoreError::NotFound(upload_id.to_string()))?;
        if parts.is_empty() {
            return Err(rejected(400, "MalformedXML", "no parts"));
        }

        let mut data = Vec::new();
        let mut digests = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            let (body, etag) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| rejected(400, "InvalidPart", "unknown part"))?;
            if *etag != part.etag {
                return Err(rejected(400, "InvalidPart", "etag mismatch"));
            }
            if index + 1 < parts.len() && (body.len() as u64) < self.quirks.min_chunk_size {
                return Err(rejected(400, "EntityTooSmall", "part too small"));
            }
            data.extend_from_slice(body);
            digests.extend_from_slice(&Md5::digest(body));
        }

        let mut etag = format!("\"{}-{}\"", hex::encode(Md5::digest(&digests)), parts.len());
        if self.corrupt_complete.load(Ordering::SeqCst) {
            etag = "\"00000000000000000000000000000000-1\"".to_string();
        }
        state.objects.insert(
            key_of(&upload.target),
            StoredObject {
                data,
                etag: etag.clone(),
                metadata: upload.metadata,
            },
        );
        Ok(etag)
    }

    async fn abort_multipart_upload(
        &self,
        _target: &ObjectRef,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.state().uploads.remove(upload_id);
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&UploadMarker>,
    ) -> Result<PendingUploadPage, StoreError> {
        let state = self.state();
        let mut matching: Vec<PendingUpload> = state
            .uploads
            .iter()
            .filter(|(_, u)| u.target.bucket() == bucket)
            .filter(|(_, u)| prefix.map_or(true, |p| u.target.key().starts_with(p)))
            .map(|(id, u)| PendingUpload {
                key: u.target.key().to_string(),
                upload_id: id.clone(),
                initiated: u.initiated,
            })
            .collect();
        matching.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

        let start = match marker {
            Some(m) => matching
                .iter()
                .position(|u| (&u.key, &u.upload_id) > (&m.key_marker, &m.upload_id_marker))
                .unwrap_or(matching.len()),
            None => 0,
        };
        let uploads: Vec<PendingUpload> =
            matching.iter().skip(start).take(self.page_size).cloned().collect();
        let next = if start + uploads.len() < matching.len() {
            uploads.last().map(|u| UploadMarker {
                key_marker: u.key.clone(),
                upload_id_marker: u.upload_id.clone(),
            })
        } else {
            None
        };
        Ok(PendingUploadPage { uploads, next })
    }

    async fn put_object(
        &self,
        target: &ObjectRef,
        body: &[u8],
        content_md5: Option<&str>,
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError> {
        self.state().put_md5s.push(content_md5.map(str::to_string));
        let etag = quoted_md5(body);
        self.state().objects.insert(
            key_of(target),
            StoredObject {
                data: body.to_vec(),
                etag: etag.clone(),
                metadata: metadata.clone(),
            },
        );
        Ok(etag)
    }

    async fn head_object(&self, object: &ObjectRef) -> Result<ObjectInfo, StoreError> {
        let state = self.state();
        let stored = state
            .objects
            .get(&key_of(object))
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;
        Ok(ObjectInfo {
            size: stored.data.len() as u64,
            etag: Some(stored.etag.clone()),
            last_modified: Some(Utc::now()),
            metadata: stored.metadata.clone(),
        })
    }

    async fn copy_object(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        directive: MetadataDirective,
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError> {
        let mut state = self.state();
        state.copy_directives.push(directive);
        let stored = state
            .objects
            .get(&key_of(source))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
        let metadata = match directive {
            MetadataDirective::Copy => stored.metadata.clone(),
            MetadataDirective::Replace => metadata.clone(),
        };
        let etag = stored.etag.clone();
        state.objects.insert(
            key_of(target),
            StoredObject {
                data: stored.data,
                etag: etag.clone(),
                metadata,
            },
        );
        Ok(etag)
    }

    async fn get_object_range(
        &self,
        object: &ObjectRef,
        range: ByteRange,
    ) -> Result<Bytes, StoreError> {
        Ok(Bytes::from(self.source_data(object, range)?))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), StoreError> {
        self.state().objects.remove(&key_of(object));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// AWS-like quirks with a tiny minimum part size
pub fn small_quirks() -> ProviderQuirks {
    let mut quirks = ProviderQuirks::aws();
    quirks.min_chunk_size = SMALL_MIN_CHUNK;
    quirks.chunk_size_floor = SMALL_MIN_CHUNK;
    quirks
}

pub fn fast_pacer() -> Pacer {
    Pacer::new(PacerConfig {
        max_attempts: 3,
        min_sleep: Duration::from_millis(1),
        max_sleep: Duration::from_millis(4),
    })
}

pub fn small_options(concurrency: usize) -> UploadOptions {
    UploadOptions {
        chunk_size: SMALL_MIN_CHUNK,
        concurrency,
        max_upload_parts: 10_000,
        min_chunk_size: SMALL_MIN_CHUNK,
        leave_parts_on_error: false,
        disable_checksum: false,
    }
}

pub fn object(key: &str) -> ObjectRef {
    ObjectRef::new(BUCKET, key).unwrap()
}

/// Deterministic test content
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn shared(store: MemoryStore) -> (Arc<MemoryStore>, Arc<dyn ObjectStore>) {
    let store = Arc::new(store);
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    (store, dyn_store)
}

pub fn rejected(status: u16, code: &str, message: &str) -> StoreError {
    StoreError::Rejected {
        status,
        code: code.to_string(),
        message: message.to_string(),
    }
}

pub fn server_error() -> StoreError {
    StoreError::Server {
        status: 503,
        code: "ServiceUnavailable".to_string(),
        message: "try again".to_string(),
    }
}

fn key_of(object: &ObjectRef) -> (String, String) {
    (object.bucket().to_string(), object.key().to_string())
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}
