//! `ObjectStore` over the S3 REST API
//!
//! Each port method is one HTTP call. Retrying, region recovery and
//! concurrency are left to the transfer engine.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cloudsync_core::{
    config::Config,
    domain::{
        ByteRange, CompletedPart, CreateBucketOutcome, InitiatedUpload, MetadataDirective,
        ObjectInfo, ObjectMetadata, ObjectRef, PendingUpload, ProviderQuirks, StoreError,
    },
    ports::{ObjectStore, PendingUploadPage, UploadMarker},
};
use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
        RANGE,
    },
    Client, Method, Response,
};
use tracing::{debug, warn};

use crate::{
    client::{encode_key, S3Client, S3Request},
    error,
    signer::RequestSigner,
    xml::{self, CompleteMultipartUpload, CreateBucketConfiguration},
};

const META_PREFIX: &str = "x-amz-meta-";
const ACL_HEADER: &str = "x-amz-acl";
const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";
const CONTENT_MD5_HEADER: &str = "content-md5";
const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";
const COPY_SOURCE_RANGE_HEADER: &str = "x-amz-copy-source-range";
const METADATA_DIRECTIVE_HEADER: &str = "x-amz-metadata-directive";
const ABORT_DATE_HEADER: &str = "x-amz-abort-date";

/// Region S3 reports as an empty location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible object store
#[derive(Debug)]
pub struct S3ObjectStore {
    client: S3Client,
    quirks: ProviderQuirks,
    /// Canned ACL for written objects
    acl: Option<String>,
    /// Storage class for written objects
    storage_class: Option<String>,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, quirks: ProviderQuirks) -> Self {
        Self {
            client,
            quirks,
            acl: None,
            storage_class: None,
        }
    }

    /// Build a store from configuration
    ///
    /// Resolves the provider quirks, applies the explicit overrides and picks
    /// path-style or virtual-host addressing from them.
    pub fn from_config(config: &Config, signer: Arc<dyn RequestSigner>) -> Result<Self, StoreError> {
        let quirks = ProviderQuirks::resolve(&config.remote.provider, &config.quirk_overrides());
        let http = Client::builder()
            .user_agent(concat!("cloudsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(error::from_reqwest)?;
        let client = S3Client::new(
            http,
            signer,
            &config.remote.region,
            config.remote.endpoint.as_deref(),
            quirks.force_path_style,
        )?;

        let mut store = Self::new(client, quirks);
        store.acl = config.remote.acl.clone();
        store.storage_class = config.remote.storage_class.clone();
        Ok(store)
    }

    pub fn with_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }

    /// Headers describing a newly written object
    fn write_headers(&self, metadata: &ObjectMetadata) -> Result<HeaderMap, StoreError> {
        let mut headers = HeaderMap::new();
        insert_metadata(&mut headers, metadata)?;
        self.insert_placement(&mut headers)?;
        Ok(headers)
    }

    fn insert_placement(&self, headers: &mut HeaderMap) -> Result<(), StoreError> {
        if let Some(acl) = &self.acl {
            insert(headers, ACL_HEADER, acl)?;
        }
        if let Some(class) = &self.storage_class {
            insert(headers, STORAGE_CLASS_HEADER, class)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn quirks(&self) -> &ProviderQuirks {
        &self.quirks
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        match self
            .client
            .execute(S3Request::bucket(Method::HEAD, bucket))
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        location_constraint: Option<&str>,
    ) -> Result<CreateBucketOutcome, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(acl) = acl {
            insert(&mut headers, ACL_HEADER, acl)?;
        }
        let mut request = S3Request::bucket(Method::PUT, bucket).headers(headers);
        if let Some(constraint) = location_constraint.filter(|c| !c.is_empty()) {
            request = request.body(xml::to_xml(&CreateBucketConfiguration::new(constraint))?);
        }

        match self.client.execute(request).await {
            Ok(_) => {
                debug!(bucket, "bucket created");
                Ok(CreateBucketOutcome::Created)
            }
            Err(e) if e.code() == Some("BucketAlreadyOwnedByYou") => {
                debug!(bucket, "bucket already owned");
                Ok(CreateBucketOutcome::AlreadyOwned)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_bucket_location(&self, bucket: &str) -> Result<String, StoreError> {
        let request = S3Request::bucket(Method::GET, bucket).query("location", "");
        let body = text(self.client.execute(request).await?).await?;
        let location: xml::LocationConstraint = xml::from_xml(&body)?;
        Ok(normalize_location(&location.region))
    }

    fn set_region(&self, region: &str) -> Result<(), StoreError> {
        self.client.set_region(region)
    }

    async fn initiate_multipart_upload(
        &self,
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<InitiatedUpload, StoreError> {
        let request = S3Request::object(Method::POST, target.bucket(), target.key())
            .query("uploads", "")
            .headers(self.write_headers(metadata)?);
        let response = self.client.execute(request).await?;

        let abort_date = response
            .headers()
            .get(ABORT_DATE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let body = text(response).await?;
        let result: xml::InitiateMultipartUploadResult = xml::from_xml(&body)?;
        debug!(
            bucket = target.bucket(),
            key = target.key(),
            upload_id = %result.upload_id,
            "multipart upload initiated"
        );
        Ok(InitiatedUpload {
            upload_id: result.upload_id,
            abort_date,
        })
    }

    async fn upload_part(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        body: &[u8],
        content_md5: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(md5) = content_md5 {
            insert(&mut headers, CONTENT_MD5_HEADER, md5)?;
        }
        let request = S3Request::object(Method::PUT, target.bucket(), target.key())
            .query("partNumber", part_number.to_string())
            .query("uploadId", upload_id)
            .headers(headers)
            .body(Bytes::copy_from_slice(body));
        let response = self.client.execute(request).await?;
        etag(&response)
    }

    async fn upload_part_copy(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        source: &ObjectRef,
        range: ByteRange,
    ) -> Result<String, StoreError> {
        let mut headers = HeaderMap::new();
        insert(&mut headers, COPY_SOURCE_HEADER, &copy_source(source))?;
        if let Some(value) = range.header_value() {
            insert(&mut headers, COPY_SOURCE_RANGE_HEADER, &value)?;
        }
        let request = S3Request::object(Method::PUT, target.bucket(), target.key())
            .query("partNumber", part_number.to_string())
            .query("uploadId", upload_id)
            .headers(headers);
        let body = text(self.client.execute(request).await?).await?;
        let result: xml::CopyResult = parse_checked(&body)?;
        Ok(result.etag)
    }

    async fn complete_multipart_upload(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, StoreError> {
        let request = S3Request::object(Method::POST, target.bucket(), target.key())
            .query("uploadId", upload_id)
            .body(xml::to_xml(&CompleteMultipartUpload::new(parts))?);
        let body = text(self.client.execute(request).await?).await?;
        let result: xml::CompleteMultipartUploadResult = parse_checked(&body)?;
        debug!(
            bucket = target.bucket(),
            key = target.key(),
            upload_id,
            parts = parts.len(),
            "multipart upload completed"
        );
        Ok(result.etag)
    }

    async fn abort_multipart_upload(
        &self,
        target: &ObjectRef,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let request = S3Request::object(Method::DELETE, target.bucket(), target.key())
            .query("uploadId", upload_id);
        self.client.execute(request).await?;
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&UploadMarker>,
    ) -> Result<PendingUploadPage, StoreError> {
        let mut request = S3Request::bucket(Method::GET, bucket).query("uploads", "");
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            request = request.query("prefix", prefix);
        }
        if let Some(marker) = marker {
            request = request
                .query("key-marker", marker.key_marker.as_str())
                .query("upload-id-marker", marker.upload_id_marker.as_str());
        }
        if self.quirks.url_encode_listings {
            request = request.query("encoding-type", "url");
        }

        let body = text(self.client.execute(request).await?).await?;
        let result: xml::ListMultipartUploadsResult = xml::from_xml(&body)?;
        let url_encoded = result.encoding_type.as_deref() == Some("url");
        let decode = |raw: String| if url_encoded { decode_key(&raw) } else { raw };

        let mut uploads = Vec::with_capacity(result.uploads.len());
        for upload in result.uploads {
            let initiated = DateTime::parse_from_rfc3339(&upload.initiated)
                .map_err(|e| {
                    StoreError::InvalidResponse(format!(
                        "bad Initiated timestamp {:?}: {e}",
                        upload.initiated
                    ))
                })?
                .with_timezone(&Utc);
            uploads.push(PendingUpload {
                key: decode(upload.key),
                upload_id: upload.upload_id,
                initiated,
            });
        }

        let next = if result.is_truncated {
            let key_marker = xml::non_empty(result.next_key_marker)
                .map(&decode)
                .or_else(|| uploads.last().map(|u| u.key.clone()));
            let upload_id_marker = xml::non_empty(result.next_upload_id_marker)
                .or_else(|| uploads.last().map(|u| u.upload_id.clone()));
            match (key_marker, upload_id_marker) {
                (Some(key_marker), Some(upload_id_marker)) => Some(UploadMarker {
                    key_marker,
                    upload_id_marker,
                }),
                _ => {
                    return Err(StoreError::InvalidResponse(
                        "truncated upload listing without a continuation marker".to_string(),
                    ))
                }
            }
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
        let mut headers = self.write_headers(metadata)?;
        if let Some(md5) = content_md5 {
            insert(&mut headers, CONTENT_MD5_HEADER, md5)?;
        }
        let request = S3Request::object(Method::PUT, target.bucket(), target.key())
            .headers(headers)
            .body(Bytes::copy_from_slice(body));
        let response = self.client.execute(request).await?;
        etag(&response)
    }

    async fn head_object(&self, object: &ObjectRef) -> Result<ObjectInfo, StoreError> {
        let request = S3Request::object(Method::HEAD, object.bucket(), object.key());
        let response = self.client.execute(request).await?;
        object_info(response.headers())
    }

    async fn copy_object(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        directive: MetadataDirective,
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError> {
        let mut headers = HeaderMap::new();
        insert(&mut headers, COPY_SOURCE_HEADER, &copy_source(source))?;
        insert(&mut headers, METADATA_DIRECTIVE_HEADER, directive.as_str())?;
        if directive == MetadataDirective::Replace {
            insert_metadata(&mut headers, metadata)?;
        }
        self.insert_placement(&mut headers)?;

        let request =
            S3Request::object(Method::PUT, target.bucket(), target.key()).headers(headers);
        let body = text(self.client.execute(request).await?).await?;
        let result: xml::CopyResult = parse_checked(&body)?;
        Ok(result.etag)
    }

    async fn get_object_range(
        &self,
        object: &ObjectRef,
        range: ByteRange,
    ) -> Result<Bytes, StoreError> {
        let Some(value) = range.header_value() else {
            return Ok(Bytes::new());
        };
        let mut headers = HeaderMap::new();
        insert(&mut headers, RANGE.as_str(), &value)?;
        let request =
            S3Request::object(Method::GET, object.bucket(), object.key()).headers(headers);
        let response = self.client.execute(request).await?;
        let data = response.bytes().await.map_err(error::from_reqwest)?;
        if data.len() as u64 != range.len() {
            return Err(StoreError::InvalidResponse(format!(
                "ranged read of {object} returned {} bytes, expected {}",
                data.len(),
                range.len()
            )));
        }
        Ok(data)
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), StoreError> {
        let request = S3Request::object(Method::DELETE, object.bucket(), object.key());
        self.client.execute(request).await?;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn insert(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), StoreError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| StoreError::InvalidRequest(format!("invalid header name {name:?}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| StoreError::InvalidRequest(format!("invalid value for {name}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}

fn insert_metadata(headers: &mut HeaderMap, metadata: &ObjectMetadata) -> Result<(), StoreError> {
    if let Some(content_type) = &metadata.content_type {
        insert(headers, CONTENT_TYPE.as_str(), content_type)?;
    }
    for (key, value) in &metadata.user {
        insert(headers, &format!("{META_PREFIX}{key}"), value)?;
    }
    Ok(())
}

/// Size, ETag, Last-Modified and metadata from a HEAD response
fn object_info(headers: &HeaderMap) -> Result<ObjectInfo, StoreError> {
    let size = header(headers, &CONTENT_LENGTH)
        .ok_or_else(|| StoreError::InvalidResponse("HEAD response without Content-Length".into()))?
        .parse::<u64>()
        .map_err(|e| StoreError::InvalidResponse(format!("bad Content-Length: {e}")))?;

    let mut metadata = ObjectMetadata {
        content_type: header(headers, &CONTENT_TYPE).map(str::to_string),
        ..ObjectMetadata::default()
    };
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(META_PREFIX) else {
            continue;
        };
        match value.to_str() {
            Ok(value) => metadata = metadata.with_entry(key, value),
            Err(_) => warn!(header = %name, "skipping non-ASCII metadata value"),
        }
    }

    Ok(ObjectInfo {
        size,
        etag: header(headers, &ETAG).map(str::to_string),
        last_modified: header(headers, &LAST_MODIFIED).and_then(parse_http_date),
        metadata,
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn etag(response: &Response) -> Result<String, StoreError> {
    header(response.headers(), &ETAG)
        .map(str::to_string)
        .ok_or_else(|| StoreError::InvalidResponse("response without ETag header".to_string()))
}

async fn text(response: Response) -> Result<String, StoreError> {
    response.text().await.map_err(error::from_reqwest)
}

/// Parse a body that may be an `<Error>` despite a success status
fn parse_checked<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    match xml::embedded_error(body) {
        Some(err) => Err(error::from_embedded(err)),
        None => xml::from_xml(body),
    }
}

/// `x-amz-copy-source` value: `/bucket/key` with the key path-encoded
fn copy_source(source: &ObjectRef) -> String {
    format!(
        "/{}/{}",
        encode_key(source.bucket()),
        encode_key(source.key())
    )
}

/// Undo `encoding-type=url` on a listed key
fn decode_key(raw: &str) -> String {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| if v.is_empty() { k.into_owned() } else { format!("{k}={v}") })
        .collect::<Vec<_>>()
        .join("&")
}

/// Map the bucket location constraint to a region name
fn normalize_location(constraint: &str) -> String {
    match constraint {
        "" => DEFAULT_REGION.to_string(),
        "EU" => "eu-west-1".to_string(),
        other => other.to_string(),
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
