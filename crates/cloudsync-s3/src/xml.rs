//! S3 XML documents
//!
//! Request and response bodies as serde structs, read and written through
//! `quick-xml`. Unknown elements are ignored on the way in.

use cloudsync_core::domain::{CompletedPart, StoreError};
use quick_xml::{de::from_str as xml_from_str, se::to_string as xml_to_string};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename = "CreateBucketConfiguration")]
pub struct CreateBucketConfiguration {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "LocationConstraint")]
    location_constraint: String,
}

impl CreateBucketConfiguration {
    pub fn new(location_constraint: impl Into<String>) -> Self {
        Self {
            xmlns: S3_NAMESPACE,
            location_constraint: location_constraint.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Part")]
    parts: Vec<PartXml>,
}

#[derive(Debug, Serialize)]
struct PartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

impl CompleteMultipartUpload {
    pub fn new(parts: &[CompletedPart]) -> Self {
        Self {
            xmlns: S3_NAMESPACE,
            parts: parts
                .iter()
                .map(|p| PartXml {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LocationConstraint {
    #[serde(rename = "$text", default)]
    pub region: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of both `CopyObjectResult` and `CopyPartResult`
#[derive(Debug, Deserialize)]
pub struct CopyResult {
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMultipartUploadsResult {
    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,
    #[serde(rename = "NextKeyMarker", default)]
    pub next_key_marker: Option<String>,
    #[serde(rename = "NextUploadIdMarker", default)]
    pub next_upload_id_marker: Option<String>,
    #[serde(rename = "EncodingType", default)]
    pub encoding_type: Option<String>,
    #[serde(rename = "Upload", default)]
    pub uploads: Vec<UploadXml>,
}

#[derive(Debug, Deserialize)]
pub struct UploadXml {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "Initiated")]
    pub initiated: String,
}

/// `<Error>` document sent with failed requests
#[derive(Debug, Default, Deserialize)]
pub struct ErrorXml {
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Region", default)]
    pub region: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Serialize a request document, with the XML declaration
pub fn to_xml<T: Serialize>(value: &T) -> Result<String, StoreError> {
    let body = xml_to_string(value)
        .map_err(|e| StoreError::InvalidRequest(format!("failed to encode XML body: {e}")))?;
    Ok(format!("{XML_DECLARATION}{body}"))
}

/// Parse a response document
pub fn from_xml<T: DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    xml_from_str(body)
        .map_err(|e| StoreError::InvalidResponse(format!("failed to parse XML response: {e}")))
}

/// The `<Error>` document in `body`, if that is what it is
///
/// Copy and complete calls can fail after the provider already sent
/// `200 OK`, in which case the error arrives as the body.
pub fn embedded_error(body: &str) -> Option<ErrorXml> {
    let mut rest = body.trim_start();
    if rest.starts_with("<?xml") {
        rest = rest.split_once("?>").map_or("", |(_, tail)| tail).trim_start();
    }
    if rest.starts_with("<Error>") || rest.starts_with("<Error ") {
        from_xml(rest).ok()
    } else {
        None
    }
}

/// Treat an empty element as absent
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
