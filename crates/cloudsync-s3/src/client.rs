//! S3 HTTP client
//!
//! Owns the `reqwest` client, the current region and endpoint, and the
//! addressing style. Every request goes through [`S3Client::execute`], which
//! builds the URL, signs the request and maps failures.
//!
//! ## Addressing
//!
//! - Path style: `{endpoint}/{bucket}/{key}`
//! - Virtual host: `{bucket}.{endpoint host}/{key}`, used only for
//!   DNS-compatible bucket names
//!
//! Keys with a `.` or `..` segment are refused: URL normalization would
//! send them to a different object.
//!
//! Without a configured endpoint the AWS regional endpoint
//! `https://s3.{region}.amazonaws.com` is used and follows region changes.

use std::sync::{Arc, RwLock};

use bytes::Bytes;
use cloudsync_core::domain::StoreError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header::HeaderMap, Client, Method, Response};
use tracing::{debug, info};
use url::Url;

use crate::{error, signer::RequestSigner};

/// Bytes left bare in an encoded key segment (RFC 3986 unreserved)
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode an object key segment by segment, keeping `/`
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_dot_segment(key: &str) -> bool {
    key.split('/').any(|segment| segment == "." || segment == "..")
}

/// Region and endpoint requests are currently addressed to
#[derive(Debug, Clone)]
struct RequestContext {
    region: String,
    endpoint: Url,
}

/// One request, before addressing and signing
#[derive(Debug)]
pub struct S3Request<'a> {
    pub method: Method,
    pub bucket: &'a str,
    pub key: Option<&'a str>,
    pub query: Vec<(&'static str, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl<'a> S3Request<'a> {
    /// Request against a bucket
    pub fn bucket(method: Method, bucket: &'a str) -> Self {
        Self {
            method,
            bucket,
            key: None,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Request against an object
    pub fn object(method: Method, bucket: &'a str, key: &'a str) -> Self {
        Self {
            key: Some(key),
            ..Self::bucket(method, bucket)
        }
    }

    pub fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn resource(&self) -> String {
        match self.key {
            Some(key) => format!("{}/{}", self.bucket, key),
            None => self.bucket.to_string(),
        }
    }
}

/// HTTP client for one S3-compatible provider
pub struct S3Client {
    /// The underlying HTTP client
    http: Client,
    /// Signs each request before it is sent
    signer: Arc<dyn RequestSigner>,
    /// Current region and endpoint
    context: RwLock<RequestContext>,
    /// Whether the endpoint came from configuration
    custom_endpoint: bool,
    /// Put the bucket in the path rather than the host name
    path_style: bool,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("region", &self.region())
            .field("endpoint", &self.endpoint().as_str())
            .field("custom_endpoint", &self.custom_endpoint)
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl S3Client {
    /// Create a client
    ///
    /// # Arguments
    /// * `http` - Shared `reqwest` client
    /// * `signer` - Request signer
    /// * `region` - Initial region
    /// * `endpoint` - Custom endpoint URL; `None` for AWS
    /// * `path_style` - Use path-style addressing
    pub fn new(
        http: Client,
        signer: Arc<dyn RequestSigner>,
        region: &str,
        endpoint: Option<&str>,
        path_style: bool,
    ) -> Result<Self, StoreError> {
        let custom_endpoint = endpoint.is_some();
        let endpoint = match endpoint {
            Some(raw) => parse_endpoint(raw)?,
            None => aws_endpoint(region)?,
        };
        Ok(Self {
            http,
            signer,
            context: RwLock::new(RequestContext {
                region: region.to_string(),
                endpoint,
            }),
            custom_endpoint,
            path_style,
        })
    }

    pub fn region(&self) -> String {
        self.read_context().region
    }

    pub fn endpoint(&self) -> Url {
        self.read_context().endpoint
    }

    pub fn is_path_style(&self) -> bool {
        self.path_style
    }

    /// Re-target later requests at `region`
    ///
    /// Refused when a custom endpoint is configured, since the endpoint
    /// decides the region, and when `region` is already the current one.
    pub fn set_region(&self, region: &str) -> Result<(), StoreError> {
        if self.custom_endpoint {
            return Err(StoreError::InvalidRequest(
                "can't change region for bucket as endpoint is set".to_string(),
            ));
        }
        let mut context = self
            .context
            .write()
            .map_err(|_| StoreError::InvalidRequest("region state poisoned".to_string()))?;
        if context.region == region {
            return Err(StoreError::InvalidRequest(format!(
                "region is already {region:?} - can't switch region"
            )));
        }
        let endpoint = aws_endpoint(region)?;
        info!(from = %context.region, to = region, "switching s3 region");
        context.region = region.to_string();
        context.endpoint = endpoint;
        Ok(())
    }

    /// URL for a bucket or object, with query parameters
    pub fn url_for(
        &self,
        bucket: &str,
        key: Option<&str>,
        query: &[(&'static str, String)],
    ) -> Result<Url, StoreError> {
        if let Some(key) = key.filter(|k| has_dot_segment(k)) {
            return Err(StoreError::InvalidRequest(format!(
                "object key {key:?} has a dot segment and cannot be addressed by URL"
            )));
        }
        let mut url = self.endpoint();

        let virtual_host = !self.path_style && is_dns_compatible(bucket);
        if virtual_host {
            let host = url
                .host_str()
                .ok_or_else(|| StoreError::InvalidRequest(format!("endpoint {url} has no host")))?
                .to_string();
            url.set_host(Some(&format!("{bucket}.{host}")))
                .map_err(|e| StoreError::InvalidRequest(format!("bad bucket host: {e}")))?;
        }

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StoreError::InvalidRequest("endpoint cannot carry a path".to_string())
            })?;
            segments.pop_if_empty();
            if !virtual_host {
                segments.push(bucket);
            }
            if let Some(key) = key {
                segments.extend(key.split('/'));
            }
        }

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    /// Address, sign and send a request
    ///
    /// Returns the response only when its status is a success; every other
    /// outcome is mapped into a [`StoreError`].
    pub async fn execute(&self, request: S3Request<'_>) -> Result<Response, StoreError> {
        let url = self.url_for(request.bucket, request.key, &request.query)?;
        let region = self.region();
        let resource = request.resource();

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let mut http_request = builder.build().map_err(error::from_reqwest)?;
        self.signer.sign(&mut http_request, &region)?;

        debug!(
            method = %request.method,
            url = %http_request.url(),
            region = %region,
            "s3 request"
        );

        let response = self
            .http
            .execute(http_request)
            .await
            .map_err(error::from_reqwest)?;
        error::check_response(response, request.bucket, &resource).await
    }

    fn read_context(&self) -> RequestContext {
        match self.context.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, StoreError> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&with_scheme)
        .map_err(|e| StoreError::InvalidRequest(format!("invalid endpoint {raw:?}: {e}")))
}

fn aws_endpoint(region: &str) -> Result<Url, StoreError> {
    parse_endpoint(&format!("https://s3.{region}.amazonaws.com"))
}

/// Whether `bucket` can be used as a host name label
fn is_dns_compatible(bucket: &str) -> bool {
    (3..=63).contains(&bucket.len())
        && !bucket.contains('.')
        && bucket
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !bucket.starts_with('-')
        && !bucket.ends_with('-')
}
