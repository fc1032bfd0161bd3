//! Shared helpers for the S3 adapter integration tests
//!
//! Each test starts its own `MockServer` and points a store at it with
//! path-style addressing, so requests arrive as `/{bucket}/{key}`.

#![allow(dead_code)]

use std::sync::Arc;

use cloudsync_core::{
    config::{Config, ConfigBuilder},
    domain::{ObjectRef, StoreError},
};
use cloudsync_s3::{AnonymousSigner, RequestSigner, S3ObjectStore};
use reqwest::{header::HeaderValue, Request};
use wiremock::MockServer;

pub const BUCKET: &str = "test-bucket";

/// Configuration for a Minio-like provider served by `server`
pub fn config_for(server: &MockServer) -> ConfigBuilder {
    ConfigBuilder::new()
        .provider("Minio")
        .region("us-east-1")
        .endpoint(server.uri())
        .min_sleep_ms(1)
        .max_sleep_ms(4)
        .max_attempts(3)
}

pub fn store_with(config: &Config, signer: Arc<dyn RequestSigner>) -> S3ObjectStore {
    S3ObjectStore::from_config(config, signer).expect("store builds")
}

/// Start a mock server and a store addressing it
pub async fn setup_s3_mock() -> (MockServer, S3ObjectStore) {
    let server = MockServer::start().await;
    let store = store_with(&config_for(&server).build(), Arc::new(AnonymousSigner));
    (server, store)
}

pub fn object(key: &str) -> ObjectRef {
    ObjectRef::new(BUCKET, key).expect("valid object ref")
}

/// S3 `<Error>` document
pub fn error_body(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>{code}</Code><Message>{message}</Message><RequestId>4442587FB7D0A2F9</RequestId></Error>"#
    )
}

/// Adds the region it was asked to sign for as `x-signed-region`
pub struct RegionSigner;

impl RequestSigner for RegionSigner {
    fn sign(&self, request: &mut Request, region: &str) -> Result<(), StoreError> {
        let value = HeaderValue::from_str(region)
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert("x-signed-region", value);
        Ok(())
    }
}

/// Refuses to sign anything
pub struct FailingSigner;

impl RequestSigner for FailingSigner {
    fn sign(&self, _request: &mut Request, _region: &str) -> Result<(), StoreError> {
        Err(StoreError::InvalidRequest("no credentials".to_string()))
    }
}
