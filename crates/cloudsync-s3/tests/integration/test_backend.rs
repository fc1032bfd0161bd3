//! The transfer engine driving the adapter over HTTP

use std::{io::Cursor, sync::Arc};

use cloudsync_core::{domain::ObjectMetadata, ports::ObjectStore};
use cloudsync_s3::AnonymousSigner;
use cloudsync_transfer::Backend;
use wiremock::{
    matchers::{header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::common::{self, BUCKET};

const MIB: usize = 1024 * 1024;

async fn mount_bucket(server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path(format!("/{BUCKET}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_small_put_is_one_request() {
    let server = MockServer::start().await;
    mount_bucket(&server).await;
    Mock::given(method("PUT"))
        .and(path(format!("/{BUCKET}/hello.txt")))
        .and(header_exists("content-md5"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"5d41402abc4b2a76b9719d911017c592\""))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::config_for(&server).build();
    let store: Arc<dyn ObjectStore> = Arc::new(common::store_with(&config, Arc::new(AnonymousSigner)));
    let backend = Backend::new(store, &config).unwrap();

    let summary = backend
        .put(
            Cursor::new(b"hello".to_vec()),
            Some(5),
            &common::object("hello.txt"),
            ObjectMetadata::default(),
        )
        .await
        .unwrap();
    assert_eq!(summary.checksum, "5d41402abc4b2a76b9719d911017c592");
    assert_eq!(summary.parts, 1);
    assert!(summary.upload_id.is_none());
}

#[tokio::test]
async fn test_multipart_put_over_http() {
    let server = MockServer::start().await;
    mount_bucket(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/{BUCKET}/big.bin")))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<InitiateMultipartUploadResult><UploadId>up-1</UploadId></InitiateMultipartUploadResult>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    for part in 1..=2 {
        Mock::given(method("PUT"))
            .and(path(format!("/{BUCKET}/big.bin")))
            .and(query_param("partNumber", part.to_string()))
            .and(query_param("uploadId", "up-1"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", format!("\"part-{part}\"")))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(format!("/{BUCKET}/big.bin")))
        .and(query_param("uploadId", "up-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<CompleteMultipartUploadResult><ETag>"final-2"</ETag></CompleteMultipartUploadResult>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::config_for(&server)
        .upload_cutoff(0)
        .disable_checksum(true)
        .build();
    let store: Arc<dyn ObjectStore> = Arc::new(common::store_with(&config, Arc::new(AnonymousSigner)));
    let backend = Backend::new(store, &config).unwrap();

    let data = vec![7u8; 6 * MIB];
    let summary = backend
        .put(
            Cursor::new(data),
            Some((6 * MIB) as u64),
            &common::object("big.bin"),
            ObjectMetadata::default(),
        )
        .await
        .unwrap();

    assert_eq!(summary.parts, 2);
    assert_eq!(summary.upload_id.as_deref(), Some("up-1"));
    assert_eq!(summary.etag, "\"final-2\"");

    let requests = server.received_requests().await.unwrap();
    let complete = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.query().is_some_and(|q| q.contains("uploadId")))
        .unwrap();
    let body = String::from_utf8(complete.body.clone()).unwrap();
    assert!(body.contains("part-1") && body.contains("part-2"));
}
