//! Object calls and error mapping

use std::{sync::Arc, time::Duration};

use cloudsync_core::{
    config::ConfigBuilder,
    domain::{ByteRange, MetadataDirective, ObjectMetadata, ObjectRef, StoreError},
    ports::ObjectStore,
};
use cloudsync_s3::AnonymousSigner;
use wiremock::{
    matchers::{body_bytes, header, method, path},
    Mock, ResponseTemplate,
};

use crate::common::{self, BUCKET};

#[tokio::test]
async fn test_put_object_request_shape() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .and(path(format!("/{BUCKET}/docs/readme.txt")))
        .and(header("content-md5", "XUFAKrxLKna5cZ2REBfFkg=="))
        .and(header("x-amz-meta-mtime", "1700000000.25"))
        .and(header("content-type", "text/plain"))
        .and(body_bytes(b"hello".to_vec()))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"5d41402abc4b2a76b9719d911017c592\""))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = ObjectMetadata::default()
        .with_content_type("text/plain")
        .with_entry("mtime", "1700000000.25");
    let etag = store
        .put_object(
            &common::object("docs/readme.txt"),
            b"hello",
            Some("XUFAKrxLKna5cZ2REBfFkg=="),
            &metadata,
        )
        .await
        .unwrap();
    assert_eq!(etag, "\"5d41402abc4b2a76b9719d911017c592\"");
}

#[tokio::test]
async fn test_head_object_reads_headers() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("HEAD"))
        .and(path(format!("/{BUCKET}/photo.jpg")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", "2048")
                .insert_header("ETag", "\"abc-3\"")
                .insert_header("Content-Type", "image/jpeg")
                .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                .insert_header("x-amz-meta-mtime", "1445412480")
                .insert_header("x-amz-meta-md5chksum", "XUFAKrxLKna5cZ2REBfFkg=="),
        )
        .mount(&server)
        .await;

    let info = store.head_object(&common::object("photo.jpg")).await.unwrap();
    assert_eq!(info.size, 2048);
    assert_eq!(info.etag.as_deref(), Some("\"abc-3\""));
    assert_eq!(info.metadata.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(info.metadata.md5(), Some("XUFAKrxLKna5cZ2REBfFkg=="));
    assert!(info.metadata.mtime().is_some());
    assert!(info.last_modified.is_some());
}

#[tokio::test]
async fn test_head_missing_object() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = store.head_object(&common::object("nope")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_copy_object_keeps_metadata() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .and(path(format!("/{BUCKET}/dst.bin")))
        .and(header("x-amz-copy-source", "/src-bucket/src.bin"))
        .and(header("x-amz-metadata-directive", "COPY"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<CopyObjectResult><LastModified>2026-01-01T00:00:00.000Z</LastModified><ETag>"copied"</ETag></CopyObjectResult>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = ObjectMetadata::default().with_entry("ignored", "yes");
    let etag = store
        .copy_object(
            &ObjectRef::new("src-bucket", "src.bin").unwrap(),
            &common::object("dst.bin"),
            MetadataDirective::Copy,
            &metadata,
        )
        .await
        .unwrap();
    assert_eq!(etag, "\"copied\"");

    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].headers.contains_key("x-amz-meta-ignored"));
}

#[tokio::test]
async fn test_copy_object_replaces_metadata() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .and(header("x-amz-metadata-directive", "REPLACE"))
        .and(header("x-amz-meta-owner", "bob"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<CopyObjectResult><ETag>"replaced"</ETag></CopyObjectResult>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = ObjectMetadata::default().with_entry("owner", "bob");
    let etag = store
        .copy_object(
            &common::object("a"),
            &common::object("b"),
            MetadataDirective::Replace,
            &metadata,
        )
        .await
        .unwrap();
    assert_eq!(etag, "\"replaced\"");
}

#[tokio::test]
async fn test_copy_object_error_inside_ok_response() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(common::error_body("InternalError", "Copy failed midway.")),
        )
        .mount(&server)
        .await;

    let err = store
        .copy_object(
            &common::object("a"),
            &common::object("b"),
            MetadataDirective::Copy,
            &ObjectMetadata::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Server { status: 200, .. }));
}

#[tokio::test]
async fn test_copy_source_keeps_dot_segments() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .and(path(format!("/{BUCKET}/dst.bin")))
        .and(header("x-amz-copy-source", "/src-bucket/a/./b"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<CopyObjectResult><ETag>"dots"</ETag></CopyObjectResult>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let etag = store
        .copy_object(
            &ObjectRef::new("src-bucket", "a/./b").unwrap(),
            &common::object("dst.bin"),
            MetadataDirective::Copy,
            &ObjectMetadata::default(),
        )
        .await
        .unwrap();
    assert_eq!(etag, "\"dots\"");
}

#[tokio::test]
async fn test_dot_segment_keys_never_reach_another_object() {
    let (server, store) = common::setup_s3_mock().await;

    for key in [".", "a/../b", "a/./b"] {
        let err = store
            .put_object(&common::object(key), b"x", None, &ObjectMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)), "{key}");
        let err = store.head_object(&common::object(key)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)), "{key}");
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_object_range() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("GET"))
        .and(path(format!("/{BUCKET}/data.bin")))
        .and(header("range", "bytes=10-14"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"01234".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let data = store
        .get_object_range(&common::object("data.bin"), ByteRange::with_len(10, 5))
        .await
        .unwrap();
    assert_eq!(&data[..], b"01234");
}

#[tokio::test]
async fn test_get_empty_range_sends_nothing() {
    let (server, store) = common::setup_s3_mock().await;

    let data = store
        .get_object_range(&common::object("data.bin"), ByteRange::with_len(10, 0))
        .await
        .unwrap();
    assert!(data.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_short_range_read_is_invalid_response() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"012".to_vec()))
        .mount(&server)
        .await;

    let err = store
        .get_object_range(&common::object("data.bin"), ByteRange::with_len(0, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_delete_object() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/{BUCKET}/old.bin")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store.delete_object(&common::object("old.bin")).await.unwrap();
}

#[tokio::test]
async fn test_slow_down_is_throttled_with_retry_after() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("Retry-After", "7")
                .set_body_string(common::error_body("SlowDown", "Please reduce your request rate.")),
        )
        .mount(&server)
        .await;

    let err = store
        .put_object(&common::object("k"), b"x", None, &ObjectMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Throttled { status: 503, .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_access_denied_is_rejected() {
    let (server, store) = common::setup_s3_mock().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string(common::error_body("AccessDenied", "Access Denied")),
        )
        .mount(&server)
        .await;

    let err = store
        .put_object(&common::object("k"), b"x", None, &ObjectMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Rejected {
            status: 403,
            code: "AccessDenied".to_string(),
            message: "Access Denied".to_string(),
        }
    );
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let config = ConfigBuilder::new()
        .provider("Minio")
        .endpoint("http://127.0.0.1:1")
        .build();
    let store = common::store_with(&config, Arc::new(AnonymousSigner));

    let err = store
        .put_object(&common::object("k"), b"x", None, &ObjectMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Network(_)));
}
