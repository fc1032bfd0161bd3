//! CloudSync S3 - REST adapter for S3-compatible providers
//!
//! Implements the [`ObjectStore`](cloudsync_core::ports::ObjectStore) port
//! over plain HTTP with `reqwest`. Bodies are S3's XML documents, parsed and
//! written with `quick-xml`'s serde support.
//!
//! ## Modules
//!
//! - [`client`] - Endpoint, region and addressing state; request execution
//! - [`error`] - Mapping of HTTP failures into `StoreError`
//! - [`provider`] - The `ObjectStore` implementation
//! - [`signer`] - The request signing seam
//! - [`xml`] - Wire documents

pub mod client;
pub mod error;
pub mod provider;
pub mod signer;
pub mod xml;

pub use client::S3Client;
pub use provider::S3ObjectStore;
pub use signer::{AnonymousSigner, RequestSigner};
