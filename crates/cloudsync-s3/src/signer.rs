//! Request signing seam
//!
//! The adapter never handles credentials itself. Every outgoing request is
//! passed to a [`RequestSigner`] once it is fully built, together with the
//! region it is addressed to, so a SigV4 implementation can add its headers.

use cloudsync_core::domain::StoreError;
use reqwest::Request;

/// Adds authentication to a fully built request
pub trait RequestSigner: Send + Sync {
    /// Sign `request` for `region`
    ///
    /// Called after the URL, headers and body are final. Called again for
    /// every attempt, so signatures never outlive their timestamp.
    fn sign(&self, request: &mut Request, region: &str) -> Result<(), StoreError>;
}

/// Signer for public buckets and test endpoints: leaves requests untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSigner;

impl RequestSigner for AnonymousSigner {
    fn sign(&self, _request: &mut Request, _region: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
