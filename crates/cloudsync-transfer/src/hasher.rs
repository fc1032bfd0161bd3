//! Multipart integrity hashing
//!
//! S3 reports the ETag of a multipart object as the MD5 of the concatenated
//! binary MD5s of its parts, followed by `-` and the part count. This module
//! reproduces that value locally so a finished upload can be checked against
//! what the provider computed.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use md5::{Digest, Md5};

/// Streaming "hash of hashes" over fixed-size parts
///
/// Bytes accumulate in a primary digest until `part_size` is reached. The
/// finished part digest is then held back and only folded into the final digest
/// once another part begins, so a single-part object reports a plain MD5.
#[derive(Debug, Clone)]
pub struct MultipartHasher {
    part_size: u64,
    primary: Md5,
    primary_len: u64,
    held: Option<[u8; 16]>,
    folded: Md5,
    folded_count: usize,
}

impl MultipartHasher {
    /// Create a hasher splitting input every `part_size` bytes
    pub fn new(part_size: u64) -> Self {
        Self {
            part_size: part_size.max(1),
            primary: Md5::new(),
            primary_len: 0,
            held: None,
            folded: Md5::new(),
            folded_count: 0,
        }
    }

    /// Feed bytes in stream order
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.part_size - self.primary_len;
            let take = usize::try_from(room).map_or(data.len(), |r| r.min(data.len()));
            self.primary.update(&data[..take]);
            self.primary_len += take as u64;
            data = &data[take..];

            if self.primary_len == self.part_size {
                let digest: [u8; 16] = self.primary.finalize_reset().into();
                self.primary_len = 0;
                self.add_part_digest(digest);
            }
        }
    }

    /// Append the MD5 of one whole part
    ///
    /// Used when parts were hashed elsewhere, e.g. by concurrent workers; the
    /// digests must be added in part-number order.
    pub fn add_part_digest(&mut self, digest: [u8; 16]) {
        if let Some(prev) = self.held.replace(digest) {
            self.folded.update(prev);
            self.folded_count += 1;
        }
    }

    /// Number of whole parts hashed so far
    pub fn parts_count(&self) -> usize {
        self.folded_count + usize::from(self.held.is_some())
    }

    /// Number of parts the object has, counting a trailing partial part
    pub fn total_parts(&self) -> usize {
        let total = self.parts_count() + usize::from(self.primary_len > 0);
        total.max(1)
    }

    /// Current digest; does not change the hasher's state
    pub fn sum(&self) -> [u8; 16] {
        if self.folded_count == 0 {
            match self.held {
                None => return self.primary.clone().finalize().into(),
                Some(only) if self.primary_len == 0 => return only,
                Some(_) => {}
            }
        }

        let mut out = self.folded.clone();
        if let Some(held) = self.held {
            out.update(held);
        }
        if self.primary_len > 0 {
            out.update(self.primary.clone().finalize());
        }
        out.finalize().into()
    }

    /// ETag-style checksum: bare hex for one part, `hex-N` for more
    pub fn checksum(&self) -> String {
        format_checksum(&self.sum(), self.total_parts())
    }
}

impl io::Write for MultipartHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn format_checksum(sum: &[u8; 16], parts: usize) -> String {
    if parts > 1 {
        format!("{}-{}", hex::encode(sum), parts)
    } else {
        hex::encode(sum)
    }
}

/// MD5 of a buffer
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

// ============================================================================
// PartDigests
// ============================================================================

/// Per-part MD5s recorded by concurrent workers in any order
#[derive(Debug, Default)]
pub struct PartDigests {
    digests: Mutex<BTreeMap<u32, [u8; 16]>>,
}

impl PartDigests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the digest of `part_number`
    pub fn record(&self, part_number: u32, digest: [u8; 16]) {
        let mut digests = self.digests.lock().unwrap_or_else(|e| e.into_inner());
        digests.insert(part_number, digest);
    }

    pub fn len(&self) -> usize {
        self.digests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checksum of the whole object, folding digests in part-number order
    pub fn checksum(&self, part_size: u64) -> String {
        let digests = self.digests.lock().unwrap_or_else(|e| e.into_inner());
        let mut hasher = MultipartHasher::new(part_size);
        for digest in digests.values() {
            hasher.add_part_digest(*digest);
        }
        hasher.checksum()
    }

    /// ETag a provider reports for the completed upload: always the
    /// `<hex>-<parts>` form, even for a single part
    pub fn multipart_etag(&self) -> String {
        let digests = self.digests.lock().unwrap_or_else(|e| e.into_inner());
        let mut concat = Vec::with_capacity(digests.len() * 16);
        for digest in digests.values() {
            concat.extend_from_slice(digest);
        }
        format!("{}-{}", hex::encode(md5_digest(&concat)), digests.len())
    }
}

/// Normalize a provider ETag for comparison: lowercase, quotes trimmed
pub fn normalize_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_ascii_lowercase()
}
