//! Provider quirks
//!
//! S3-compatible providers deviate from AWS in small, documented ways: some
//! only support the v1 listing call, some cannot be addressed with virtual
//! hosts, some compute multipart ETags differently. Each deviation is captured
//! as a flag in [`ProviderQuirks`], resolved once per backend from a fixed
//! table keyed by provider identity. Transfer code consults the flags and never
//! the provider name.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Provider minimum size of every part except the last
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Protocol ceiling on the number of parts in one multipart upload
pub const MAX_UPLOAD_PARTS: u32 = 10_000;

/// Identity used when the configured provider is not in the table
pub const OTHER_PROVIDER: &str = "Other";

const MIB: u64 = 1024 * 1024;

/// Object listing API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListVersion {
    /// `ListObjects`
    V1,
    /// `ListObjectsV2`
    V2,
}

impl ListVersion {
    /// Map the numeric configuration value (1 or 2)
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(ListVersion::V1),
            2 => Some(ListVersion::V2),
            _ => None,
        }
    }
}

/// Immutable behavioral flags for one provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderQuirks {
    /// Identity the flags were resolved for (`Other` for unknown providers)
    pub provider: String,
    /// Listing call to use
    pub list_version: ListVersion,
    /// Address buckets as `bucket.host` rather than `host/bucket`
    pub virtual_host_style: bool,
    /// Ask for URL-encoded keys in listings
    pub url_encode_listings: bool,
    /// Multipart ETags follow the AWS hash-of-hashes scheme and can be verified
    pub use_multipart_etag: bool,
    /// `BucketAlreadyExists` means another owner holds the name
    pub use_already_exists: bool,
    /// Provider accepts multipart uploads at all
    pub use_multipart_uploads: bool,
    /// Provider supports ranged part copies
    pub use_multipart_copy: bool,
    /// Put the bucket in the path even when a virtual host would work
    pub force_path_style: bool,
    /// Part-count ceiling for one upload
    pub max_upload_parts: u32,
    /// Minimum size of every part but the last
    pub min_chunk_size: u64,
    /// Smallest chunk size worth sending; the configured size is raised to it
    pub chunk_size_floor: u64,
}

/// Explicit settings that take precedence over the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuirkOverrides {
    pub list_version: Option<ListVersion>,
    pub list_url_encode: Option<bool>,
    pub use_multipart_etag: Option<bool>,
    pub use_already_exists: Option<bool>,
    pub use_multipart_uploads: Option<bool>,
    pub force_path_style: bool,
    pub max_upload_parts: u32,
}

impl Default for QuirkOverrides {
    fn default() -> Self {
        Self {
            list_version: None,
            list_url_encode: None,
            use_multipart_etag: None,
            use_already_exists: None,
            use_multipart_uploads: None,
            force_path_style: true,
            max_upload_parts: MAX_UPLOAD_PARTS,
        }
    }
}

// ============================================================================
// Quirk table
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Flags {
    list_v2: bool,
    virtual_host_style: bool,
    url_encode_listings: bool,
    use_multipart_etag: bool,
    use_already_exists: bool,
    use_multipart_copy: bool,
    max_upload_parts: Option<u32>,
    chunk_size_floor: Option<u64>,
}

const MODERN: Flags = Flags {
    list_v2: true,
    virtual_host_style: true,
    url_encode_listings: true,
    use_multipart_etag: true,
    use_already_exists: true,
    use_multipart_copy: true,
    max_upload_parts: None,
    chunk_size_floor: None,
};

const CONSERVATIVE: Flags = Flags {
    list_v2: false,
    virtual_host_style: false,
    url_encode_listings: false,
    use_multipart_etag: false,
    use_already_exists: false,
    ..MODERN
};

const QUIRK_TABLE: &[(&str, Flags)] = &[
    ("AWS", MODERN),
    ("Alibaba", Flags { use_multipart_etag: false, ..MODERN }),
    ("ArvanCloud", Flags { use_multipart_etag: true, ..CONSERVATIVE }),
    ("Ceph", Flags { use_multipart_etag: true, ..CONSERVATIVE }),
    ("ChinaMobile", Flags { use_multipart_etag: true, ..CONSERVATIVE }),
    ("Cloudflare", Flags { virtual_host_style: false, use_multipart_etag: false, ..MODERN }),
    ("DigitalOcean", Flags { url_encode_listings: false, use_already_exists: false, ..MODERN }),
    ("Dreamhost", Flags { url_encode_listings: false, use_already_exists: false, ..MODERN }),
    (
        "GCS",
        Flags {
            use_multipart_copy: false,
            ..MODERN
        },
    ),
    (
        "HuaweiOBS",
        Flags {
            list_v2: false,
            url_encode_listings: false,
            use_already_exists: false,
            ..MODERN
        },
    ),
    ("IBMCOS", CONSERVATIVE),
    ("IDrive", Flags { virtual_host_style: false, use_already_exists: false, ..MODERN }),
    (
        "IONOS",
        Flags {
            virtual_host_style: false,
            url_encode_listings: false,
            use_already_exists: false,
            ..MODERN
        },
    ),
    ("Leviia", Flags { use_already_exists: false, ..MODERN }),
    ("Liara", Flags { list_v2: true, ..CONSERVATIVE }),
    ("Linode", MODERN),
    ("LyveCloud", Flags { use_multipart_etag: false, use_already_exists: false, ..MODERN }),
    ("Minio", Flags { virtual_host_style: false, ..MODERN }),
    ("Netease", Flags { virtual_host_style: true, ..CONSERVATIVE }),
    ("Petabox", Flags { use_already_exists: false, ..MODERN }),
    ("Qiniu", Flags { list_v2: true, ..CONSERVATIVE }),
    ("RackCorp", Flags { use_multipart_etag: false, use_already_exists: false, ..MODERN }),
    ("Rclone", Flags { list_v2: true, url_encode_listings: true, ..CONSERVATIVE }),
    (
        "Scaleway",
        Flags {
            url_encode_listings: false,
            use_already_exists: false,
            max_upload_parts: Some(1000),
            ..MODERN
        },
    ),
    ("SeaweedFS", CONSERVATIVE),
    ("StackPath", Flags { use_multipart_etag: true, ..CONSERVATIVE }),
    (
        "Storj",
        Flags {
            use_already_exists: false,
            chunk_size_floor: Some(64 * MIB),
            ..MODERN
        },
    ),
    ("Synology", Flags { use_multipart_etag: false, use_already_exists: false, ..MODERN }),
    (
        "TencentCOS",
        Flags {
            list_v2: false,
            use_multipart_etag: false,
            use_already_exists: false,
            ..MODERN
        },
    ),
    ("Wasabi", MODERN),
    (OTHER_PROVIDER, CONSERVATIVE),
];

impl ProviderQuirks {
    /// Resolve the quirks for `provider`, applying explicit overrides
    ///
    /// Unknown identities log a warning and fall back to the conservative
    /// `Other` entry, which assumes neither v2 listings, URL-encoded listings,
    /// virtual-host addressing nor verifiable multipart ETags.
    pub fn resolve(provider: &str, overrides: &QuirkOverrides) -> Self {
        let (name, flags) = match QUIRK_TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(provider))
        {
            Some((name, flags)) => (*name, *flags),
            None => {
                warn!(provider, "s3 provider not known, using conservative defaults");
                (OTHER_PROVIDER, CONSERVATIVE)
            }
        };

        let list_version = overrides.list_version.unwrap_or(if flags.list_v2 {
            ListVersion::V2
        } else {
            ListVersion::V1
        });

        let mut max_upload_parts = overrides.max_upload_parts.clamp(1, MAX_UPLOAD_PARTS);
        if let Some(cap) = flags.max_upload_parts {
            max_upload_parts = max_upload_parts.min(cap);
        }

        Self {
            provider: name.to_string(),
            list_version,
            virtual_host_style: flags.virtual_host_style,
            url_encode_listings: overrides
                .list_url_encode
                .unwrap_or(flags.url_encode_listings),
            use_multipart_etag: overrides
                .use_multipart_etag
                .unwrap_or(flags.use_multipart_etag),
            use_already_exists: overrides
                .use_already_exists
                .unwrap_or(flags.use_already_exists),
            use_multipart_uploads: overrides.use_multipart_uploads.unwrap_or(true),
            use_multipart_copy: flags.use_multipart_copy,
            force_path_style: overrides.force_path_style && !flags.virtual_host_style,
            max_upload_parts,
            min_chunk_size: MIN_CHUNK_SIZE,
            chunk_size_floor: flags.chunk_size_floor.unwrap_or(MIN_CHUNK_SIZE),
        }
    }

    /// Quirks for a fully AWS-compatible provider
    pub fn aws() -> Self {
        Self::resolve("AWS", &QuirkOverrides::default())
    }
}
