//! Object storage: the [`ObjectStore`] seam, its S3 and in-memory
//! backends, the advisory bucket lock and artifact publishing.

pub mod lock;
pub mod memory;
pub mod publisher;
pub mod s3;

pub use lock::{ResourceLock, LOCK_KEY};
pub use memory::{MemoryObjectStore, StoreCall, StoreOperation};
pub use publisher::ArtifactPublisher;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use planet_dumper_common::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Canned ACL applied to written objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl CannedAcl {
    pub const ALL: [CannedAcl; 6] = [
        CannedAcl::Private,
        CannedAcl::PublicRead,
        CannedAcl::PublicReadWrite,
        CannedAcl::AuthenticatedRead,
        CannedAcl::BucketOwnerRead,
        CannedAcl::BucketOwnerFullControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
            CannedAcl::BucketOwnerRead => "bucket-owner-read",
            CannedAcl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CannedAcl::ALL
            .into_iter()
            .find(|acl| acl.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = CannedAcl::ALL.iter().map(|a| a.as_str()).collect();
                format!("invalid canned acl '{s}', expected one of: {}", valid.join(", "))
            })
    }
}

/// Snapshot handed to an [`UploadProgressCallback`] after each uploaded part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    /// 1-based number of the part that just finished.
    pub part_index: usize,
    pub total_parts: usize,
}

/// Invoked synchronously by the uploader once per finished part.
pub type UploadProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// How a file upload is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub acl: Option<CannedAcl>,
    /// Parts uploaded in parallel.
    pub concurrency: usize,
    /// Files larger than this are uploaded in parts of this size.
    pub part_size: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            acl: None,
            concurrency: 4,
            part_size: 64 * 1024 * 1024,
        }
    }
}

/// A local file to be streamed to `bucket/key`.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub bucket: String,
    pub key: String,
    pub path: PathBuf,
    pub options: UploadOptions,
}

/// Object storage operations used by the pipeline.
///
/// Existence checks return `Ok(false)` for a missing bucket or key; any other
/// failure is an `Err`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Read a small object as UTF-8 text.
    async fn get_object_text(&self, bucket: &str, key: &str) -> Result<String>;

    async fn put_object(

        &self,

        bucket: &str,

        key: &str,

        body: Bytes,

        acl: Option<CannedAcl>,

    ) -> Result<()>;

    /// Stream a file into the store, in parts when it exceeds the part size.
    async fn upload_file(
        &self,
        upload: &FileUpload,
        progress: Option<&UploadProgressCallback>,
    ) -> Result<()>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Split `total` bytes into `(offset, length)` parts of at most `part_size`.
///
/// An empty file is a single empty part.
pub fn part_ranges(total: u64, part_size: u64) -> Vec<(u64, u64)> {
    let part_size = part_size.max(1);
    if total == 0 {
        return vec![(0, 0)];
    }

    (0..total.div_ceil(part_size))
        .map(|i| {
            let offset = i * part_size;
            (offset, part_size.min(total - offset))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_ranges_cover_file() {
        assert_eq!(part_ranges(10, 4), vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(part_ranges(8, 4), vec![(0, 4), (4, 4)]);
        assert_eq!(part_ranges(3, 4), vec![(0, 3)]);
        assert_eq!(part_ranges(0, 4), vec![(0, 0)]);
    }

    #[test]
    fn test_canned_acl_names() {
        for acl in CannedAcl::ALL {
            assert_eq!(acl.as_str().parse::<CannedAcl>().unwrap(), acl);
        }
        assert!("world-writable".parse::<CannedAcl>().is_err());
        assert_eq!(CannedAcl::default(), CannedAcl::Private);
    }
}
