//! Uploading the final artifact with collision protection.

use super::{
    CannedAcl, FileUpload, ObjectStore, UploadOptions, UploadProgress, UploadProgressCallback,
};
use planet_dumper_common::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    options: UploadOptions,
    progress: Option<UploadProgressCallback>,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, options: UploadOptions) -> Self {
        Self {
            store,
            options,
            progress: None,
        }
    }

    /// Log a line per uploaded part.
    pub fn with_progress_logging(self) -> Self {
        self.with_progress(Arc::new(log_progress))
    }

    pub fn with_progress(mut self, callback: UploadProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Upload `path` to `bucket/key`.
    ///
    /// The bucket must exist and the key must not: an existing key is never
    /// overwritten, and nothing is uploaded unless both checks pass.
    pub async fn publish(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        acl: Option<CannedAcl>,
    ) -> Result<()> {
        if !self.store.bucket_exists(bucket).await? {
            return Err(Error::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }

        if self.store.object_exists(bucket, key).await? {
            return Err(Error::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let upload = FileUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            path: path.to_path_buf(),
            options: UploadOptions {
                acl: acl.or(self.options.acl),
                ..self.options
            },
        };

        self.store.upload_file(&upload, self.progress.as_ref()).await?;
        info!(bucket, key, path = %path.display(), "published artifact");
        Ok(())
    }
}

fn log_progress(progress: UploadProgress) {
    let percent = if progress.total_bytes == 0 {
        100
    } else {
        progress.bytes_sent * 100 / progress.total_bytes
    };
    info!(
        part = progress.part_index,
        parts = progress.total_parts,
        bytes_sent = progress.bytes_sent,
        total_bytes = progress.total_bytes,
        "upload progress {percent}%"
    );
}
