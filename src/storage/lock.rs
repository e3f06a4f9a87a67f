//! Advisory bucket lock.
//!
//! The lock is a one-byte, publicly readable marker object. Writing it does
//! not stop another run from writing it too; it only tells observers that the
//! bucket is busy while a dump is being produced.

use super::{CannedAcl, ObjectStore};
use bytes::Bytes;
use planet_dumper_common::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Key of the marker object inside the locked bucket.
pub const LOCK_KEY: &str = "planet-dumper.lock";

const LOCK_BODY: &[u8] = b"1";

pub struct ResourceLock {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
}

impl ResourceLock {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: LOCK_KEY.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write the marker. An existing marker is reported and overwritten.
    pub async fn acquire(&self) -> Result<()> {
        if self.store.object_exists(&self.bucket, &self.key).await? {
            warn!(
                bucket = %self.bucket,
                key = %self.key,
                "lock marker already present, another run may be in progress"
            );
        }

        self.store
            .put_object(
                &self.bucket,
                &self.key,
                Bytes::from_static(LOCK_BODY),
                Some(CannedAcl::PublicRead),
            )
            .await?;

        info!(bucket = %self.bucket, key = %self.key, "acquired lock");
        Ok(())
    }

    /// Delete the marker. A missing marker is not an error.
    pub async fn release(&self) -> Result<()> {
        self.store.delete_object(&self.bucket, &self.key).await?;
        info!(bucket = %self.bucket, key = %self.key, "released lock");
        Ok(())
    }
}
