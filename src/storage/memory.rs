//! In-memory [`ObjectStore`] that records every call.

use super::{
    part_ranges, CannedAcl, FileUpload, ObjectStore, UploadProgress, UploadProgressCallback,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use planet_dumper_common::{Error, Result};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    HeadBucket,
    HeadObject,
    GetObject,
    PutObject,
    UploadFile,
    DeleteObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: StoreOperation,
    pub bucket: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub acl: Option<CannedAcl>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    failing: Mutex<HashSet<StoreOperation>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.buckets.lock().entry(bucket.to_string()).or_default();
        self
    }

    /// Store an object directly, creating the bucket if needed.
    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Bytes>) -> Self {
        self.buckets.lock().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                acl: None,
            },
        );
        self
    }

    /// Make every call of `operation` fail with an object store error.
    pub fn failing(self, operation: StoreOperation) -> Self {
        self.failing.lock().insert(operation);
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets.lock().get(bucket)?.get(key).cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, operation: StoreOperation) -> Vec<StoreCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    fn record(&self, operation: StoreOperation, bucket: &str, key: Option<&str>) -> Result<()> {
        self.calls.lock().push(StoreCall {
            operation,
            bucket: bucket.to_string(),
            key: key.map(str::to_string),
        });

        if self.failing.lock().contains(&operation) {
            return Err(Error::object_store(format!("{operation:?} failed on bucket {bucket}")));
        }
        Ok(())
    }

    fn insert(&self, bucket: &str, key: &str, object: StoredObject) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::object_store(format!("bucket {bucket} does not exist")))?;
        objects.insert(key.to_string(), object);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.record(StoreOperation::HeadBucket, bucket, None)?;
        Ok(self.buckets.lock().contains_key(bucket))
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.record(StoreOperation::HeadObject, bucket, Some(key))?;
        Ok(self.object(bucket, key).is_some())
    }

    async fn get_object_text(&self, bucket: &str, key: &str) -> Result<String> {
        self.record(StoreOperation::GetObject, bucket, Some(key))?;
        let object = self
            .object(bucket, key)
            .ok_or_else(|| Error::object_store(format!("key {key} not found on bucket {bucket}")))?;
        String::from_utf8(object.body.to_vec())
            .map_err(|e| Error::object_store(format!("object {key} is not valid UTF-8: {e}")))
    }

    async fn put_object(

        &self,

        bucket: &str,

        key: &str,

        body: Bytes,

        acl: Option<CannedAcl>,

    ) -> Result<()> {
        self.record(StoreOperation::PutObject, bucket, Some(key))?;
        self.insert(bucket, key, StoredObject { body, acl })
    }

    async fn upload_file(

        &self,

        upload: &FileUpload,

        progress: Option<&UploadProgressCallback>,

    ) -> Result<()> {
        self.record(StoreOperation::UploadFile, &upload.bucket, Some(&upload.key))?;

        let body = Bytes::from(tokio::fs::read(&upload.path).await?);
        let total_bytes = body.len() as u64;
        let ranges = part_ranges(total_bytes, upload.options.part_size);
        let total_parts = ranges.len();

        if let Some(progress) = progress {
            for (index, (offset, length)) in ranges.into_iter().enumerate() {
                progress(UploadProgress {
                    bytes_sent: offset + length,
                    total_bytes,
                    part_index: index + 1,
                    total_parts,
                });
            }
        }

        self.insert(
            &upload.bucket,
            &upload.key,
            StoredObject {
                body,
                acl: upload.options.acl,
            },
        )
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(StoreOperation::DeleteObject, bucket, Some(key))?;
        if let Some(objects) = self.buckets.lock().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UploadOptions;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_existence_checks() {
        let store = MemoryObjectStore::new()
            .with_bucket("empty")
            .with_object("geo-dumps", "41.pbf", "old");

        assert!(store.bucket_exists("empty").await.unwrap());
        assert!(!store.bucket_exists("missing").await.unwrap());
        assert!(store.object_exists("geo-dumps", "41.pbf").await.unwrap());
        assert!(!store.object_exists("geo-dumps", "42.pbf").await.unwrap());
        assert_eq!(store.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_put_requires_bucket() {
        let store = MemoryObjectStore::new();
        let err = store
            .put_object("missing", "k", Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ObjectStore(_)));
    }

    #[tokio::test]
    async fn test_upload_reports_each_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("42.pbf");
        tokio::fs::write(&path, vec![7u8; 10]).await.unwrap();

        let store = MemoryObjectStore::new().with_bucket("geo-dumps");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: UploadProgressCallback = Arc::new(move |p| sink.lock().push(p));

        let upload = FileUpload {
            bucket: "geo-dumps".to_string(),
            key: "42.pbf".to_string(),
            path,
            options: UploadOptions {
                acl: Some(CannedAcl::PublicRead),
                concurrency: 2,
                part_size: 4,
            },
        };
        store.upload_file(&upload, Some(&callback)).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].bytes_sent, 10);
        assert_eq!(seen[2].part_index, 3);
        let stored = store.object("geo-dumps", "42.pbf").unwrap();
        assert_eq!(stored.body.len(), 10);
        assert_eq!(stored.acl, Some(CannedAcl::PublicRead));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryObjectStore::new()
            .with_bucket("b")
            .failing(StoreOperation::DeleteObject);
        assert!(store.delete_object("b", "k").await.is_err());
        assert_eq!(store.calls_of(StoreOperation::DeleteObject).len(), 1);
    }
}
