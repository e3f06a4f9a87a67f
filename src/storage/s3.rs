//! S3-compatible [`ObjectStore`] backed by the AWS SDK.

use super::{
    part_ranges, CannedAcl, FileUpload, ObjectStore, UploadProgress, UploadProgressCallback,
};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use planet_dumper_common::{Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the environment credential chain and `config`.
    ///
    /// `endpoint` overrides `config.endpoint` when set.
    pub async fn from_config(config: &S3Config, endpoint: Option<&str>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = endpoint.or(config.endpoint.as_deref()) {
            debug!(endpoint, "using custom s3 endpoint");
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(Client::from_conf(builder.build()))
    }

    async fn upload_single(
        &self,
        upload: &FileUpload,
        size: u64,
        progress: Option<&UploadProgressCallback>,
    ) -> Result<()> {
        let body = ByteStream::from_path(&upload.path)
            .await
            .map_err(|e| store_error(&format!("reading {}", upload.path.display()), e))?;

        self.client
            .put_object()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .body(body)
            .content_length(size as i64)
            .set_acl(upload.options.acl.map(sdk_acl))
            .send()
            .await
            .map_err(|e| {
                let operation = format!("put of key {} on bucket {}", upload.key, upload.bucket);
                store_error(&operation, e)
            })?;

        if let Some(progress) = progress {
            progress(UploadProgress {
                bytes_sent: size,
                total_bytes: size,
                part_index: 1,
                total_parts: 1,
            });
        }
        Ok(())
    }

    async fn upload_multipart(
        &self,
        upload: &FileUpload,
        size: u64,
        progress: Option<&UploadProgressCallback>,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .set_acl(upload.options.acl.map(sdk_acl))
            .send()
            .await
            .map_err(|e| store_error(&format!("multipart creation for key {}", upload.key), e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::object_store("multipart upload created without an upload id"))?
            .to_string();

        debug!(bucket = %upload.bucket, key = %upload.key, upload_id, "started multipart upload");

        let parts = match self.upload_parts(upload, &upload_id, size, progress).await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&upload.bucket)
                    .key(&upload.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        upload_id,
                        error = %DisplayErrorContext(abort),
                        "failed to abort multipart upload"
                    );
                }
                return Err(e);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| store_error(&format!("multipart completion for key {}", upload.key), e))?;

        Ok(())
    }

    async fn upload_parts(
        &self,
        upload: &FileUpload,
        upload_id: &str,
        size: u64,
        progress: Option<&UploadProgressCallback>,
    ) -> Result<Vec<CompletedPart>> {
        let ranges = part_ranges(size, upload.options.part_size);
        let total_parts = ranges.len();
        let sent = AtomicU64::new(0);
        let sent = &sent;
        let client = &self.client;
        let path: &Path = &upload.path;

        let mut parts: Vec<CompletedPart> = futures::stream::iter(ranges.into_iter().enumerate())
            .map(move |(index, (offset, length))| async move {
                let part_number = i32::try_from(index + 1)
                    .map_err(|_| Error::object_store("too many parts for a multipart upload"))?;

                let body = ByteStream::read_from()
                    .path(path)
                    .offset(offset)
                    .length(Length::Exact(length))
                    .build()
                    .await
                    .map_err(|e| store_error(&format!("reading part {part_number}"), e))?;

                let output = client
                    .upload_part()
                    .bucket(&upload.bucket)
                    .key(&upload.key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .content_length(length as i64)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| store_error(&format!("upload of part {part_number}"), e))?;

                let bytes_sent = sent.fetch_add(length, Ordering::SeqCst) + length;
                if let Some(progress) = progress {
                    progress(UploadProgress {
                        bytes_sent,
                        total_bytes: size,
                        part_index: index + 1,
                        total_parts,
                    });
                }

                Ok::<_, Error>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .build(),
                )
            })
            .buffer_unordered(upload.options.concurrency.max(1))
            .try_collect()
            .await?;

        parts.sort_by_key(|part| part.part_number());
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        debug!(bucket, "head bucket");
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(store_error(&format!("head bucket {bucket}"), e)),
        }
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        debug!(bucket, key, "head object");
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(store_error(&format!("head object {key} on bucket {bucket}"), e)),
        }
    }

    async fn get_object_text(&self, bucket: &str, key: &str) -> Result<String> {
        debug!(bucket, key, "get object");
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| store_error(&format!("get of key {key} on bucket {bucket}"), e))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| store_error(&format!("reading key {key}"), e))?
            .into_bytes();

        String::from_utf8(body.to_vec())
            .map_err(|e| Error::object_store(format!("object {key} is not valid UTF-8: {e}")))
    }

    async fn put_object(

        &self,

        bucket: &str,

        key: &str,

        body: Bytes,

        acl: Option<CannedAcl>,

    ) -> Result<()> {
        info!(bucket, key, acl = ?acl.map(|a| a.as_str()), "putting object");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_acl(acl.map(sdk_acl))
            .send()
            .await
            .map_err(|e| store_error(&format!("put of key {key} on bucket {bucket}"), e))?;
        Ok(())
    }

    async fn upload_file(

        &self,

        upload: &FileUpload,

        progress: Option<&UploadProgressCallback>,

    ) -> Result<()> {
        let size = tokio::fs::metadata(&upload.path).await?.len();
        info!(
            bucket = %upload.bucket,
            key = %upload.key,
            size,
            acl = ?upload.options.acl.map(|a| a.as_str()),
            "uploading file"
        );

        if size <= upload.options.part_size {
            self.upload_single(upload, size, progress).await
        } else {
            self.upload_multipart(upload, size, progress).await
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        debug!(bucket, key, "delete object");
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| store_error(&format!("delete of key {key} on bucket {bucket}"), e))?;
        Ok(())
    }
}

fn sdk_acl(acl: CannedAcl) -> ObjectCannedAcl {
    ObjectCannedAcl::from(acl.as_str())
}

fn store_error<E: std::error::Error>(operation: &str, err: E) -> Error {
    Error::object_store(format!("{operation} failed: {}", DisplayErrorContext(err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acl_mapping() {
        assert_eq!(sdk_acl(CannedAcl::PublicRead), ObjectCannedAcl::PublicRead);
        assert_eq!(sdk_acl(CannedAcl::Private), ObjectCannedAcl::Private);
        assert_eq!(
            sdk_acl(CannedAcl::BucketOwnerFullControl),
            ObjectCannedAcl::BucketOwnerFullControl
        );
    }

    #[tokio::test]
    async fn test_from_config_sets_region() {
        let config = S3Config {
            endpoint: Some("http://configured:9000".to_string()),
            force_path_style: true,
            ..S3Config::default()
        };
        let store = S3ObjectStore::from_config(&config, Some("http://override:9000")).await;
        let conf = store.client.config();
        assert_eq!(conf.region().map(|r| r.as_ref()), Some("us-east-1"));
    }
}
