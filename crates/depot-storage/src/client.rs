//! Object-storage client with single-shot and parallel multipart upload.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, CosCredentials, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::multipart::{
    part_upload_pool, should_use_multipart_upload, PartETag, PartSpec, UploadPartPlan,
};
use crate::request::{
    CheckObjectExistRequest, CopyObjectRequest, CosRequest, DeleteObjectRequest,
    GetObjectRequest, HttpResponse, RequestBody,
};
use crate::response::{
    handle_abort_multipart, handle_check_exist, handle_complete_multipart, handle_copy_object,
    handle_delete, handle_get_object, handle_initiate_multipart, handle_put_object,
    handle_upload_part, CopyObjectResponse, CosObject, PutObjectResponse,
};
use crate::retry::{RetryExecutor, RetryOutcome};
use crate::sign::CosSigner;
use crate::transport::{HttpTransport, ReqwestTransport};

struct ClientInner {
    credentials: CosCredentials,
    config: ClientConfig,
    signer: CosSigner,
    transport: Arc<dyn HttpTransport>,
    retry: RetryExecutor,
}

/// Client for one bucket. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct CosClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for CosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosClient")
            .field("bucket", &self.inner.credentials.bucket)
            .field("region", &self.inner.credentials.region)
            .field("signer", &self.inner.signer)
            .finish_non_exhaustive()
    }
}

impl CosClient {
    /// Client talking HTTP through `reqwest`.
    pub fn new(credentials: CosCredentials, config: ClientConfig) -> StorageResult<Self> {
        let transport = ReqwestTransport::new(credentials.timeout())?;
        Ok(Self::with_transport(credentials, config, Arc::new(transport)))
    }

    /// Client built from a loaded [`StorageConfig`].
    pub fn from_config(config: StorageConfig) -> StorageResult<Self> {
        Self::new(config.credentials, config.client)
    }

    /// Client over an arbitrary transport.
    pub fn with_transport(
        credentials: CosCredentials,
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let signer = CosSigner::new(
            &credentials.secret_id,
            &credentials.secret_key,
            config.sign_expire_secs,
        );
        let retry = RetryExecutor::new(config.retry_config());
        Self {
            inner: Arc::new(ClientInner {
                credentials,
                config,
                signer,
                transport,
                retry,
            }),
        }
    }

    /// Bucket credentials and location.
    pub fn credentials(&self) -> &CosCredentials {
        &self.inner.credentials
    }

    /// Upload tuning.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    async fn send(&self, request: CosRequest) -> StorageResult<HttpResponse> {
        let http = request
            .build(&self.inner.credentials, &self.inner.signer, unix_now())
            .await?;
        self.inner.transport.execute(http).await
    }

    /// Single-connection upload of exactly `length` bytes read from `stream`.
    ///
    /// A stream that ends early or still has data after `length` bytes is
    /// rejected before anything is sent.
    pub async fn put_stream_object<R>(
        &self,
        key: &str,
        mut stream: R,
        length: u64,
    ) -> StorageResult<PutObjectResponse>
    where
        R: AsyncRead + Send + Unpin,
    {
        let capacity = usize::try_from(length).unwrap_or(usize::MAX).min(MAX_PREALLOC);
        let mut data = Vec::with_capacity(capacity);
        (&mut stream).take(length).read_to_end(&mut data).await?;
        if (data.len() as u64) < length {
            return Err(StorageError::InvalidRequest {
                reason: format!("declared length {} but stream ended after {} bytes", length, data.len()),
            });
        }
        let mut extra = [0u8; 1];
        if stream.read(&mut extra).await? != 0 {
            return Err(StorageError::InvalidRequest {
                reason: format!("stream has more than the declared {} bytes", length),
            });
        }

        debug!(key, length, "put object");
        let response = self
            .send(CosRequest::put_object(key, RequestBody::Bytes(Bytes::from(data))))
            .await?;
        handle_put_object(response)
    }

    /// Uploads a local file, switching to multipart above the threshold.
    pub async fn put_file_object(&self, key: &str, path: &Path) -> StorageResult<PutObjectResponse> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::FileNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(StorageError::InvalidRequest {
                reason: format!("{} is not a regular file", path.display()),
            });
        }

        let length = metadata.len();
        if should_use_multipart_upload(length, &self.inner.config) {
            return self.multipart_upload(key, path, length).await;
        }

        debug!(key, length, path = %path.display(), "put file object");
        let body = RequestBody::FileRange {
            path: path.to_path_buf(),
            offset: 0,
            length,
        };
        let response = self.send(CosRequest::put_object(key, body)).await?;
        handle_put_object(response)
    }

    /// Downloads an object, or a byte range of it.
    pub async fn get_object(&self, request: GetObjectRequest) -> StorageResult<CosObject> {
        let response = self.send(CosRequest::try_from(request)?).await?;
        handle_get_object(response)
    }

    /// Deletes an object; a missing key is not an error.
    pub async fn delete_object(&self, request: DeleteObjectRequest) -> StorageResult<()> {
        let response = self.send(request.into()).await?;
        handle_delete(response)
    }

    /// True if the key exists.
    pub async fn check_object_exist(&self, request: CheckObjectExistRequest) -> StorageResult<bool> {
        let response = self.send(request.into()).await?;
        handle_check_exist(response)
    }

    /// Server-side copy.
    pub async fn copy_object(&self, request: CopyObjectRequest) -> StorageResult<CopyObjectResponse> {
        let host = self.inner.credentials.host();
        let response = self.send(request.into_cos_request(&host)).await?;
        handle_copy_object(response)
    }

    async fn multipart_upload(
        &self,
        key: &str,
        path: &Path,
        length: u64,
    ) -> StorageResult<PutObjectResponse> {
        let plan = UploadPartPlan::for_length(length, &self.inner.config);
        let response = self
            .send(CosRequest::initiate_multipart_upload(key))
            .await?;
        let upload_id = handle_initiate_multipart(response)?;
        info!(
            key,
            upload_id = %upload_id,
            length,
            part_size = plan.part_size(),
            parts = plan.part_count(),
            "multipart upload started"
        );

        let result = match self.upload_parts(key, &upload_id, path, plan).await {
            Ok(parts) => self.complete_multipart(key, &upload_id, parts).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                info!(key, upload_id = %upload_id, etag = %response.etag, "multipart upload completed");
                Ok(response)
            }
            Err(e) => {
                warn!(key, upload_id = %upload_id, error = %e, "multipart upload failed, aborting");
                self.abort_multipart(key, &upload_id).await;
                Err(e)
            }
        }
    }

    /// Uploads every part concurrently; the first failure cancels the rest.
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        path: &Path,
        plan: UploadPartPlan,
    ) -> StorageResult<Vec<PartETag>> {
        let pool = part_upload_pool();
        let expected = plan.part_count() as usize;
        let mut tasks = JoinSet::new();

        for spec in plan {
            let client = self.clone();
            let pool = pool.clone();
            let key = key.to_string();
            let upload_id = upload_id.to_string();
            let path = path.to_path_buf();
            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await.map_err(|e| StorageError::TaskJoin {
                    reason: e.to_string(),
                })?;
                client.upload_part(&key, &upload_id, &path, spec).await
            });
        }

        let mut parts = Vec::with_capacity(expected);
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(StorageError::TaskJoin {
                    reason: e.to_string(),
                })
            });
            match result {
                Ok(part) => parts.push(part),
                Err(e) => {
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        path: &Path,
        spec: PartSpec,
    ) -> StorageResult<PartETag> {
        let outcome = self
            .inner
            .retry
            .execute(|| {
                let request = CosRequest::upload_part(
                    key,
                    upload_id,
                    spec.part_number,
                    RequestBody::FileRange {
                        path: path.to_path_buf(),
                        offset: spec.offset,
                        length: spec.size,
                    },
                );
                async move { handle_upload_part(self.send(request).await?) }
            })
            .await;

        match outcome {
            RetryOutcome::Success(etag) => {
                debug!(key, part_number = spec.part_number, size = spec.size, "part uploaded");
                Ok(PartETag {
                    part_number: spec.part_number,
                    etag,
                })
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(StorageError::PartUpload {
                part_number: spec.part_number,
                attempts,
                source: Box::new(last_error),
            }),
        }
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartETag>,
    ) -> StorageResult<PutObjectResponse> {
        self.inner
            .retry
            .execute(|| {
                let request = CosRequest::complete_multipart_upload(key, upload_id, &parts);
                async move { handle_complete_multipart(self.send(request).await?) }
            })
            .await
            .into_result()
    }

    /// Best-effort abort; failures are logged, never returned.
    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let result = match self
            .send(CosRequest::abort_multipart_upload(key, upload_id))
            .await
        {
            Ok(response) => handle_abort_multipart(response),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(key, upload_id, "multipart upload aborted"),
            Err(e) => warn!(key, upload_id, error = %e, "abort multipart upload failed"),
        }
    }
}

/// Upper bound on the buffer reserved up front for a streamed put.
const MAX_PREALLOC: usize = 8 * 1024 * 1024;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InjectedFailure, MockOp, MockTransport};

    fn client(mock: &Arc<MockTransport>) -> CosClient {
        let credentials = CosCredentials {
            secret_id: "id".into(),
            secret_key: "key".into(),
            region: "ap-test".into(),
            bucket: "bkt".into(),
            ..Default::default()
        };
        let config = ClientConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter: false,
            ..Default::default()
        };
        CosClient::with_transport(credentials, config, mock.clone())
    }

    #[tokio::test]
    async fn test_put_stream_and_get() {
        let mock = Arc::new(MockTransport::new());
        let c = client(&mock);

        let put = c
            .put_stream_object("dir/a.txt", &b"hello world"[..], 11)
            .await
            .unwrap();
        assert!(!put.etag.is_empty());

        let obj = c.get_object(GetObjectRequest::new("dir/a.txt")).await.unwrap();
        assert_eq!(&obj.content[..], b"hello world");

        let range = c
            .get_object(GetObjectRequest::new("dir/a.txt").with_range(6, 10))
            .await
            .unwrap();
        assert_eq!(&range.content[..], b"world");
    }

    #[tokio::test]
    async fn test_put_stream_length_mismatch() {
        let mock = Arc::new(MockTransport::new());
        let c = client(&mock);

        let short = c.put_stream_object("k", &b"abc"[..], 4).await;
        assert!(matches!(short, Err(StorageError::InvalidRequest { .. })));

        let long = c.put_stream_object("k", &b"abcde"[..], 4).await;
        assert!(matches!(long, Err(StorageError::InvalidRequest { .. })));

        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_put_stream_from_file() {
        let mock = Arc::new(MockTransport::new());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"streamed payload").unwrap();
        let reader = tokio::fs::File::open(file.path()).await.unwrap();

        client(&mock)
            .put_stream_object("from-file", reader, 16)
            .await
            .unwrap();

        assert_eq!(&mock.object("from-file").unwrap()[..], b"streamed payload");
        assert_eq!(mock.requests()[0].body_len, 16);
    }

    #[tokio::test]
    async fn test_exist_and_delete_idempotent() {
        let mock = Arc::new(MockTransport::new());
        let c = client(&mock);
        assert!(!c.check_object_exist(CheckObjectExistRequest::new("nope")).await.unwrap());
        c.delete_object(DeleteObjectRequest::new("nope")).await.unwrap();

        mock.insert_object("yes", b"1");
        assert!(c.check_object_exist(CheckObjectExistRequest::new("yes")).await.unwrap());
        c.delete_object(DeleteObjectRequest::new("yes")).await.unwrap();
        assert!(!c.check_object_exist(CheckObjectExistRequest::new("yes")).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let mock = Arc::new(MockTransport::new());
        let err = client(&mock)
            .get_object(GetObjectRequest::new("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_copy_object() {
        let mock = Arc::new(MockTransport::new());
        let c = client(&mock);
        mock.insert_object("src/a.bin", b"payload");

        let copied = c
            .copy_object(CopyObjectRequest::new("src/a.bin", "dst/a.bin"))
            .await
            .unwrap();
        assert!(!copied.etag.is_empty());
        assert_eq!(&mock.object("dst/a.bin").unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn test_put_file_missing() {
        let mock = Arc::new(MockTransport::new());
        let result = client(&mock)
            .put_file_object("k", Path::new("/definitely/not/here.bin"))
            .await;
        assert!(matches!(result, Err(StorageError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_single_put_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_times(MockOp::PutObject, 1, InjectedFailure::Status(503));
        let result = client(&mock)
            .put_stream_object("k", &b"x"[..], 1)
            .await;
        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(mock.count(MockOp::PutObject), 1);
    }

    #[test]
    fn test_debug_hides_secret() {
        let mock = Arc::new(MockTransport::new());
        assert!(!format!("{:?}", client(&mock)).contains("\"key\""));
    }
}
