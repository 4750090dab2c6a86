//! Object-storage requests: typed public requests and the wire-level form.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::CosCredentials;
use crate::error::{StorageError, StorageResult};
use crate::multipart::PartETag;
use crate::sign::CosSigner;

/// HTTP verbs used by the object-storage API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl HttpMethod {
    /// Uppercase verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// A fully built, signed request ready for the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Absolute URL including query string.
    pub url: String,
    /// Object key the request targets (unencoded).
    pub key: String,
    /// Query parameters, also present in `url`.
    pub params: BTreeMap<String, String>,
    /// Headers including `Authorization`.
    pub headers: BTreeMap<String, String>,
    /// Request payload.
    pub body: Bytes,
}

/// A transport-level response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers with lowercased names.
    pub headers: BTreeMap<String, String>,
    /// Response payload.
    pub body: Bytes,
}

impl HttpResponse {
    /// Response with status and empty body.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Payload of a request before it is materialized.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// No payload.
    Empty,
    /// In-memory payload.
    Bytes(Bytes),
    /// A byte range of a local file, read when the request is built.
    FileRange {
        /// File to read from.
        path: PathBuf,
        /// Start offset.
        offset: u64,
        /// Number of bytes.
        length: u64,
    },
}

impl RequestBody {
    /// Payload length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(b) => b.len() as u64,
            RequestBody::FileRange { length, .. } => *length,
        }
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn materialize(&self) -> StorageResult<Bytes> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Bytes(b) => Ok(b.clone()),
            RequestBody::FileRange { path, offset, length } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(*offset)).await?;
                let mut buf = vec![0u8; *length as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// An unsigned object-storage operation.
#[derive(Debug, Clone)]
pub struct CosRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Object key.
    pub key: String,
    /// Query parameters. An empty value renders as a bare flag (`?uploads`).
    pub params: BTreeMap<String, String>,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// Payload.
    pub body: RequestBody,
}

impl CosRequest {
    fn new(method: HttpMethod, key: &str) -> Self {
        Self {
            method,
            key: key.trim_start_matches('/').to_string(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: RequestBody::Empty,
        }
    }

    fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Single-shot upload.
    pub fn put_object(key: &str, body: RequestBody) -> Self {
        Self::new(HttpMethod::Put, key).body(body)
    }

    /// Starts a multipart session.
    pub fn initiate_multipart_upload(key: &str) -> Self {
        Self::new(HttpMethod::Post, key).param("uploads", "")
    }

    /// Uploads one part of a multipart session.
    pub fn upload_part(key: &str, upload_id: &str, part_number: u32, body: RequestBody) -> Self {
        Self::new(HttpMethod::Put, key)
            .param("partNumber", part_number.to_string())
            .param("uploadId", upload_id)
            .body(body)
    }

    /// Stitches uploaded parts together. `parts` must be sorted by part number.
    pub fn complete_multipart_upload(key: &str, upload_id: &str, parts: &[PartETag]) -> Self {
        let mut xml = String::from("<CompleteMultipartUpload>");
        for part in parts {
            xml.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                part.part_number,
                crate::response::xml_escape(&part.etag)
            ));
        }
        xml.push_str("</CompleteMultipartUpload>");
        Self::new(HttpMethod::Post, key)
            .param("uploadId", upload_id)
            .header("Content-Type", "application/xml")
            .body(RequestBody::Bytes(Bytes::from(xml)))
    }

    /// Discards a multipart session and its parts.
    pub fn abort_multipart_upload(key: &str, upload_id: &str) -> Self {
        Self::new(HttpMethod::Delete, key).param("uploadId", upload_id)
    }

    /// Percent-encoded object path, always starting with `/`.
    pub fn path(&self) -> String {
        let encoded: Vec<String> = self
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("/{}", encoded.join("/"))
    }

    fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    urlencoding::encode(k).into_owned()
                } else {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Reads the body, signs, and produces the wire request.
    pub async fn build(
        self,
        credentials: &CosCredentials,
        signer: &CosSigner,
        now: u64,
    ) -> StorageResult<HttpRequest> {
        let body = self.body.materialize().await?;
        let host = credentials.host();
        let path = self.path();

        let mut headers = self.headers.clone();
        headers.insert("Host".to_string(), host.clone());
        if self.method == HttpMethod::Put || self.method == HttpMethod::Post {
            headers.insert("Content-Length".to_string(), body.len().to_string());
        }
        let authorization =
            signer.authorization(self.method.as_str(), &path, &self.params, &headers, now);
        headers.insert("Authorization".to_string(), authorization);

        let query = self.query_string();
        let url = if query.is_empty() {
            format!("{}://{}{}", credentials.scheme, host, path)
        } else {
            format!("{}://{}{}?{}", credentials.scheme, host, path, query)
        };

        Ok(HttpRequest {
            method: self.method,
            url,
            key: self.key,
            params: self.params,
            headers,
            body,
        })
    }
}

/// Download request.
#[derive(Debug, Clone)]
pub struct GetObjectRequest {
    /// Object key.
    pub key: String,
    /// Optional inclusive byte range.
    pub range: Option<(u64, u64)>,
}

impl GetObjectRequest {
    /// Whole-object download.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            range: None,
        }
    }

    /// Inclusive byte range `start..=end`.
    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.range = Some((start, end));
        self
    }
}

impl TryFrom<GetObjectRequest> for CosRequest {
    type Error = StorageError;

    fn try_from(req: GetObjectRequest) -> StorageResult<Self> {
        let mut cos = CosRequest::new(HttpMethod::Get, &req.key);
        if let Some((start, end)) = req.range {
            if end < start {
                return Err(StorageError::InvalidRequest {
                    reason: format!("range end {} before start {}", end, start),
                });
            }
            cos = cos.header("Range", format!("bytes={}-{}", start, end));
        }
        Ok(cos)
    }
}

/// Delete request.
#[derive(Debug, Clone)]
pub struct DeleteObjectRequest {
    /// Object key.
    pub key: String,
}

impl DeleteObjectRequest {
    /// Delete `key`.
    pub fn new(key: &str) -> Self {
        Self { key: key.to_string() }
    }
}

impl From<DeleteObjectRequest> for CosRequest {
    fn from(req: DeleteObjectRequest) -> Self {
        CosRequest::new(HttpMethod::Delete, &req.key)
    }
}

/// Existence check.
#[derive(Debug, Clone)]
pub struct CheckObjectExistRequest {
    /// Object key.
    pub key: String,
}

impl CheckObjectExistRequest {
    /// Probe `key`.
    pub fn new(key: &str) -> Self {
        Self { key: key.to_string() }
    }
}

impl From<CheckObjectExistRequest> for CosRequest {
    fn from(req: CheckObjectExistRequest) -> Self {
        CosRequest::new(HttpMethod::Head, &req.key)
    }
}

/// Server-side copy within the bucket, or from another bucket host.
#[derive(Debug, Clone)]
pub struct CopyObjectRequest {
    /// Key to copy from.
    pub source_key: String,
    /// Key to copy to.
    pub dest_key: String,
    /// Host of the source bucket; the client's own bucket when `None`.
    pub source_host: Option<String>,
}

impl CopyObjectRequest {
    /// Copy within the client's bucket.
    pub fn new(source_key: &str, dest_key: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            dest_key: dest_key.to_string(),
            source_host: None,
        }
    }

    pub(crate) fn into_cos_request(self, default_host: &str) -> CosRequest {
        let host = self.source_host.unwrap_or_else(|| default_host.to_string());
        let source = CosRequest::new(HttpMethod::Get, &self.source_key).path();
        CosRequest::new(HttpMethod::Put, &self.dest_key)
            .header("x-cos-copy-source", format!("{}{}", host, source))
    }
}
