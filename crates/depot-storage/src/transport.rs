//! HTTP transport seam for the object-storage client.
//!
//! [`ReqwestTransport`] talks to a real endpoint. [`MockTransport`] keeps a
//! bucket in memory, logs every request, and can inject failures; the
//! client's multipart and retry behavior is tested against it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::request::{HttpMethod, HttpRequest, HttpResponse};
use crate::response::{element_text, parse_document, xml_escape};

/// Executes signed requests.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Send one request and return the raw response.
    ///
    /// Non-2xx statuses are returned as responses, not errors; only failures
    /// that produce no response at all are errors.
    async fn execute(&self, request: HttpRequest) -> StorageResult<HttpResponse>;
}

/// Transport backed by a pooled `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> StorageResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            // Derived by the client from the URL and body.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Operation kinds recognized by [`MockTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Single-shot PUT.
    PutObject,
    /// GET.
    GetObject,
    /// HEAD.
    HeadObject,
    /// DELETE of an object.
    DeleteObject,
    /// PUT with a copy source.
    CopyObject,
    /// POST `?uploads`.
    InitiateMultipart,
    /// PUT `?partNumber&uploadId`.
    UploadPart,
    /// POST `?uploadId`.
    CompleteMultipart,
    /// DELETE `?uploadId`.
    AbortMultipart,
}

/// What an injected failure looks like on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Respond with this HTTP status.
    Status(u16),
    /// Fail without a response.
    Network,
    /// Respond 200 with a namespaced `Error` document as the body.
    ErrorInBody,
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: MockOp,
    part_number: Option<u32>,
    remaining: Option<u32>,
    failure: InjectedFailure,
}

impl FailureRule {
    fn matches(&self, op: MockOp, part_number: Option<u32>) -> bool {
        self.op == op
            && (self.part_number.is_none() || self.part_number == part_number)
            && self.remaining != Some(0)
    }
}

/// One logged request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Classified operation.
    pub op: MockOp,
    /// Object key.
    pub key: String,
    /// Part number for part uploads.
    pub part_number: Option<u32>,
    /// Body length.
    pub body_len: usize,
}

#[derive(Debug, Default)]
struct Session {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, (String, Bytes)>,
    sessions: HashMap<String, Session>,
    log: Vec<RecordedRequest>,
    rules: Vec<FailureRule>,
    next_upload_id: u64,
}

/// In-memory bucket speaking the object-storage wire protocol.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    part_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Empty bucket, no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request of `op` with `failure`.
    pub fn fail_always(&self, op: MockOp, failure: InjectedFailure) {
        self.push_rule(FailureRule {
            op,
            part_number: None,
            remaining: None,
            failure,
        });
    }

    /// Fail the next `times` requests of `op`.
    pub fn fail_times(&self, op: MockOp, times: u32, failure: InjectedFailure) {
        self.push_rule(FailureRule {
            op,
            part_number: None,
            remaining: Some(times),
            failure,
        });
    }

    /// Fail uploads of one part number; `times = None` fails forever.
    pub fn fail_part(&self, part_number: u32, times: Option<u32>, failure: InjectedFailure) {
        self.push_rule(FailureRule {
            op: MockOp::UploadPart,
            part_number: Some(part_number),
            remaining: times,
            failure,
        });
    }

    /// Delay every part upload, to keep parts in flight.
    pub fn set_part_delay(&self, delay: Duration) {
        *self.part_delay.lock().unwrap() = Some(delay);
    }

    fn push_rule(&self, rule: FailureRule) {
        self.state.lock().unwrap().rules.push(rule);
    }

    /// Store an object directly, bypassing the protocol.
    pub fn insert_object(&self, key: &str, data: &[u8]) {
        let data = Bytes::copy_from_slice(data);
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), (etag_of(&data), data));
    }

    /// Stored object bytes.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|(_, data)| data.clone())
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Multipart sessions neither completed nor aborted.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().log.clone()
    }

    /// Number of requests of one kind.
    pub fn count(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|r| r.op == op)
            .count()
    }

    fn classify(request: &HttpRequest) -> MockOp {
        let has = |p: &str| request.params.contains_key(p);
        match request.method {
            HttpMethod::Post if has("uploads") => MockOp::InitiateMultipart,
            HttpMethod::Post => MockOp::CompleteMultipart,
            HttpMethod::Put if has("partNumber") => MockOp::UploadPart,
            HttpMethod::Put if request.headers.contains_key("x-cos-copy-source") => MockOp::CopyObject,
            HttpMethod::Put => MockOp::PutObject,
            HttpMethod::Delete if has("uploadId") => MockOp::AbortMultipart,
            HttpMethod::Delete => MockOp::DeleteObject,
            HttpMethod::Head => MockOp::HeadObject,
            HttpMethod::Get => MockOp::GetObject,
        }
    }

    fn has_rule(&self, op: MockOp, part_number: Option<u32>) -> bool {
        self.state
            .lock()
            .unwrap()
            .rules
            .iter()
            .any(|r| r.matches(op, part_number))
    }

    fn injected(state: &mut MockState, op: MockOp, part_number: Option<u32>) -> Option<InjectedFailure> {
        let rule = state.rules.iter_mut().find(|r| r.matches(op, part_number))?;
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some(rule.failure)
    }

    fn handle(state: &mut MockState, op: MockOp, request: &HttpRequest) -> HttpResponse {
        let key = request.key.clone();
        match op {
            MockOp::PutObject => {
                let etag = etag_of(&request.body);
                state.objects.insert(key, (etag.clone(), request.body.clone()));
                respond(200, "").with_header("etag", &etag)
            }
            MockOp::GetObject => match state.objects.get(&key) {
                Some((etag, data)) => {
                    let data = match request.headers.get("Range").and_then(|r| parse_range(r)) {
                        Some((start, end)) => {
                            let end = (end as usize + 1).min(data.len());
                            data.slice((start as usize).min(end)..end)
                        }
                        None => data.clone(),
                    };
                    HttpResponse {
                        status: 200,
                        headers: BTreeMap::from([
                            ("etag".to_string(), etag.clone()),
                            ("content-length".to_string(), data.len().to_string()),
                        ]),
                        body: data,
                    }
                }
                None => not_found(),
            },
            MockOp::HeadObject => match state.objects.get(&key) {
                Some((etag, _)) => respond(200, "").with_header("etag", etag),
                None => HttpResponse::with_status(404),
            },
            MockOp::DeleteObject => {
                state.objects.remove(&key);
                respond(204, "")
            }
            MockOp::CopyObject => {
                let source = request.headers.get("x-cos-copy-source").cloned().unwrap_or_default();
                let source_key = source
                    .split_once('/')
                    .map(|(_, k)| urlencoding::decode(k).map(|k| k.into_owned()).unwrap_or_default())
                    .unwrap_or_default();
                match state.objects.get(&source_key).cloned() {
                    Some((etag, data)) => {
                        state.objects.insert(key, (etag.clone(), data));
                        respond(
                            200,
                            &format!("<CopyObjectResult><ETag>{}</ETag></CopyObjectResult>", etag),
                        )
                    }
                    None => not_found(),
                }
            }
            MockOp::InitiateMultipart => {
                state.next_upload_id += 1;
                let upload_id = format!("upload-{}", state.next_upload_id);
                state.sessions.insert(
                    upload_id.clone(),
                    Session {
                        key,
                        parts: BTreeMap::new(),
                    },
                );
                respond(
                    200,
                    &format!(
                        "<InitiateMultipartUploadResult><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                        upload_id
                    ),
                )
            }
            MockOp::UploadPart => {
                let upload_id = request.params.get("uploadId").cloned().unwrap_or_default();
                let part_number = part_number_of(request).unwrap_or(0);
                match state.sessions.get_mut(&upload_id) {
                    Some(session) => {
                        let etag = etag_of(&request.body);
                        session.parts.insert(part_number, (etag.clone(), request.body.clone()));
                        respond(200, "").with_header("etag", &etag)
                    }
                    None => no_such_upload(),
                }
            }
            MockOp::CompleteMultipart => {
                let upload_id = request.params.get("uploadId").cloned().unwrap_or_default();
                if !state.sessions.contains_key(&upload_id) {
                    return no_such_upload();
                }
                let Ok(doc) = parse_document(&request.body) else {
                    return malformed_xml();
                };
                let Some(session) = state.sessions.remove(&upload_id) else {
                    return no_such_upload();
                };
                let mut data = Vec::new();
                for part in doc
                    .root_element()
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "Part")
                {
                    let number: u32 = element_text(part, "PartNumber")
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    let etag = element_text(part, "ETag").unwrap_or_default();
                    match session.parts.get(&number) {
                        Some((stored, bytes)) if *stored == etag => data.extend_from_slice(bytes),
                        _ => {
                            return respond(
                                400,
                                "<Error><Code>InvalidPart</Code><Message>part mismatch</Message></Error>",
                            )
                        }
                    }
                }
                let data = Bytes::from(data);
                let etag = format!("\"{}-{}\"", &etag_of(&data)[1..17], session.parts.len());
                state.objects.insert(session.key, (etag.clone(), data));
                respond(
                    200,
                    &format!(
                        "<CompleteMultipartUploadResult><ETag>{}</ETag></CompleteMultipartUploadResult>",
                        xml_escape(&etag)
                    ),
                )
            }
            MockOp::AbortMultipart => {
                let upload_id = request.params.get("uploadId").cloned().unwrap_or_default();
                match state.sessions.remove(&upload_id) {
                    Some(_) => respond(204, ""),
                    None => no_such_upload(),
                }
            }
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> StorageResult<HttpResponse> {
        let op = Self::classify(&request);
        let part_number = part_number_of(&request);

        // Parts that are about to fail answer at once; the rest wait.
        if op == MockOp::UploadPart && !self.has_rule(op, part_number) {
            let delay = *self.part_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let mut state = self.state.lock().unwrap();
        state.log.push(RecordedRequest {
            op,
            key: request.key.clone(),
            part_number,
            body_len: request.body.len(),
        });
        debug!(?op, key = %request.key, ?part_number, "mock transport request");

        match Self::injected(&mut state, op, part_number) {
            Some(InjectedFailure::Network) => Err(StorageError::Network {
                msg: format!("injected network failure for {:?}", op),
            }),
            Some(InjectedFailure::Status(status)) => Ok(respond(
                status,
                "<Error><Code>Injected</Code><Message>injected failure</Message></Error>",
            )),
            Some(InjectedFailure::ErrorInBody) => Ok(respond(
                200,
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                 <Error xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <Code>InternalError</Code>\
                 <Message>We encountered an internal error. Please try again.</Message>\
                 </Error>",
            )),
            None => Ok(Self::handle(&mut state, op, &request)),
        }
    }
}

trait WithHeader {
    fn with_header(self, name: &str, value: &str) -> Self;
}

impl WithHeader for HttpResponse {
    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

fn respond(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: BTreeMap::new(),
        body: Bytes::from(body.to_string()),
    }
}

fn not_found() -> HttpResponse {
    respond(404, "<Error><Code>NoSuchKey</Code><Message>key not found</Message></Error>")
}

fn no_such_upload() -> HttpResponse {
    respond(404, "<Error><Code>NoSuchUpload</Code><Message>upload not found</Message></Error>")
}

fn malformed_xml() -> HttpResponse {
    respond(400, "<Error><Code>MalformedXML</Code><Message>invalid complete body</Message></Error>")
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{}\"", &hex::encode(Sha256::digest(data))[..32])
}

fn part_number_of(request: &HttpRequest) -> Option<u32> {
    request.params.get("partNumber").and_then(|n| n.parse().ok())
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
