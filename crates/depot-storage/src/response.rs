//! Response handlers: turn raw HTTP responses into typed results.
//!
//! Bodies are XML documents parsed with `roxmltree`. Elements are matched by
//! local name, so a default namespace on the root does not hide them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::request::HttpResponse;

/// Result of a single-shot or multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutObjectResponse {
    /// Entity tag of the stored object.
    pub etag: String,
    /// Version id when bucket versioning is on.
    pub version_id: Option<String>,
    /// Object URL, reported by multipart complete only.
    pub location: Option<String>,
}

/// A downloaded object.
#[derive(Debug, Clone)]
pub struct CosObject {
    /// Object bytes.
    pub content: Bytes,
    /// Length as reported by the server.
    pub content_length: u64,
    /// Entity tag.
    pub etag: Option<String>,
    /// MIME type.
    pub content_type: Option<String>,
}

/// Result of a server-side copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyObjectResponse {
    /// Entity tag of the new object.
    pub etag: String,
    /// Last-modified timestamp as sent by the server.
    pub last_modified: Option<String>,
}

/// Maps any non-2xx response to [`StorageError::Http`].
pub fn check_status(response: &HttpResponse) -> StorageResult<()> {
    if response.is_success() {
        return Ok(());
    }
    let error = parse_document(&response.body)
        .ok()
        .and_then(|doc| ErrorDocument::from_root(doc.root_element()))
        .unwrap_or_default();
    Err(StorageError::Http {
        status: response.status,
        code: error.code,
        message: error.message,
        request_id: error
            .request_id
            .or_else(|| response.header("x-cos-request-id").map(str::to_string)),
    })
}

/// Upload response: ETag header.
pub fn handle_put_object(response: HttpResponse) -> StorageResult<PutObjectResponse> {
    check_status(&response)?;
    Ok(PutObjectResponse {
        etag: require_header(&response, "etag")?,
        version_id: response.header("x-cos-version-id").map(str::to_string),
        location: None,
    })
}

/// Download response: body plus metadata headers.
pub fn handle_get_object(response: HttpResponse) -> StorageResult<CosObject> {
    check_status(&response)?;
    let content_length = match response.header("content-length") {
        Some(v) => v.parse().map_err(|_| StorageError::ResponseParse {
            reason: format!("invalid Content-Length: {}", v),
        })?,
        None => response.body.len() as u64,
    };
    Ok(CosObject {
        content_length,
        etag: response.header("etag").map(str::to_string),
        content_type: response.header("content-type").map(str::to_string),
        content: response.body,
    })
}

/// Deletes succeed whether or not the key existed.
pub fn handle_delete(response: HttpResponse) -> StorageResult<()> {
    if response.status == 404 {
        return Ok(());
    }
    check_status(&response)
}

/// Existence check: 404 means absent, not an error.
pub fn handle_check_exist(response: HttpResponse) -> StorageResult<bool> {
    if response.status == 404 {
        return Ok(false);
    }
    check_status(&response)?;
    Ok(true)
}

/// Copy response: `CopyObjectResult` document, ETag header as fallback.
pub fn handle_copy_object(response: HttpResponse) -> StorageResult<CopyObjectResponse> {
    check_status(&response)?;
    let doc = parse_document(&response.body).ok();
    let root = doc.as_ref().map(|d| d.root_element());
    let etag = root
        .and_then(|r| element_text(r, "ETag"))
        .or_else(|| response.header("etag").map(str::to_string))
        .ok_or_else(|| StorageError::ResponseParse {
            reason: "copy response without ETag".to_string(),
        })?;
    Ok(CopyObjectResponse {
        etag,
        last_modified: root.and_then(|r| element_text(r, "LastModified")),
    })
}

/// Initiate response: `InitiateMultipartUploadResult/UploadId`.
pub fn handle_initiate_multipart(response: HttpResponse) -> StorageResult<String> {
    check_status(&response)?;
    let doc = parse_document(&response.body)?;
    element_text(doc.root_element(), "UploadId")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StorageError::ResponseParse {
            reason: "initiate response without UploadId".to_string(),
        })
}

/// Part response: ETag header.
pub fn handle_upload_part(response: HttpResponse) -> StorageResult<String> {
    check_status(&response)?;
    require_header(&response, "etag")
}

/// Complete response: `CompleteMultipartUploadResult/ETag`.
///
/// The service can fail a complete after sending a 200 status, in which
/// case the body is an `Error` document. That is reported as
/// [`StorageError::EmbeddedError`], which carries no HTTP status and is
/// retryable.
pub fn handle_complete_multipart(response: HttpResponse) -> StorageResult<PutObjectResponse> {
    check_status(&response)?;
    let doc = parse_document(&response.body)?;
    let root = doc.root_element();
    if let Some(error) = ErrorDocument::from_root(root) {
        return Err(StorageError::EmbeddedError {
            code: error.code,
            message: error.message,
            request_id: error
                .request_id
                .or_else(|| response.header("x-cos-request-id").map(str::to_string)),
        });
    }
    let etag = element_text(root, "ETag")
        .filter(|etag| !etag.is_empty())
        .ok_or_else(|| StorageError::ResponseParse {
            reason: "complete response without ETag".to_string(),
        })?;
    Ok(PutObjectResponse {
        etag,
        version_id: response.header("x-cos-version-id").map(str::to_string),
        location: element_text(root, "Location"),
    })
}

/// Abort response; callers treat failures as best-effort.
pub fn handle_abort_multipart(response: HttpResponse) -> StorageResult<()> {
    handle_delete(response)
}

fn require_header(response: &HttpResponse, name: &str) -> StorageResult<String> {
    response
        .header(name)
        .map(str::to_string)
        .ok_or_else(|| StorageError::ResponseParse {
            reason: format!("missing {} header", name),
        })
}

/// Fields of an `<Error>` document.
#[derive(Debug, Default)]
struct ErrorDocument {
    code: String,
    message: String,
    request_id: Option<String>,
}

impl ErrorDocument {
    fn from_root(root: roxmltree::Node<'_, '_>) -> Option<Self> {
        if root.tag_name().name() != "Error" {
            return None;
        }
        Some(Self {
            code: element_text(root, "Code").unwrap_or_default(),
            message: element_text(root, "Message").unwrap_or_default(),
            request_id: element_text(root, "RequestId"),
        })
    }
}

/// Parses a response body as an XML document.
pub(crate) fn parse_document(body: &[u8]) -> StorageResult<roxmltree::Document<'_>> {
    let text = std::str::from_utf8(body).map_err(|e| StorageError::ResponseParse {
        reason: format!("response body is not UTF-8: {}", e),
    })?;
    roxmltree::Document::parse(text).map_err(|e| StorageError::ResponseParse {
        reason: format!("malformed XML response: {}", e),
    })
}

/// Trimmed text of the first element under `node` (itself included) whose
/// local name is `name`. Entities and CDATA sections are already resolved.
pub(crate) fn element_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .map(|n| {
            n.children()
                .filter(|c| c.is_text())
                .filter_map(|c| c.text())
                .collect::<String>()
                .trim()
                .to_string()
        })
}

/// Escapes the five XML special characters.
pub fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Default::default(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn with_header(mut r: HttpResponse, name: &str, value: &str) -> HttpResponse {
        r.headers.insert(name.to_string(), value.to_string());
        r
    }

    const S3_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

    fn text_of(xml: &str, name: &str) -> Option<String> {
        let doc = parse_document(xml.as_bytes()).unwrap();
        element_text(doc.root_element(), name)
    }

    #[test]
    fn test_element_text_and_escape() {
        let xml = "<R><ETag>&quot;abc&quot;</ETag><Key>a&amp;b</Key></R>";
        assert_eq!(text_of(xml, "ETag").unwrap(), "\"abc\"");
        assert_eq!(text_of(xml, "Key").unwrap(), "a&b");
        assert!(text_of(xml, "Missing").is_none());
        assert_eq!(xml_escape("\"a&b\""), "&quot;a&amp;b&quot;");
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        assert!(matches!(
            parse_document(b"<Unclosed>"),
            Err(StorageError::ResponseParse { .. })
        ));
        assert!(matches!(
            parse_document(&[0xff, 0xfe]),
            Err(StorageError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_error_document_parsed() {
        let r = response(
            403,
            "<Error><Code>AccessDenied</Code><Message>nope</Message><RequestId>r1</RequestId></Error>",
        );
        match check_status(&r) {
            Err(StorageError::Http { status, code, message, request_id }) => {
                assert_eq!(status, 403);
                assert_eq!(code, "AccessDenied");
                assert_eq!(message, "nope");
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_check_exist_404_is_false() {
        assert!(!handle_check_exist(response(404, "")).unwrap());
        assert!(handle_check_exist(response(200, "")).unwrap());
        assert!(handle_check_exist(response(500, "")).is_err());
    }

    #[test]
    fn test_delete_404_is_ok() {
        assert!(handle_delete(response(404, "")).is_ok());
        assert!(handle_delete(response(204, "")).is_ok());
        assert!(handle_delete(response(403, "")).is_err());
    }

    #[test]
    fn test_put_requires_etag() {
        assert!(handle_put_object(response(200, "")).is_err());
        let ok = handle_put_object(with_header(response(200, ""), "etag", "\"e\"")).unwrap();
        assert_eq!(ok.etag, "\"e\"");
        assert!(ok.version_id.is_none());
    }

    #[test]
    fn test_initiate_parses_upload_id() {
        let r = response(
            200,
            "<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>k</Key><UploadId>u-42</UploadId></InitiateMultipartUploadResult>",
        );
        assert_eq!(handle_initiate_multipart(r).unwrap(), "u-42");
        assert!(handle_initiate_multipart(response(200, "<X/>")).is_err());
        assert!(handle_initiate_multipart(response(200, "")).is_err());
    }

    #[test]
    fn test_initiate_upload_id_cdata_and_spacing() {
        let cdata = response(
            200,
            "<InitiateMultipartUploadResult><UploadId><![CDATA[abc123]]></UploadId></InitiateMultipartUploadResult>",
        );
        assert_eq!(handle_initiate_multipart(cdata).unwrap(), "abc123");

        let spaced = response(
            200,
            "<InitiateMultipartUploadResult><UploadId >abc123</UploadId></InitiateMultipartUploadResult>",
        );
        assert_eq!(handle_initiate_multipart(spaced).unwrap(), "abc123");

        let namespaced = response(
            200,
            &format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<InitiateMultipartUploadResult xmlns=\"{}\">\n  <UploadId>\n    abc123\n  </UploadId>\n</InitiateMultipartUploadResult>",
                S3_NS
            ),
        );
        assert_eq!(handle_initiate_multipart(namespaced).unwrap(), "abc123");
    }

    #[test]
    fn test_complete_error_inside_200() {
        let r = response(200, "<Error><Code>InternalError</Code><Message>m</Message></Error>");
        match handle_complete_multipart(r) {
            Err(StorageError::EmbeddedError { code, message, .. }) => {
                assert_eq!(code, "InternalError");
                assert_eq!(message, "m");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_complete_namespaced_error_inside_200() {
        let r = response(
            200,
            &format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error xmlns=\"{}\"><Code>InternalError</Code><Message>We encountered an internal error. Please try again.</Message><RequestId>req-7</RequestId></Error>",
                S3_NS
            ),
        );
        let err = handle_complete_multipart(r).unwrap_err();
        match &err {
            StorageError::EmbeddedError { code, request_id, .. } => {
                assert_eq!(code, "InternalError");
                assert_eq!(request_id.as_deref(), Some("req-7"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(crate::retry::is_retryable(&err));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_complete_namespaced_result() {
        let r = response(
            200,
            &format!(
                "<CompleteMultipartUploadResult xmlns=\"{}\"><Location>http://b/k</Location><Key>k</Key><ETag>&quot;e-3&quot;</ETag></CompleteMultipartUploadResult>",
                S3_NS
            ),
        );
        let done = handle_complete_multipart(r).unwrap();
        assert_eq!(done.etag, "\"e-3\"");
        assert_eq!(done.location.as_deref(), Some("http://b/k"));
        assert!(matches!(
            handle_complete_multipart(response(200, "<CompleteMultipartUploadResult/>")),
            Err(StorageError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_namespaced_error_status() {
        let r = with_header(
            response(
                503,
                &format!("<Error xmlns=\"{}\"><Code>SlowDown</Code><Message>reduce rate</Message></Error>", S3_NS),
            ),
            "x-cos-request-id",
            "hdr-1",
        );
        match check_status(&r) {
            Err(StorageError::Http { status, code, request_id, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(code, "SlowDown");
                assert_eq!(request_id.as_deref(), Some("hdr-1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_xml_error_body() {
        match check_status(&response(502, "Bad Gateway")) {
            Err(StorageError::Http { status, code, message, .. }) => {
                assert_eq!(status, 502);
                assert!(code.is_empty());
                assert!(message.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_get_object_metadata() {
        let r = with_header(response(200, "abc"), "content-type", "text/plain");
        let obj = handle_get_object(r).unwrap();
        assert_eq!(obj.content_length, 3);
        assert_eq!(obj.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&obj.content[..], b"abc");
    }

    #[test]
    fn test_copy_parses_result() {
        let r = response(
            200,
            "<CopyObjectResult><ETag>\"c\"</ETag><LastModified>2024-01-01T00:00:00Z</LastModified></CopyObjectResult>",
        );
        let copied = handle_copy_object(r).unwrap();
        assert_eq!(copied.etag, "\"c\"");
        assert_eq!(copied.last_modified.as_deref(), Some("2024-01-01T00:00:00Z"));

        let header_only = with_header(response(200, ""), "etag", "\"h\"");
        let copied = handle_copy_object(header_only).unwrap();
        assert_eq!(copied.etag, "\"h\"");
        assert!(copied.last_modified.is_none());
    }
}
