//! Error types for the object-storage client.

use thiserror::Error;

/// Result type alias for object-storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for object-storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors (local file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request never produced an HTTP response.
    #[error("Network error: {msg}")]
    Network {
        /// Description of the failure.
        msg: String,
    },

    /// The backend answered with a non-success status.
    #[error("HTTP {status} from object storage: {code}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Backend error code (e.g. `NoSuchKey`), empty when absent.
        code: String,
        /// Backend error message.
        message: String,
        /// Backend request id, useful for support tickets.
        request_id: Option<String>,
    },

    /// A success status whose body is an `Error` document.
    ///
    /// Complete-multipart can fail after the 200 status line has been sent;
    /// no HTTP status describes the failure, so none is reported.
    #[error("Error document in success response: {code}: {message}")]
    EmbeddedError {
        /// Backend error code (e.g. `InternalError`), empty when absent.
        code: String,
        /// Backend error message.
        message: String,
        /// Backend request id.
        request_id: Option<String>,
    },

    /// A response body or header could not be interpreted.
    #[error("Response parse error: {reason}")]
    ResponseParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// The request was rejected before it was sent.
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// Why the request is invalid.
        reason: String,
    },

    /// The local file to upload does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// A multipart part failed after exhausting its retries.
    #[error("Upload of part {part_number} failed after {attempts} attempts: {source}")]
    PartUpload {
        /// One-based part number.
        part_number: u32,
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: Box<StorageError>,
    },

    /// A spawned part-upload task panicked or was cancelled.
    #[error("Part upload task failed: {reason}")]
    TaskJoin {
        /// Join failure description.
        reason: String,
    },
}

impl StorageError {
    /// Returns the HTTP status when the error came from a backend response.
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Http { status, .. } => Some(*status),
            StorageError::PartUpload { source, .. } => source.status(),
            _ => None,
        }
    }

    /// True when the backend reported the key as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Network { msg: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_result_alias() {
        let ok: StorageResult<i32> = Ok(7);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_http_error_display() {
        let err = StorageError::Http {
            status: 403,
            code: "AccessDenied".to_string(),
            message: "signature mismatch".to_string(),
            request_id: Some("req-1".to_string()),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("403"));
        assert!(msg.contains("AccessDenied"));
        assert!(msg.contains("signature mismatch"));
    }

    #[test]
    fn test_not_found_detection() {
        let err = StorageError::Http {
            status: 404,
            code: "NoSuchKey".to_string(),
            message: String::new(),
            request_id: None,
        };
        assert!(err.is_not_found());
        assert!(!StorageError::Network { msg: "reset".into() }.is_not_found());
    }

    #[test]
    fn test_part_upload_wraps_status() {
        let err = StorageError::PartUpload {
            part_number: 3,
            attempts: 5,
            source: Box::new(StorageError::Http {
                status: 503,
                code: "SlowDown".to_string(),
                message: String::new(),
                request_id: None,
            }),
        };
        assert_eq!(err.status(), Some(503));
        assert!(format!("{}", err).contains("part 3"));
    }

    #[test]
    fn test_embedded_error_has_no_status() {
        let err = StorageError::EmbeddedError {
            code: "InternalError".to_string(),
            message: "try again".to_string(),
            request_id: None,
        };
        assert_eq!(err.status(), None);
        assert!(!err.is_not_found());
        assert!(format!("{}", err).contains("InternalError"));
    }
}
