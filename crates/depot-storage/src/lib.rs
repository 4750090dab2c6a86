#![warn(missing_docs)]

//! Depot storage subsystem: signed object-storage client with parallel multipart upload
//!
//! This crate talks to a bucket-style object store. Small objects go up in a
//! single request; files above the multipart threshold are split into parts
//! that upload concurrently on a process-wide pool, with bounded per-part
//! retry and an abort of the whole session when any part gives up.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod multipart;
pub mod request;
pub mod response;
pub mod retry;
pub mod sign;
pub mod transport;

pub use backend::{BoxFuture, MockObjectStore, MockObjectStoreStats, ObjectStoreBackend};
pub use client::CosClient;
pub use config::{ClientConfig, CosCredentials, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use multipart::{calculate_optimal_part_size, part_upload_pool_size, PartETag, PartSpec, UploadPartPlan};
pub use request::{CheckObjectExistRequest, CopyObjectRequest, DeleteObjectRequest, GetObjectRequest};
pub use response::{CopyObjectResponse, CosObject, PutObjectResponse};
pub use retry::{is_retryable, RetryConfig, RetryExecutor, RetryOutcome};
pub use sign::CosSigner;
pub use transport::{HttpTransport, InjectedFailure, MockOp, MockTransport, RecordedRequest, ReqwestTransport};
