//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use depot_storage::{ClientConfig, CosClient, CosCredentials, MockTransport};
use tempfile::NamedTempFile;

/// Threshold small enough to exercise multipart with tiny files.
pub const TEST_THRESHOLD: u64 = 64;
/// Part size floor used with [`TEST_THRESHOLD`].
pub const TEST_PART_SIZE: u64 = 16;

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client config with tiny parts and near-zero backoff.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        multipart_upload_threshold: TEST_THRESHOLD,
        minimum_upload_part_size: TEST_PART_SIZE,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        jitter: false,
        ..Default::default()
    }
}

/// Client over a fresh mock bucket.
pub fn mock_client() -> (CosClient, Arc<MockTransport>) {
    init_tracing();
    let mock = Arc::new(MockTransport::new());
    let credentials = CosCredentials {
        secret_id: "AKIDtest".into(),
        secret_key: "secret".into(),
        region: "ap-test".into(),
        bucket: "depot-1250000000".into(),
        ..Default::default()
    };
    let client = CosClient::with_transport(credentials, fast_config(), mock.clone());
    (client, mock)
}

/// Temporary file holding `len` bytes of a repeating pattern.
pub fn temp_file(len: usize) -> (NamedTempFile, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(&data).expect("write temp file");
    file.flush().expect("flush temp file");
    (file, data)
}
