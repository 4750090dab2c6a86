//! Multipart upload planning and the shared part-upload pool.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::ClientConfig;

/// Part number and entity tag returned for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartETag {
    /// One-based part number.
    pub part_number: u32,
    /// Entity tag reported by the server.
    pub etag: String,
}

/// True when `length` must go through a multipart session.
pub fn should_use_multipart_upload(length: u64, config: &ClientConfig) -> bool {
    length > config.multipart_upload_threshold
}

/// `max(ceil(length / max_upload_parts), minimum_upload_part_size)`.
///
/// Never more than `max_upload_parts` parts, never a part below the floor
/// (except the last).
pub fn calculate_optimal_part_size(length: u64, config: &ClientConfig) -> u64 {
    let max_parts = config.max_upload_parts.max(1);
    let by_count = length.div_ceil(max_parts);
    by_count.max(config.minimum_upload_part_size).max(1)
}

/// One slice of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// One-based part number.
    pub part_number: u32,
    /// Byte offset in the file.
    pub offset: u64,
    /// Size in bytes; only the last part may be short.
    pub size: u64,
}

/// Sequential split of `length` bytes into parts of `part_size`.
#[derive(Debug, Clone)]
pub struct UploadPartPlan {
    length: u64,
    part_size: u64,
    next_offset: u64,
    next_part_number: u32,
}

impl UploadPartPlan {
    /// Plan for `length` bytes in parts of `part_size`.
    pub fn new(length: u64, part_size: u64) -> Self {
        Self {
            length,
            part_size: part_size.max(1),
            next_offset: 0,
            next_part_number: 1,
        }
    }

    /// Plan using the optimal part size for `config`.
    pub fn for_length(length: u64, config: &ClientConfig) -> Self {
        Self::new(length, calculate_optimal_part_size(length, config))
    }

    /// Part size used by this plan.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// `ceil(length / part_size)`.
    pub fn part_count(&self) -> u64 {
        self.length.div_ceil(self.part_size)
    }
}

impl Iterator for UploadPartPlan {
    type Item = PartSpec;

    fn next(&mut self) -> Option<PartSpec> {
        if self.next_offset >= self.length {
            return None;
        }
        let size = self.part_size.min(self.length - self.next_offset);
        let spec = PartSpec {
            part_number: self.next_part_number,
            offset: self.next_offset,
            size,
        };
        self.next_offset += size;
        self.next_part_number += 1;
        Some(spec)
    }
}

static PART_UPLOAD_POOL: OnceLock<Arc<Semaphore>> = OnceLock::new();

/// Permits in the shared pool: twice the available parallelism.
pub fn part_upload_pool_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus * 2
}

/// Process-wide limiter shared by every multipart upload.
pub fn part_upload_pool() -> Arc<Semaphore> {
    PART_UPLOAD_POOL
        .get_or_init(|| Arc::new(Semaphore::new(part_upload_pool_size())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_threshold_is_exclusive() {
        let config = ClientConfig::default();
        assert!(!should_use_multipart_upload(config.multipart_upload_threshold, &config));
        assert!(should_use_multipart_upload(config.multipart_upload_threshold + 1, &config));
    }

    #[test]
    fn test_part_size_floor() {
        let config = ClientConfig::default();
        assert_eq!(calculate_optimal_part_size(11 * MIB, &config), 10 * MIB);
    }

    #[test]
    fn test_part_size_grows_for_huge_files() {
        let config = ClientConfig::default();
        let length = 200_000 * MIB;
        let size = calculate_optimal_part_size(length, &config);
        assert_eq!(size, 20 * MIB);
        assert!(UploadPartPlan::new(length, size).part_count() <= config.max_upload_parts);
    }

    #[test]
    fn test_plan_last_part_short() {
        let parts: Vec<PartSpec> = UploadPartPlan::new(25, 10).collect();
        assert_eq!(
            parts,
            vec![
                PartSpec { part_number: 1, offset: 0, size: 10 },
                PartSpec { part_number: 2, offset: 10, size: 10 },
                PartSpec { part_number: 3, offset: 20, size: 5 },
            ]
        );
    }

    #[test]
    fn test_plan_exact_multiple() {
        let plan = UploadPartPlan::new(30, 10);
        assert_eq!(plan.part_count(), 3);
        assert_eq!(plan.count(), 3);
    }

    #[test]
    fn test_pool_is_shared() {
        let a = part_upload_pool();
        let b = part_upload_pool();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(part_upload_pool_size() >= 2);
    }
}
