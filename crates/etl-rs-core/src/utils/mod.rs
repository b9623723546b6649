//! Utility functions shared by the pipeline stages.
//!
//! This module provides:
//! - [`checksum`]: file SHA-256 and the order-independent [`RowDigest`].
//! - [`fs`]: atomic (partial-then-rename) file writes.

pub mod checksum;
pub mod fs;

pub use checksum::{canonical_row, sha256_file, sha256_hex, RowDigest};
