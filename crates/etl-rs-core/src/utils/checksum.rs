//! SHA-256 helpers for files and for order-independent row digests.

use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

const FIELD_SEP: char = '\u{1f}';
const NULL_MARK: &str = "\u{0}N";

/// Renders one row as a single canonical string.
///
/// NULL is distinguished from the empty string.
pub fn canonical_row<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut out = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEP);
        }
        out.push_str(field.unwrap_or(NULL_MARK));
    }
    out
}

/// Order-independent digest over a multiset of rows.
///
/// Each row's SHA-256 is split into four 64-bit lanes that are summed with
/// wrapping arithmetic, so the result does not depend on row order and two
/// partial digests can be merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDigest {
    lanes: [u64; 4],
    count: u64,
}

impl RowDigest {
    /// An empty digest.
    pub const fn new() -> Self {
        Self {
            lanes: [0; 4],
            count: 0,
        }
    }

    /// Adds a row given as its canonical rendering.
    pub fn add_canonical(&mut self, row: &str) {
        let hash = Sha256::digest(row.as_bytes());
        for (lane, chunk) in self.lanes.iter_mut().zip(hash.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *lane = lane.wrapping_add(u64::from_le_bytes(word));
        }
        self.count += 1;
    }

    /// Adds a row given as its fields.
    pub fn add_row<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        self.add_canonical(&canonical_row(fields));
    }

    /// Folds another digest into this one.
    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self.lanes.iter_mut().zip(other.lanes.iter()) {
            *a = a.wrapping_add(*b);
        }
        self.count += other.count;
    }

    /// Number of rows added.
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Hex rendering: the four lanes followed by the row count.
    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(80);
        for lane in self.lanes {
            let _ = write!(out, "{lane:016x}");
        }
        let _ = write!(out, ":{}", self.count);
        out
    }
}
