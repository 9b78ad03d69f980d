//! Represents a chunked file and its chunks.

use crate::services::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Default maximum chunk payload: 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Upper bound accepted for a configured chunk size.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Opaque, immutable file identifier.
///
/// The canonical text form is the lowercase hyphenated UUID
/// (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`); anything else is rejected on parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct FileId(Uuid);

impl FileId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for FileId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || StoreError::invalid(format!("malformed file id `{s}`"));
        let uuid = Uuid::try_parse(s).map_err(|_| malformed())?;
        if uuid.hyphenated().to_string() != s {
            return Err(malformed());
        }
        Ok(Self(uuid))
    }
}

/// Metadata describing a finalized, chunked file.
///
/// Records become visible only after every chunk in `[0, chunk_count)` has
/// been written and the registry finalized them; they are never mutated afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    pub id: FileId,

    /// Bucket the record lives in.
    pub bucket: String,

    /// Declared filename at ingestion time.
    pub filename: String,

    /// Total byte length of the file.
    pub length: i64,

    /// Maximum payload per chunk when the file was written.
    pub chunk_size: i64,

    /// Number of chunks, always `ceil(length / chunk_size)`.
    pub chunk_count: i64,

    /// Hex-encoded MD5 of the full content.
    pub md5: String,

    pub uploaded_at: DateTime<Utc>,
}

/// One fixed-maximum-size fragment of a file.
#[derive(Clone, FromRow, Debug)]
pub struct Chunk {
    pub file_id: FileId,

    /// Dense sequence number starting at 0.
    pub seq: i64,

    pub data: Vec<u8>,
}

/// Number of chunks a file of `length` bytes occupies.
pub fn expected_chunk_count(length: u64, chunk_size: u64) -> u64 {
    length.div_ceil(chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_round_trips_canonical_form() {
        let id = FileId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<FileId>().unwrap(), id);
    }

    #[test]
    fn file_id_rejects_non_canonical_forms() {
        for bad in [
            "",
            "not-an-id",
            "675a1b2c3d4e5f6a7b8c9d0e",
            "67e55044-10b1-426f-9247-bb680e5fe0c8-",
            "67E55044-10B1-426F-9247-BB680E5FE0C8",
            "67e5504410b1426f9247bb680e5fe0c8",
            "{67e55044-10b1-426f-9247-bb680e5fe0c8}",
        ] {
            let err = bad.parse::<FileId>().unwrap_err();
            assert!(matches!(err, StoreError::InvalidInput(_)), "{bad}");
        }
        assert!("67e55044-10b1-426f-9247-bb680e5fe0c8".parse::<FileId>().is_ok());
    }

    #[test]
    fn chunk_count_is_ceiling() {
        let cs = DEFAULT_CHUNK_SIZE as u64;
        assert_eq!(expected_chunk_count(0, cs), 0);
        assert_eq!(expected_chunk_count(1, cs), 1);
        assert_eq!(expected_chunk_count(cs - 1, cs), 1);
        assert_eq!(expected_chunk_count(cs, cs), 1);
        assert_eq!(expected_chunk_count(cs + 1, cs), 2);
        assert_eq!(expected_chunk_count(600 * 1024, cs), 3);
    }
}
