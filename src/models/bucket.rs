//! Represents a bucket: an isolated namespace pairing a file registry with a chunk store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Name of the bucket general assets are ingested into.
pub const DEFAULT_BUCKET: &str = "default";

/// Name of the bucket holding recommendation images.
pub const RECOMMENDED_BUCKET: &str = "recommended";

/// Prefix of every per-bucket table. Category tables use `catalog.` instead,
/// and validated names never contain a dot, so the two sets cannot overlap.
pub const BUCKET_TABLE_PREFIX: &str = "bucket.";

/// A handle to one bucket namespace.
///
/// Every chunk store and file registry call takes a `&Bucket` as its first
/// argument, so no operation can span more than one namespace. Handles are
/// only minted by the bucket manager after the backing tables exist.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Case-sensitive bucket name (lowercase letters, digits, `-`, `_`).
    pub name: String,

    /// When the bucket tables were first created.
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    /// Quoted name of the table holding this bucket's file records.
    pub fn files_table(&self) -> String {
        quote_ident(&format!("{BUCKET_TABLE_PREFIX}{}.files", self.name))
    }

    /// Quoted name of the table holding this bucket's chunks.
    pub fn chunks_table(&self) -> String {
        quote_ident(&format!("{BUCKET_TABLE_PREFIX}{}.chunks", self.name))
    }
}

/// Quote an SQL identifier. Callers only pass validated names, which never
/// contain a double quote, but escape anyway so the output is always well formed.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Validate a bucket or category name used to derive table names.
///
/// SQLite compares table names case-insensitively, so only lowercase names are
/// accepted; otherwise `Default` and `default` would silently share tables.
pub fn validate_namespace(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 63 {
        return Err(format!("{kind} `{name}` must be between 1 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_'))
    {
        return Err(format!(
            "{kind} `{name}` may only contain lowercase letters, digits, hyphens and underscores"
        ));
    }
    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_ok = name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_ok || !ends_ok {
        return Err(format!(
            "{kind} `{name}` must start and end with a lowercase letter or digit"
        ));
    }
    Ok(())
}
