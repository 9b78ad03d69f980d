//! BucketManager: mints bucket handles and materializes their tables.
//!
//! Each bucket owns a `"bucket.<name>.files"` and a `"bucket.<name>.chunks"` table in the
//! shared SQLite database, plus a row in the `buckets` registry table.

use super::error::{StoreError, StoreResult};
use crate::{
    db::begin_write,
    models::bucket::{Bucket, validate_namespace},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Clone)]
pub struct BucketManager {
    db: Arc<SqlitePool>,

    /// Bucket names configured at startup; the only ones reachable from the web layer.
    configured: Arc<BTreeSet<String>>,

    /// Handles whose tables are known to exist.
    known: Arc<RwLock<HashMap<String, Bucket>>>,
}

impl BucketManager {
    pub fn new(db: Arc<SqlitePool>, configured: impl IntoIterator<Item = String>) -> Self {
        Self {
            db,
            configured: Arc::new(configured.into_iter().collect()),
            known: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Names configured at startup, in sorted order.
    pub fn configured_names(&self) -> impl Iterator<Item = &str> {
        self.configured.iter().map(String::as_str)
    }

    /// Materialize every configured bucket.
    pub async fn init(&self) -> StoreResult<Vec<Bucket>> {
        let mut buckets = Vec::with_capacity(self.configured.len());
        for name in self.configured.iter() {
            buckets.push(self.get_bucket(name).await?);
        }
        Ok(buckets)
    }

    /// Return the handle for `name`, creating its tables if absent.
    pub async fn get_bucket(&self, name: &str) -> StoreResult<Bucket> {
        if let Some(bucket) = self.known.read().await.get(name) {
            return Ok(bucket.clone());
        }

        validate_namespace("bucket", name).map_err(StoreError::InvalidInput)?;
        let bucket = self.create_tables(name).await?;

        self.known
            .write()
            .await
            .insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    /// Like [`get_bucket`](Self::get_bucket), but only for buckets configured
    /// at startup. Unknown names are `NotFound` rather than created on demand.
    pub async fn configured(&self, name: &str) -> StoreResult<Bucket> {
        if !self.configured.contains(name) {
            return Err(StoreError::NotFound(format!("bucket `{name}`")));
        }
        self.get_bucket(name).await
    }

    /// List every bucket recorded in the registry table.
    pub async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        let buckets = sqlx::query_as::<_, Bucket>(
            "SELECT name, created_at FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets)
    }

    async fn create_tables(&self, name: &str) -> StoreResult<Bucket> {
        let handle = Bucket {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let files = handle.files_table();
        let chunks = handle.chunks_table();
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {files} (
                    id          BLOB PRIMARY KEY NOT NULL,
                    filename    TEXT NOT NULL,
                    chunk_size  INTEGER NOT NULL,
                    length      INTEGER,
                    chunk_count INTEGER,
                    md5         TEXT,
                    created_at  TEXT NOT NULL,
                    uploaded_at TEXT,
                    finalized   INTEGER NOT NULL DEFAULT 0
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {chunks} (
                    file_id BLOB NOT NULL,
                    seq     INTEGER NOT NULL,
                    length  INTEGER NOT NULL,
                    data    BLOB NOT NULL,
                    PRIMARY KEY (file_id, seq)
                )"
            ),
        ];

        let mut tx = begin_write(&self.db).await?;
        for stmt in &statements {
            debug!("Executing bucket DDL: {}", stmt);
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        let inserted = sqlx::query(
            "INSERT INTO buckets (name, created_at) VALUES (?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&handle.name)
        .bind(handle.created_at)
        .execute(&mut *tx)
        .await?;
        let bucket = sqlx::query_as::<_, Bucket>("SELECT name, created_at FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        if inserted.rows_affected() > 0 {
            info!("Created bucket `{}`", name);
        }
        Ok(bucket)
    }
}
