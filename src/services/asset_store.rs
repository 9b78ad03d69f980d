//! AssetStore: the composed service handed to the web layer and CLI.
//!
//! Holds one chunk store, file registry, bucket manager and catalog linker
//! over a single injected SQLite pool. Ingestion and retrieval live in their
//! own modules as further `impl AssetStore` blocks.

use super::{
    bucket_manager::BucketManager,
    catalog_linker::CatalogLinker,
    chunk_store::ChunkStore,
    error::{StoreError, StoreResult},
    file_registry::FileRegistry,
};
use crate::models::{bucket::Bucket, catalog::BlobRef, file::FileId};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

/// Tunables fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub chunk_size: usize,
    pub verify_hash: bool,
    pub buckets: Vec<String>,
}

#[derive(Clone)]
pub struct AssetStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    pub buckets: BucketManager,
    pub chunks: ChunkStore,
    pub registry: FileRegistry,
    pub catalog: CatalogLinker,

    /// Recompute the MD5 of every retrieved file.
    pub(crate) verify_hash: bool,
}

/// What an explicit file removal deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemovedFile {
    pub chunks: u64,
    pub links: u64,
}

impl AssetStore {
    pub fn new(db: Arc<SqlitePool>, settings: StoreSettings) -> Self {
        Self {
            buckets: BucketManager::new(db.clone(), settings.buckets),
            chunks: ChunkStore::new(db.clone(), settings.chunk_size),
            registry: FileRegistry::new(db.clone(), settings.chunk_size),
            catalog: CatalogLinker::new(db.clone()),
            db,
            verify_hash: settings.verify_hash,
        }
    }

    /// Materialize every configured bucket.
    pub async fn init(&self) -> StoreResult<Vec<Bucket>> {
        let buckets = self.buckets.init().await?;
        info!(
            "Buckets ready: {}",
            buckets
                .iter()
                .map(|b| b.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(buckets)
    }

    /// Delete a file together with its chunks and every catalog entry pointing at it.
    pub async fn remove_file(&self, bucket: &Bucket, file_id: FileId) -> StoreResult<RemovedFile> {
        let links = self
            .catalog
            .unlink_blob(&BlobRef::new(bucket.name.clone(), file_id))
            .await?;
        self.registry.delete_record(bucket, file_id).await?;
        let chunks = self.chunks.delete_file_chunks(bucket, file_id).await?;
        info!(bucket = %bucket.name, %file_id, chunks, links, "removed file");
        Ok(RemovedFile { chunks, links })
    }

    /// Reclaim chunks no reader can ever reach.
    ///
    /// Covers pending records older than `older_than` (ingestions that never
    /// finalized) and chunks whose record no longer exists. Returns the number
    /// of chunks deleted.
    pub async fn sweep_orphans(&self, bucket: &Bucket, older_than: Duration) -> StoreResult<u64> {
        let cutoff = Utc::now() - older_than;
        let mut reclaimed = 0;

        for file_id in self.registry.pending_before(bucket, cutoff).await? {
            reclaimed += self.chunks.delete_file_chunks(bucket, file_id).await?;
            match self.registry.delete_record(bucket, file_id).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            warn!(bucket = %bucket.name, %file_id, "swept unfinalized file");
        }

        for file_id in self.chunks.unowned_file_ids(bucket).await? {
            reclaimed += self.chunks.delete_file_chunks(bucket, file_id).await?;
            warn!(bucket = %bucket.name, %file_id, "swept chunks without a record");
        }

        info!(bucket = %bucket.name, reclaimed, "orphan sweep complete");
        Ok(reclaimed)
    }
}
