//! ChunkStore: write-once binary chunks keyed by `(file_id, seq)`.
//!
//! Chunks are rows of the bucket's `"<name>.chunks"` table. Re-putting an
//! existing `(file_id, seq)` is rejected with `InvalidInput`, so a chunk's
//! payload never changes once acknowledged.

use super::error::{StoreError, StoreResult, is_unique_violation};
use crate::models::{
    bucket::Bucket,
    file::{Chunk, FileId},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ChunkStore {
    db: Arc<SqlitePool>,

    /// Maximum payload accepted per chunk.
    chunk_size: usize,
}

impl ChunkStore {
    pub fn new(db: Arc<SqlitePool>, chunk_size: usize) -> Self {
        Self { db, chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn put_chunk(
        &self,
        bucket: &Bucket,
        file_id: FileId,
        seq: u32,
        payload: &[u8],
    ) -> StoreResult<()> {
        if payload.is_empty() {
            return Err(StoreError::invalid("chunk payload must not be empty"));
        }
        if payload.len() > self.chunk_size {
            return Err(StoreError::invalid(format!(
                "chunk payload of {} bytes exceeds chunk size {}",
                payload.len(),
                self.chunk_size
            )));
        }

        let sql = format!(
            "INSERT INTO {} (file_id, seq, length, data) VALUES (?, ?, ?, ?)",
            bucket.chunks_table()
        );
        sqlx::query(&sql)
            .bind(file_id)
            .bind(i64::from(seq))
            .bind(payload.len() as i64)
            .bind(payload)
            .execute(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::invalid(format!(
                        "chunk {seq} of file `{file_id}` already exists"
                    ))
                } else {
                    StoreError::StoreUnavailable(err)
                }
            })?;

        debug!(bucket = %bucket.name, %file_id, seq, len = payload.len(), "stored chunk");
        Ok(())
    }

    pub async fn get_chunk(&self, bucket: &Bucket, file_id: FileId, seq: u32) -> StoreResult<Chunk> {
        let sql = format!(
            "SELECT file_id, seq, data FROM {} WHERE file_id = ? AND seq = ?",
            bucket.chunks_table()
        );
        sqlx::query_as::<_, Chunk>(&sql)
            .bind(file_id)
            .bind(i64::from(seq))
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "chunk {seq} of file `{file_id}` in bucket `{}`",
                    bucket.name
                ))
            })
    }

    /// Delete every chunk of `file_id`, returning how many were removed.
    pub async fn delete_file_chunks(&self, bucket: &Bucket, file_id: FileId) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {} WHERE file_id = ?", bucket.chunks_table());
        let result = sqlx::query(&sql).bind(file_id).execute(&*self.db).await?;
        Ok(result.rows_affected())
    }

    /// File ids that own chunks but have no registry record at all.
    pub async fn unowned_file_ids(&self, bucket: &Bucket) -> StoreResult<Vec<FileId>> {
        let sql = format!(
            "SELECT DISTINCT c.file_id FROM {chunks} c
             WHERE NOT EXISTS (SELECT 1 FROM {files} f WHERE f.id = c.file_id)",
            chunks = bucket.chunks_table(),
            files = bucket.files_table()
        );
        let ids = sqlx::query_scalar::<_, FileId>(&sql)
            .fetch_all(&*self.db)
            .await?;
        Ok(ids)
    }
}
