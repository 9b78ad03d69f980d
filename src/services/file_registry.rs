//! FileRegistry: per-file metadata and the finalize step that grants visibility.
//!
//! `begin_file` inserts a pending row that no lookup can see. Once every chunk
//! is acknowledged, `finalize_file` checks the stored chunk span against the
//! declared length and count and flips the row to visible in one transaction.

use super::error::{StoreError, StoreResult};
use crate::models::{
    bucket::Bucket,
    file::{FileId, FileRecord, expected_chunk_count},
};
use crate::db::begin_write;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct FileRegistry {
    db: Arc<SqlitePool>,
    chunk_size: usize,
}

/// Columns selected for a visible record; the bucket name is bound as the first parameter.
const RECORD_COLUMNS: &str =
    "id, ? AS bucket, filename, length, chunk_size, chunk_count, md5, uploaded_at";

impl FileRegistry {
    pub fn new(db: Arc<SqlitePool>, chunk_size: usize) -> Self {
        Self { db, chunk_size }
    }

    /// Allocate a new identifier and an invisible, pending record.
    pub async fn begin_file(&self, bucket: &Bucket, filename: &str) -> StoreResult<FileId> {
        if filename.trim().is_empty() {
            return Err(StoreError::invalid("filename must not be empty"));
        }
        let file_id = FileId::generate();
        let sql = format!(
            "INSERT INTO {} (id, filename, chunk_size, created_at, finalized)
             VALUES (?, ?, ?, ?, 0)",
            bucket.files_table()
        );
        sqlx::query(&sql)
            .bind(file_id)
            .bind(filename)
            .bind(self.chunk_size as i64)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        debug!(bucket = %bucket.name, %file_id, filename, "began file");
        Ok(file_id)
    }

    /// Make a pending record visible.
    ///
    /// Fails with `InvalidInput` if the declared span disagrees with
    /// `ceil(total_length / chunk_size)` or with the chunks actually stored,
    /// and with `NotFound` if no pending record exists for `file_id`.
    pub async fn finalize_file(
        &self,
        bucket: &Bucket,
        file_id: FileId,
        total_length: u64,
        chunk_count: u64,
        md5: &str,
    ) -> StoreResult<FileRecord> {
        let mut tx = begin_write(&self.db).await?;
        let record = self
            .finalize_in(&mut *tx, bucket, file_id, total_length, chunk_count, md5)
            .await?;
        tx.commit().await?;
        Ok(record)
    }

    /// [`finalize_file`](Self::finalize_file) on a connection the caller owns.
    ///
    /// `conn` must be inside a write transaction; the record becomes visible
    /// only when that transaction commits.
    pub(crate) async fn finalize_in(
        &self,
        conn: &mut SqliteConnection,
        bucket: &Bucket,
        file_id: FileId,
        total_length: u64,
        chunk_count: u64,
        md5: &str,
    ) -> StoreResult<FileRecord> {
        if md5.len() != 32 || !md5.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::invalid(format!("malformed md5 `{md5}`")));
        }

        let pending_sql = format!(
            "SELECT filename, chunk_size, finalized FROM {} WHERE id = ?",
            bucket.files_table()
        );
        let (filename, chunk_size, finalized): (String, i64, bool) =
            sqlx::query_as(&pending_sql)
                .bind(file_id)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "pending file `{file_id}` in bucket `{}`",
                        bucket.name
                    ))
                })?;
        if finalized {
            return Err(StoreError::invalid(format!(
                "file `{file_id}` is already finalized"
            )));
        }

        let expected = expected_chunk_count(total_length, chunk_size as u64);
        if chunk_count != expected {
            return Err(StoreError::invalid(format!(
                "file `{file_id}`: {chunk_count} chunks declared, {expected} expected for {total_length} bytes"
            )));
        }

        let span_sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(length), 0), MAX(seq) FROM {} WHERE file_id = ?",
            bucket.chunks_table()
        );
        let (stored, stored_length, max_seq): (i64, i64, Option<i64>) = sqlx::query_as(&span_sql)
            .bind(file_id)
            .fetch_one(&mut *conn)
            .await?;
        // With (file_id, seq) unique, count == n and max == n - 1 means 0..n is dense.
        let dense = stored as u64 == chunk_count
            && max_seq.map_or(chunk_count == 0, |max| max as u64 + 1 == chunk_count);
        if !dense || stored_length as u64 != total_length {
            return Err(StoreError::invalid(format!(
                "file `{file_id}`: store holds {stored} chunks / {stored_length} bytes, \
                 finalize declared {chunk_count} chunks / {total_length} bytes"
            )));
        }

        let uploaded_at = Utc::now();
        let update_sql = format!(
            "UPDATE {} SET length = ?, chunk_count = ?, md5 = ?, uploaded_at = ?, finalized = 1
             WHERE id = ? AND finalized = 0",
            bucket.files_table()
        );
        sqlx::query(&update_sql)
            .bind(total_length as i64)
            .bind(chunk_count as i64)
            .bind(md5.to_ascii_lowercase())
            .bind(uploaded_at)
            .bind(file_id)
            .execute(&mut *conn)
            .await?;

        debug!(bucket = %bucket.name, %file_id, total_length, chunk_count, "finalized file");
        Ok(FileRecord {
            id: file_id,
            bucket: bucket.name.clone(),
            filename,
            length: total_length as i64,
            chunk_size,
            chunk_count: chunk_count as i64,
            md5: md5.to_ascii_lowercase(),
            uploaded_at,
        })
    }

    /// Look up a finalized record. Pending records are `NotFound`.
    pub async fn get_record(&self, bucket: &Bucket, file_id: FileId) -> StoreResult<FileRecord> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE id = ? AND finalized = 1",
            bucket.files_table()
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(&bucket.name)
            .bind(file_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("file `{file_id}` in bucket `{}`", bucket.name))
            })
    }

    /// Delete a record, pending or finalized. Chunks are left to the caller.
    pub async fn delete_record(&self, bucket: &Bucket, file_id: FileId) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", bucket.files_table());
        let result = sqlx::query(&sql).bind(file_id).execute(&*self.db).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "file `{file_id}` in bucket `{}`",
                bucket.name
            )));
        }
        Ok(())
    }

    /// All finalized records of a bucket, oldest upload first.
    pub async fn list_files(&self, bucket: &Bucket) -> StoreResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE finalized = 1 ORDER BY uploaded_at ASC, filename ASC",
            bucket.files_table()
        );
        let records = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(&bucket.name)
            .fetch_all(&*self.db)
            .await?;
        Ok(records)
    }

    /// Pending records created before `cutoff`.
    pub async fn pending_before(
        &self,
        bucket: &Bucket,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<FileId>> {
        let sql = format!(
            "SELECT id, created_at FROM {} WHERE finalized = 0",
            bucket.files_table()
        );
        let rows: Vec<(FileId, DateTime<Utc>)> =
            sqlx::query_as(&sql).fetch_all(&*self.db).await?;
        Ok(rows
            .into_iter()
            .filter(|(_, created_at)| *created_at < cutoff)
            .map(|(id, _)| id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        services::{bucket_manager::BucketManager, chunk_store::ChunkStore},
    };

    const MD5_EMPTY: &str = "d41d8cd98f00b204e9800998ecf8427e";

    async fn setup() -> (FileRegistry, ChunkStore, Bucket) {
        let db = test_pool().await;
        let bucket = BucketManager::new(db.clone(), ["default".to_string()])
            .get_bucket("default")
            .await
            .unwrap();
        (
            FileRegistry::new(db.clone(), 4),
            ChunkStore::new(db, 4),
            bucket,
        )
    }

    #[tokio::test]
    async fn pending_record_is_invisible_until_finalized() {
        let (registry, chunks, bucket) = setup().await;
        let id = registry.begin_file(&bucket, "a.png").await.unwrap();
        chunks.put_chunk(&bucket, id, 0, b"abcd").await.unwrap();
        chunks.put_chunk(&bucket, id, 1, b"e").await.unwrap();

        assert!(matches!(
            registry.get_record(&bucket, id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(registry.list_files(&bucket).await.unwrap().is_empty());

        let md5 = format!("{:x}", md5::compute(b"abcde"));
        let record = registry
            .finalize_file(&bucket, id, 5, 2, &md5)
            .await
            .unwrap();
        assert_eq!(record.chunk_count, 2);
        assert_eq!(record.chunk_size, 4);
        assert_eq!(record.bucket, "default");

        let fetched = registry.get_record(&bucket, id).await.unwrap();
        assert_eq!(fetched, record);
        assert_eq!(registry.list_files(&bucket).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn finalize_checks_declared_span() {
        let (registry, chunks, bucket) = setup().await;
        let id = registry.begin_file(&bucket, "a.png").await.unwrap();
        chunks.put_chunk(&bucket, id, 0, b"abcd").await.unwrap();
        let md5 = format!("{:x}", md5::compute(b"abcdef"));

        // chunk_count must be ceil(len / chunk_size)
        let err = registry.finalize_file(&bucket, id, 6, 1, &md5).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));

        // chunk 1 was never written
        let err = registry.finalize_file(&bucket, id, 6, 2, &md5).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(registry.get_record(&bucket, id).await.is_err());

        chunks.put_chunk(&bucket, id, 1, b"ef").await.unwrap();
        registry.finalize_file(&bucket, id, 6, 2, &md5).await.unwrap();

        let err = registry.finalize_file(&bucket, id, 6, 2, &md5).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_file_and_bad_inputs() {
        let (registry, _chunks, bucket) = setup().await;
        let id = registry.begin_file(&bucket, "empty.png").await.unwrap();
        let record = registry
            .finalize_file(&bucket, id, 0, 0, MD5_EMPTY)
            .await
            .unwrap();
        assert_eq!(record.length, 0);

        assert!(matches!(
            registry.begin_file(&bucket, "  ").await,
            Err(StoreError::InvalidInput(_))
        ));
        let id = registry.begin_file(&bucket, "x.png").await.unwrap();
        assert!(matches!(
            registry.finalize_file(&bucket, id, 0, 0, "nothex").await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            registry
                .finalize_file(&bucket, FileId::generate(), 0, 0, MD5_EMPTY)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_and_pending_listing() {
        let (registry, _chunks, bucket) = setup().await;
        let pending = registry.begin_file(&bucket, "p.png").await.unwrap();
        let done = registry.begin_file(&bucket, "d.png").await.unwrap();
        registry
            .finalize_file(&bucket, done, 0, 0, MD5_EMPTY)
            .await
            .unwrap();

        let future = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(
            registry.pending_before(&bucket, future).await.unwrap(),
            vec![pending]
        );
        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(registry.pending_before(&bucket, past).await.unwrap().is_empty());

        registry.delete_record(&bucket, done).await.unwrap();
        assert!(matches!(
            registry.delete_record(&bucket, done).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(registry.get_record(&bucket, done).await.is_err());
    }
}
