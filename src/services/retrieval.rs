//! Retrieval pipeline: resolve a record, then read its chunks back in order.

use super::{
    asset_store::AssetStore,
    error::{StoreError, StoreResult},
};
use crate::models::{
    bucket::Bucket,
    file::{FileId, FileRecord},
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt, stream};
use md5::Context;
use tracing::{debug, warn};

/// A fully reassembled and verified file.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub record: FileRecord,
    pub data: Bytes,
}

struct ReadState {
    seq: i64,
    seen: u64,
    digest: Context,
}

impl AssetStore {
    /// Read a finalized file by id.
    ///
    /// `NotFound` when no visible record exists; `Corrupted` when the record
    /// exists but a chunk is missing or the reassembled bytes disagree with the
    /// recorded length or hash.
    pub async fn retrieve(&self, bucket: &Bucket, file_id: FileId) -> StoreResult<Retrieved> {
        let record = self.registry.get_record(bucket, file_id).await?;
        let capacity = usize::try_from(record.length).unwrap_or_default();
        let data = self
            .stream_chunks(bucket.clone(), record.clone())
            .try_fold(BytesMut::with_capacity(capacity), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok::<_, StoreError>(acc)
            })
            .await?
            .freeze();
        debug!(bucket = %bucket.name, %file_id, len = data.len(), "retrieved file");
        Ok(Retrieved { record, data })
    }

    /// Resolve a catalog entry, then read the file it references.
    ///
    /// A reference into a bucket that no longer holds the file is `NotFound`.
    pub async fn retrieve_by_catalog(&self, category: &str, human_id: &str) -> StoreResult<Retrieved> {
        let blob = self.catalog.resolve(category, human_id).await?;
        let bucket = self.buckets.get_bucket(&blob.bucket).await?;
        self.retrieve(&bucket, blob.file_id).await
    }

    /// Stream the chunks of `record` in sequence order.
    ///
    /// Each item is one chunk payload. Length (and, when enabled, hash) checks
    /// run once the last chunk has been read, so a consumer that has already
    /// forwarded earlier items still observes the failure as the final item.
    pub fn stream_chunks(
        &self,
        bucket: Bucket,
        record: FileRecord,
    ) -> impl Stream<Item = StoreResult<Bytes>> + Send + 'static {
        let chunks = self.chunks.clone();
        let verify_hash = self.verify_hash;
        let initial = Some(ReadState {
            seq: 0,
            seen: 0,
            digest: Context::new(),
        });

        stream::try_unfold(initial, move |state| {
            let chunks = chunks.clone();
            let bucket = bucket.clone();
            let record = record.clone();
            async move {
                let Some(mut state) = state else {
                    return Ok(None);
                };
                let corrupted = |reason: String| {
                    warn!(bucket = %bucket.name, file_id = %record.id, "{}", reason);
                    StoreError::corrupted(&bucket.name, record.id, reason)
                };

                if state.seq >= record.chunk_count {
                    if state.seen != record.length as u64 {
                        return Err(corrupted(format!(
                            "reassembled {} bytes, record says {}",
                            state.seen, record.length
                        )));
                    }
                    if verify_hash {
                        let actual = format!("{:x}", state.digest.compute());
                        if actual != record.md5 {
                            return Err(corrupted(format!(
                                "md5 {actual} does not match recorded {}",
                                record.md5
                            )));
                        }
                    }
                    return Ok(None);
                }

                let seq = u32::try_from(state.seq)
                    .map_err(|_| corrupted(format!("chunk index {} out of range", state.seq)))?;
                let chunk = match chunks.get_chunk(&bucket, record.id, seq).await {
                    Ok(chunk) => chunk,
                    Err(StoreError::NotFound(_)) => {
                        return Err(corrupted(format!(
                            "chunk {seq} of {} is missing",
                            record.chunk_count
                        )));
                    }
                    Err(err) => return Err(err),
                };

                state.seen += chunk.data.len() as u64;
                if state.seen > record.length as u64 {
                    return Err(corrupted(format!(
                        "chunks exceed recorded length {}",
                        record.length
                    )));
                }
                if verify_hash {
                    state.digest.consume(&chunk.data);
                }
                state.seq += 1;
                Ok(Some((Bytes::from(chunk.data), Some(state))))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::asset_store::tests::test_store;
    use futures::StreamExt;

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        assert!(matches!(
            store.retrieve(&bucket, FileId::generate()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_chunk_is_corrupted() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let ingested = store.ingest(&bucket, "a.png", &b"abcdefghij"[..], None).await.unwrap();
        let id = ingested.record.id;

        // Simulate a deletion racing with this reader: chunks gone, record still there.
        store.chunks.delete_file_chunks(&bucket, id).await.unwrap();
        assert!(matches!(
            store.retrieve(&bucket, id).await,
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_payload_fails_hash_check() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let ingested = store.ingest(&bucket, "a.png", &b"abcdefgh"[..], None).await.unwrap();
        let id = ingested.record.id;

        let sql = format!(
            "UPDATE {} SET data = ? WHERE file_id = ? AND seq = 1",
            bucket.chunks_table()
        );
        sqlx::query(&sql)
            .bind(&b"EFGH"[..])
            .bind(id)
            .execute(&*store.db)
            .await
            .unwrap();

        let err = store.retrieve(&bucket, id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));

        // Without hash verification the same bytes come back unchanged.
        let mut relaxed = store.clone();
        relaxed.verify_hash = false;
        let back = relaxed.retrieve(&bucket, id).await.unwrap();
        assert_eq!(&back.data[..], b"abcdEFGH");
    }

    #[tokio::test]
    async fn short_chunk_is_a_length_mismatch() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let ingested = store.ingest(&bucket, "a.png", &b"abcdefgh"[..], None).await.unwrap();
        let id = ingested.record.id;

        let sql = format!(
            "UPDATE {} SET data = ? WHERE file_id = ? AND seq = 1",
            bucket.chunks_table()
        );
        sqlx::query(&sql)
            .bind(&b"ef"[..])
            .bind(id)
            .execute(&*store.db)
            .await
            .unwrap();

        let mut relaxed = store.clone();
        relaxed.verify_hash = false;
        assert!(matches!(
            relaxed.retrieve(&bucket, id).await,
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn stream_yields_chunks_in_order() {
        let store = test_store(3).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let ingested = store.ingest(&bucket, "a.png", &b"abcdefgh"[..], None).await.unwrap();

        let parts: Vec<Bytes> = store
            .stream_chunks(bucket, ingested.record)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(parts, vec![
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"def"),
            Bytes::from_static(b"gh"),
        ]);
    }

    #[tokio::test]
    async fn pending_file_is_never_partially_visible() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let id = store.registry.begin_file(&bucket, "slow.png").await.unwrap();
        store.chunks.put_chunk(&bucket, id, 0, b"abcd").await.unwrap();

        assert!(matches!(
            store.retrieve(&bucket, id).await,
            Err(StoreError::NotFound(_))
        ));

        store.chunks.put_chunk(&bucket, id, 1, b"ef").await.unwrap();
        let md5 = format!("{:x}", md5::compute(b"abcdef"));
        store.registry.finalize_file(&bucket, id, 6, 2, &md5).await.unwrap();
        let back = store.retrieve(&bucket, id).await.unwrap();
        assert_eq!(&back.data[..], b"abcdef");
    }

    #[tokio::test]
    async fn concurrent_readers_see_none_or_all() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let data: Vec<u8> = (0..64u8).collect();

        let writer = {
            let store = store.clone();
            let bucket = bucket.clone();
            let data = data.clone();
            tokio::spawn(async move { store.ingest(&bucket, "c.png", &data[..], None).await })
        };

        let mut readers = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let bucket = bucket.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    for record in store.registry.list_files(&bucket).await.unwrap() {
                        let back = store.retrieve(&bucket, record.id).await.unwrap();
                        assert_eq!(back.data.len(), 64);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let ingested = writer.await.unwrap().unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        let back = store.retrieve(&bucket, ingested.record.id).await.unwrap();
        assert_eq!(back.data.to_vec(), data);
    }
}
