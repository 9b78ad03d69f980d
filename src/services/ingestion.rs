//! Ingestion pipeline: stream a source into chunks, then finalize and link in one transaction.

use super::{
    asset_store::AssetStore,
    catalog_linker::CatalogLinker,
    error::{StoreError, StoreResult},
};
use crate::{
    db::begin_write,
    models::{
        bucket::Bucket,
        catalog::{BlobRef, CatalogEntry, ProductMetadata},
        file::{FileId, FileRecord},
    },
};
use md5::Context;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Result of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    pub record: FileRecord,
    /// Catalog entry created for the file, if metadata was supplied.
    pub entry: Option<CatalogEntry>,
}

impl AssetStore {
    /// Ingest `source` into `bucket` under a freshly allocated file id.
    ///
    /// Chunks are written in order and acknowledged one by one; the record is
    /// finalized only after the last write returns, in the same transaction as
    /// the optional catalog link. On any failure the record stays pending and
    /// invisible, and its chunks are left for the orphan sweep.
    /// Each call allocates a new id even when `filename` was ingested before.
    pub async fn ingest<R>(
        &self,
        bucket: &Bucket,
        filename: &str,
        mut source: R,
        link: Option<(String, ProductMetadata)>,
    ) -> StoreResult<Ingested>
    where
        R: AsyncRead + Unpin + Send,
    {
        // Reject bad catalog metadata before anything is written.
        if let Some((category, meta)) = &link {
            let candidate = meta
                .clone()
                .into_entry(BlobRef::new(bucket.name.clone(), FileId::generate()));
            CatalogLinker::validate(category, &candidate)?;
        }

        let file_id = self.registry.begin_file(bucket, filename).await?;
        let chunk_size = self.chunks.chunk_size();
        let mut window = vec![0u8; chunk_size];
        let mut digest = Context::new();
        let mut total_length: u64 = 0;
        let mut seq: u32 = 0;

        loop {
            let filled = match fill_window(&mut source, &mut window).await {
                Ok(filled) => filled,
                Err(err) => {
                    warn!(bucket = %bucket.name, %file_id, "aborting ingestion: {}", err);
                    return Err(StoreError::Source(err));
                }
            };
            if filled == 0 {
                break;
            }
            let payload = &window[..filled];
            self.chunks.put_chunk(bucket, file_id, seq, payload).await?;
            digest.consume(payload);
            total_length += filled as u64;
            seq += 1;
            if filled < chunk_size {
                break;
            }
        }

        let md5 = format!("{:x}", digest.compute());
        let link = link.map(|(category, meta)| {
            let entry = meta.into_entry(BlobRef::new(bucket.name.clone(), file_id));
            (category, entry)
        });

        // Finalize and link commit together: a failed link leaves the record pending.
        let mut tx = begin_write(&self.db).await?;
        let record = self
            .registry
            .finalize_in(&mut *tx, bucket, file_id, total_length, u64::from(seq), &md5)
            .await?;
        if let Some((category, entry)) = &link {
            if let Err(err) = CatalogLinker::link_in(&mut *tx, category, entry).await {
                warn!(bucket = %bucket.name, %file_id, category, "aborting ingestion: {}", err);
                return Err(err);
            }
        }
        tx.commit().await?;

        info!(
            bucket = %bucket.name,
            %file_id,
            filename,
            length = record.length,
            chunks = record.chunk_count,
            "ingested file"
        );

        let entry = link.map(|(_, entry)| entry);
        Ok(Ingested { record, entry })
    }
}

/// Read until `window` is full or the source is exhausted.
async fn fill_window<R>(source: &mut R, window: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < window.len() {
        let n = source.read(&mut window[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    debug!(filled, "filled chunk window");
    Ok(filled)
}
