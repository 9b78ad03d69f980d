//! Bulk import of a storefront asset tree.
//!
//! Layout on disk:
//!
//! ```text
//! metadata.json                 {"<category>": [{"id", "name", "price", ...}], ...}
//! <assets>/<Category>/<id>.png  one image per catalog item
//! <assets>/Recommended/*.png    raw images for the recommended bucket
//! ```

use super::asset_store::AssetStore;
use crate::models::{
    bucket::{DEFAULT_BUCKET, RECOMMENDED_BUCKET},
    catalog::ProductMetadata,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tokio::fs::{self, File};
use tracing::{info, warn};

/// Category name to the products listed under it.
pub type CatalogMetadata = BTreeMap<String, Vec<ProductMetadata>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Catalog images ingested and linked.
    pub linked: usize,
    /// Raw images ingested into the recommended bucket.
    pub raw: usize,
    /// Items skipped because the image was missing or ingestion failed.
    pub skipped: usize,
}

pub async fn load_metadata(path: &Path) -> Result<CatalogMetadata> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading metadata file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing metadata file {}", path.display()))
}

/// Ingest every catalog item image into the default bucket and link it.
pub async fn import_catalog(
    store: &AssetStore,
    metadata: CatalogMetadata,
    assets_dir: &Path,
) -> Result<ImportSummary> {
    let bucket = store.buckets.get_bucket(DEFAULT_BUCKET).await?;
    let mut summary = ImportSummary::default();

    for (category, items) in metadata {
        let folder = assets_dir.join(capitalize(&category));
        for item in items {
            let image_path = folder.join(format!("{}.png", item.id));
            let file = match File::open(&image_path).await {
                Ok(file) => file,
                Err(err) => {
                    warn!("Image not found: {} ({})", image_path.display(), err);
                    summary.skipped += 1;
                    continue;
                }
            };

            let filename = format!("{}.png", item.name);
            let name = item.name.clone();
            match store
                .ingest(&bucket, &filename, file, Some((category.clone(), item)))
                .await
            {
                Ok(_) => summary.linked += 1,
                Err(err) => {
                    warn!("Error uploading {}: {}", name, err);
                    summary.skipped += 1;
                }
            }
        }
    }

    info!(
        linked = summary.linked,
        skipped = summary.skipped,
        "catalog images imported"
    );
    Ok(summary)
}

/// Ingest every `*.png` in `folder` into the recommended bucket, in name order.
pub async fn import_raw(store: &AssetStore, folder: &Path) -> Result<ImportSummary> {
    let bucket = store.buckets.get_bucket(RECOMMENDED_BUCKET).await?;
    let mut summary = ImportSummary::default();

    let mut entries = fs::read_dir(folder)
        .await
        .with_context(|| format!("listing {}", folder.display()))?;
    let mut images: Vec<(String, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".png") && entry.file_type().await?.is_file() {
            images.push((name, entry.path()));
        }
    }
    images.sort();

    for (name, path) in images {
        let file = File::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        match store.ingest(&bucket, &name, file, None).await {
            Ok(_) => summary.raw += 1,
            Err(err) => {
                warn!("Error uploading {}: {}", name, err);
                summary.skipped += 1;
            }
        }
    }

    info!(raw = summary.raw, folder = %folder.display(), "raw images imported");
    Ok(summary)
}

/// Full import: catalog images, then the recommended folder if present.
pub async fn import_all(
    store: &AssetStore,
    metadata_path: &Path,
    assets_dir: &Path,
    recommended_folder: &str,
) -> Result<ImportSummary> {
    let metadata = load_metadata(metadata_path).await?;
    let mut summary = import_catalog(store, metadata, assets_dir).await?;

    let raw_dir = assets_dir.join(recommended_folder);
    if fs::metadata(&raw_dir).await.is_ok_and(|m| m.is_dir()) {
        let raw = import_raw(store, &raw_dir).await?;
        summary.raw += raw.raw;
        summary.skipped += raw.skipped;
    } else {
        warn!("Recommended folder {} not found; skipping", raw_dir.display());
    }
    Ok(summary)
}

/// Uppercase the first character and lowercase the rest (`shoes` -> `Shoes`).
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
