//! Product/category records and their references into the blob store.

use super::{
    bucket::{DEFAULT_BUCKET, RECOMMENDED_BUCKET},
    file::FileId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A non-owning reference to a file in a specific bucket.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct BlobRef {
    pub bucket: String,
    pub file_id: FileId,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, file_id: FileId) -> Self {
        Self {
            bucket: bucket.into(),
            file_id,
        }
    }

    /// Public URL the web layer serves this blob under.
    pub fn url(&self) -> String {
        match self.bucket.as_str() {
            DEFAULT_BUCKET => format!("/image/{}", self.file_id),
            RECOMMENDED_BUCKET => format!("/recommended_image/{}", self.file_id),
            other => format!("/buckets/{}/files/{}", other, self.file_id),
        }
    }
}

/// A product stored under a category, pointing at its image.
///
/// Deleting an entry never deletes the referenced file.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct CatalogEntry {
    /// Human-readable product id, unique within its category.
    pub id: String,
    pub name: String,
    /// Price exactly as the catalog source spells it (e.g. `"10.99"`).
    pub price: String,
    pub description: String,
    pub delivery: String,
    #[sqlx(flatten)]
    pub image: BlobRef,
}

/// Catalog fields supplied by an uploader, before a file id exists.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProductMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub delivery: String,
}

impl ProductMetadata {
    pub fn into_entry(self, image: BlobRef) -> CatalogEntry {
        CatalogEntry {
            id: self.id,
            name: self.name,
            price: self.price,
            description: self.description,
            delivery: self.delivery,
            image,
        }
    }
}
