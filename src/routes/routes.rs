//! Defines routes for catalog listings, image delivery and bucket file management.
//!
//! ## Structure
//! - **Catalog endpoints**
//!   - `GET    /images/{category}`: list entries with image URLs
//!   - `DELETE /images/{category}/{id}`: remove an entry (image is kept)
//!
//! - **Image endpoints**
//!   - `GET    /image/{file_id}`: default bucket
//!   - `GET    /recommended_image/{file_id}`: recommended bucket
//!
//! - **Bucket file endpoints**
//!   - `GET    /buckets/{bucket}/files`: list finalized files
//!   - `PUT    /buckets/{bucket}/files?filename=…`: streaming upload
//!   - `GET    /buckets/{bucket}/files/{file_id}`: download
//!   - `DELETE /buckets/{bucket}/files/{file_id}`: remove file, chunks and links
//!
//! Static files under the assets directory are served at `/assets/{*path}`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{
            delete_catalog_entry, delete_file, get_bucket_file, get_image, get_recommended_image,
            list_bucket_files, list_images, upload_file,
        },
    },
    services::asset_store::AssetStore,
};
use axum::{
    Router,
    routing::{delete, get},
};
use std::path::Path;
use tower_http::services::ServeDir;

/// Build and return the router for all asset routes.
///
/// The router carries shared state (`AssetStore`) to all handlers.
pub fn routes(assets_dir: &Path) -> Router<AssetStore> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Catalog routes
        .route("/images/{category}", get(list_images))
        .route("/images/{category}/{id}", delete(delete_catalog_entry))
        // Image routes
        .route("/image/{file_id}", get(get_image))
        .route("/recommended_image/{file_id}", get(get_recommended_image))
        // Bucket file routes
        .route(
            "/buckets/{bucket}/files",
            get(list_bucket_files).put(upload_file),
        )
        .route(
            "/buckets/{bucket}/files/{file_id}",
            get(get_bucket_file).delete(delete_file),
        )
        // Static assets
        .nest_service("/assets", ServeDir::new(assets_dir))
}
