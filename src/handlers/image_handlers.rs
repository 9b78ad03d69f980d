//! HTTP handlers for catalog listings and image delivery.
//! Delegates all storage concerns to `AssetStore`; handlers only parse
//! identifiers and shape responses.

use crate::{
    errors::AppError,
    models::{
        bucket::{Bucket, DEFAULT_BUCKET, RECOMMENDED_BUCKET},
        catalog::{CatalogEntry, ProductMetadata},
        file::{FileId, FileRecord},
    },
    services::{asset_store::AssetStore, retrieval::Retrieved},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::StreamReader;

/// One catalog entry as listed by `GET /images/{category}`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageListing {
    pub id: String,
    pub name: String,
    pub price: String,
    pub description: String,
    pub delivery: String,
    pub image_url: String,
}

impl From<CatalogEntry> for ImageListing {
    fn from(entry: CatalogEntry) -> Self {
        let image_url = entry.image.url();
        Self {
            id: entry.id,
            name: entry.name,
            price: entry.price,
            description: entry.description,
            delivery: entry.delivery,
            image_url,
        }
    }
}

/// Query accepted by `PUT /buckets/{bucket}/files`.
///
/// Supplying `category` together with `id` and `name` links the upload into the catalog.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub category: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub delivery: Option<String>,
}

impl UploadQuery {
    fn into_link(self) -> Result<Option<(String, ProductMetadata)>, AppError> {
        let Some(category) = self.category else {
            return Ok(None);
        };
        let (Some(id), Some(name)) = (self.id, self.name) else {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "linking an upload requires `id` and `name`",
            ));
        };
        Ok(Some((
            category,
            ProductMetadata {
                id,
                name,
                price: self.price.unwrap_or_default(),
                description: self.description.unwrap_or_default(),
                delivery: self.delivery.unwrap_or_default(),
            },
        )))
    }
}

/// `GET /images/{category}`: every entry of a category with its image URL.
pub async fn list_images(
    State(store): State<AssetStore>,
    Path(category): Path<String>,
) -> Result<Json<Vec<ImageListing>>, AppError> {
    let entries = store.catalog.list_category(&category).await?;
    Ok(Json(entries.into_iter().map(ImageListing::from).collect()))
}

/// `DELETE /images/{category}/{id}`: drop a catalog entry, keeping its image.
pub async fn delete_catalog_entry(
    State(store): State<AssetStore>,
    Path((category, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    store.catalog.unlink(&category, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /image/{file_id}`: image from the default bucket.
pub async fn get_image(
    State(store): State<AssetStore>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    serve_file(&store, DEFAULT_BUCKET, &file_id).await
}

/// `GET /recommended_image/{file_id}`: image from the recommended bucket.
pub async fn get_recommended_image(
    State(store): State<AssetStore>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    serve_file(&store, RECOMMENDED_BUCKET, &file_id).await
}

/// `GET /buckets/{bucket}/files/{file_id}`
pub async fn get_bucket_file(
    State(store): State<AssetStore>,
    Path((bucket, file_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    serve_file(&store, &bucket, &file_id).await
}

/// `GET /buckets/{bucket}/files`: finalized records, oldest first.
pub async fn list_bucket_files(
    State(store): State<AssetStore>,
    Path(bucket): Path<String>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let bucket = store.buckets.configured(&bucket).await?;
    Ok(Json(store.registry.list_files(&bucket).await?))
}

/// `PUT /buckets/{bucket}/files?filename=…`: stream the body into the bucket.
pub async fn upload_file(
    State(store): State<AssetStore>,
    Path(bucket): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let bucket = store.buckets.configured(&bucket).await?;
    let filename = query.filename.clone();
    let link = query.into_link()?;

    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = StreamReader::new(stream);

    let ingested = store.ingest(&bucket, &filename, reader, link).await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}

/// `DELETE /buckets/{bucket}/files/{file_id}`: remove a file, its chunks and its catalog links.
pub async fn delete_file(
    State(store): State<AssetStore>,
    Path((bucket, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let bucket = store.buckets.configured(&bucket).await?;
    let file_id: FileId = file_id.parse()?;
    let removed = store.remove_file(&bucket, file_id).await?;
    Ok(Json(removed))
}

async fn serve_file(store: &AssetStore, bucket: &str, file_id: &str) -> Result<Response, AppError> {
    let bucket: Bucket = store.buckets.configured(bucket).await?;
    let file_id: FileId = file_id.parse()?;
    let Retrieved { record, data } = store.retrieve(&bucket, file_id).await?;

    let mut response = Response::new(Body::from(data));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.length.max(0)));
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.md5)) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::asset_store::tests::test_store;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn meta(id: &str, name: &str) -> ProductMetadata {
        ProductMetadata {
            id: id.into(),
            name: name.into(),
            price: "10.99".into(),
            description: "desc".into(),
            delivery: "Free".into(),
        }
    }

    #[tokio::test]
    async fn unknown_image_is_404_with_json_error() {
        let store = test_store(8).await;
        let response = get_image(State(store), Path(FileId::generate().to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn malformed_id_is_400() {
        let store = test_store(8).await;
        let response = get_image(State(store), Path("not-an-id".into()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn serves_png_bytes_from_the_right_bucket() {
        let store = test_store(8).await;
        let recommended = store.buckets.get_bucket("recommended").await.unwrap();
        let ingested = store
            .ingest(&recommended, "r.png", &b"\x89PNG recommended"[..], None)
            .await
            .unwrap();
        let id = ingested.record.id.to_string();

        let response = get_recommended_image(State(store.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"\x89PNG recommended");

        // Same id is unknown in the default bucket.
        let response = get_image(State(store), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn corrupted_file_is_404() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let ingested = store.ingest(&bucket, "a.png", &b"abcdefgh"[..], None).await.unwrap();
        store
            .chunks
            .delete_file_chunks(&bucket, ingested.record.id)
            .await
            .unwrap();

        let response = get_image(State(store), Path(ingested.record.id.to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(
            json_body(response).await["error"]
                .as_str()
                .unwrap()
                .contains("corrupted")
        );
    }

    #[tokio::test]
    async fn lists_category_with_derived_urls() {
        let store = test_store(8).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let b = store
            .ingest(&bucket, "Boot.png", &b"boot"[..], Some(("shoes".into(), meta("002", "Boot"))))
            .await
            .unwrap();
        let a = store
            .ingest(&bucket, "Sneaker.png", &b"sneaker"[..], Some(("shoes".into(), meta("001", "Sneaker"))))
            .await
            .unwrap();

        let Json(listing) = list_images(State(store.clone()), Path("shoes".into()))
            .await
            .unwrap();
        assert_eq!(
            listing,
            vec![
                ImageListing {
                    id: "001".into(),
                    name: "Sneaker".into(),
                    price: "10.99".into(),
                    description: "desc".into(),
                    delivery: "Free".into(),
                    image_url: format!("/image/{}", a.record.id),
                },
                ImageListing {
                    id: "002".into(),
                    name: "Boot".into(),
                    price: "10.99".into(),
                    description: "desc".into(),
                    delivery: "Free".into(),
                    image_url: format!("/image/{}", b.record.id),
                },
            ]
        );

        let Json(empty) = list_images(State(store), Path("hats".into())).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn upload_then_fetch_and_delete() {
        let store = test_store(4).await;
        let query = UploadQuery {
            filename: "lamp.png".into(),
            category: Some("lamps".into()),
            id: Some("001".into()),
            name: Some("Lamp".into()),
            price: None,
            description: None,
            delivery: None,
        };
        let response = upload_file(
            State(store.clone()),
            Path("default".into()),
            Query(query),
            Body::from("lamp image bytes"),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let id = body["record"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["record"]["length"], 16);
        assert_eq!(body["entry"]["id"], "001");

        let response = get_image(State(store.clone()), Path(id.clone())).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"lamp image bytes");

        let response = delete_file(State(store.clone()), Path(("default".into(), id.clone())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["links"], 1);

        let response = get_image(State(store), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_link_needs_id_and_name() {
        let store = test_store(4).await;
        let query = UploadQuery {
            filename: "lamp.png".into(),
            category: Some("lamps".into()),
            id: None,
            name: Some("Lamp".into()),
            price: None,
            description: None,
            delivery: None,
        };
        let response = upload_file(
            State(store),
            Path("default".into()),
            Query(query),
            Body::from("x"),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unconfigured_bucket_is_404() {
        let store = test_store(4).await;
        let response = list_bucket_files(State(store), Path("elsewhere".into()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_entry_keeps_image_servable() {
        let store = test_store(4).await;
        let bucket = store.buckets.get_bucket("default").await.unwrap();
        let ingested = store
            .ingest(&bucket, "Lamp.png", &b"lamp"[..], Some(("lamps".into(), meta("001", "Lamp"))))
            .await
            .unwrap();

        let status = delete_catalog_entry(State(store.clone()), Path(("lamps".into(), "001".into())))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let response = get_image(State(store.clone()), Path(ingested.record.id.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let Json(files) = list_bucket_files(State(store), Path("default".into()))
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
    }
}
