//! CatalogLinker: product/category records that point at files.
//!
//! Every category is its own `"catalog.<category>"` table, created on first
//! link and recorded in the `categories` registry. Entries hold a
//! `(bucket, file_id)` reference that is not checked against the registry;
//! a dangling reference only fails when it is retrieved.

use super::error::{StoreError, StoreResult};
use crate::{
    db::begin_write,
    models::{
        bucket::{quote_ident, validate_namespace},
        catalog::{BlobRef, CatalogEntry},
    },
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

const CATALOG_PREFIX: &str = "catalog.";

const ENTRY_COLUMNS: &str = "id, name, price, description, delivery, bucket, file_id";

#[derive(Clone)]
pub struct CatalogLinker {
    db: Arc<SqlitePool>,
}

impl CatalogLinker {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Check an entry before any state is written on its behalf.
    pub fn validate(category: &str, entry: &CatalogEntry) -> StoreResult<()> {
        validate_namespace("category", category).map_err(StoreError::InvalidInput)?;
        validate_namespace("bucket", &entry.image.bucket).map_err(StoreError::InvalidInput)?;
        if entry.id.trim().is_empty() {
            return Err(StoreError::invalid("catalog entry id must not be empty"));
        }
        if entry.name.trim().is_empty() {
            return Err(StoreError::invalid(format!(
                "catalog entry `{}` has an empty name",
                entry.id
            )));
        }
        Ok(())
    }

    /// Store `entry` under `category`, replacing an entry with the same id.
    pub async fn link(&self, category: &str, entry: &CatalogEntry) -> StoreResult<()> {
        let mut tx = begin_write(&self.db).await?;
        Self::link_in(&mut *tx, category, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    /// [`link`](Self::link) on a connection the caller owns, so the entry can
    /// commit or roll back together with other writes.
    pub(crate) async fn link_in(
        conn: &mut SqliteConnection,
        category: &str,
        entry: &CatalogEntry,
    ) -> StoreResult<()> {
        Self::validate(category, entry)?;
        let table = ensure_category(&mut *conn, category).await?;

        let sql = format!(
            "INSERT INTO {table} ({ENTRY_COLUMNS}, linked_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price = excluded.price,
                description = excluded.description,
                delivery = excluded.delivery,
                bucket = excluded.bucket,
                file_id = excluded.file_id,
                linked_at = excluded.linked_at"
        );
        sqlx::query(&sql)
            .bind(&entry.id)
            .bind(&entry.name)
            .bind(&entry.price)
            .bind(&entry.description)
            .bind(&entry.delivery)
            .bind(&entry.image.bucket)
            .bind(entry.image.file_id)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;

        debug!(category, id = %entry.id, image = %entry.image.url(), "linked catalog entry");
        Ok(())
    }

    pub async fn get_entry(&self, category: &str, human_id: &str) -> StoreResult<CatalogEntry> {
        let not_found = || StoreError::NotFound(format!("entry `{human_id}` in category `{category}`"));
        let Some(table) = existing_table(&*self.db, category).await? else {
            return Err(not_found());
        };
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM {table} WHERE id = ?");
        sqlx::query_as::<_, CatalogEntry>(&sql)
            .bind(human_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(not_found)
    }

    pub async fn resolve(&self, category: &str, human_id: &str) -> StoreResult<BlobRef> {
        Ok(self.get_entry(category, human_id).await?.image)
    }

    /// All entries of a category sorted by human id. Unknown categories are empty.
    pub async fn list_category(&self, category: &str) -> StoreResult<Vec<CatalogEntry>> {
        let Some(table) = existing_table(&*self.db, category).await? else {
            return Ok(Vec::new());
        };
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM {table} ORDER BY id ASC");
        let entries = sqlx::query_as::<_, CatalogEntry>(&sql)
            .fetch_all(&*self.db)
            .await?;
        Ok(entries)
    }

    /// Remove one entry. The referenced file is left untouched.
    pub async fn unlink(&self, category: &str, human_id: &str) -> StoreResult<()> {
        let not_found = || StoreError::NotFound(format!("entry `{human_id}` in category `{category}`"));
        let Some(table) = existing_table(&*self.db, category).await? else {
            return Err(not_found());
        };
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        let result = sqlx::query(&sql).bind(human_id).execute(&*self.db).await?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    /// Remove every entry, in any category, that references `blob`.
    pub async fn unlink_blob(&self, blob: &BlobRef) -> StoreResult<u64> {
        let mut removed = 0;
        for category in self.categories().await? {
            let sql = format!(
                "DELETE FROM {} WHERE bucket = ? AND file_id = ?",
                category_table(&category)
            );
            let result = sqlx::query(&sql)
                .bind(&blob.bucket)
                .bind(blob.file_id)
                .execute(&*self.db)
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Names of every category that has been linked into at least once.
    pub async fn categories(&self) -> StoreResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM categories ORDER BY name ASC")
            .fetch_all(&*self.db)
            .await?;
        Ok(names)
    }
}

fn category_table(category: &str) -> String {
    quote_ident(&format!("{CATALOG_PREFIX}{category}"))
}

/// Quoted table name for `category` if it is registered.
async fn existing_table<'e, E>(exec: E, category: &str) -> StoreResult<Option<String>>
where
    E: SqliteExecutor<'e>,
{
    validate_namespace("category", category).map_err(StoreError::InvalidInput)?;
    let exists: Option<String> = sqlx::query_scalar("SELECT name FROM categories WHERE name = ?")
        .bind(category)
        .fetch_optional(exec)
        .await?;
    Ok(exists.map(|name| category_table(&name)))
}

async fn ensure_category(conn: &mut SqliteConnection, category: &str) -> StoreResult<String> {
    if let Some(table) = existing_table(&mut *conn, category).await? {
        return Ok(table);
    }
    let table = category_table(category);
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            price       TEXT NOT NULL,
            description TEXT NOT NULL,
            delivery    TEXT NOT NULL,
            bucket      TEXT NOT NULL,
            file_id     BLOB NOT NULL,
            linked_at   TEXT NOT NULL
        )"
    ))
    .execute(&mut *conn)
    .await?;
    sqlx::query("INSERT INTO categories (name, created_at) VALUES (?, ?)")
        .bind(category)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    info!("Created category `{}`", category);
    Ok(table)
}
