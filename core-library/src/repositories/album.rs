//! Album repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::Album;
use crate::repositories::DEFAULT_DIRECTORY_CHUNK;
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

/// Album repository interface for data access operations
#[async_trait]
pub trait AlbumRepository: Send + Sync {
    /// Insert an album together with its initial assets
    async fn create(&self, album: &Album, asset_ids: &[String]) -> Result<()>;

    /// Add assets to an album, ignoring ones already in it
    ///
    /// # Returns
    /// Number of assets newly added
    async fn add_assets(&self, album_id: &str, asset_ids: &[String], now: i64) -> Result<u64>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Album>>;

    /// Asset ids of an album in insertion order
    async fn asset_ids(&self, album_id: &str) -> Result<Vec<String>>;

    /// Remove an album; its memberships cascade
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite implementation of AlbumRepository
pub struct SqliteAlbumRepository {
    pool: SqlitePool,
}

impl SqliteAlbumRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_members(
        conn: &mut SqliteConnection,
        album_id: &str,
        asset_ids: &[String],
        now: i64,
    ) -> Result<u64> {
        let mut affected = 0;

        // 2 bound parameters per row
        for chunk in asset_ids.chunks(DEFAULT_DIRECTORY_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO album_assets (album_id, asset_id, created_at) ",
            );
            builder.push_values(chunk, |mut row, asset_id| {
                row.push_bind(album_id.to_string())
                    .push_bind(asset_id.clone())
                    .push(now);
            });

            affected += builder.build().execute(&mut *conn).await?.rows_affected();
        }

        Ok(affected)
    }
}

#[derive(Debug, FromRow)]
struct AlbumRow {
    id: String,
    owner_id: String,
    name: String,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<AlbumRow> for Album {
    fn from(row: AlbumRow) -> Self {
        Album {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl AlbumRepository for SqliteAlbumRepository {
    async fn create(&self, album: &Album, asset_ids: &[String]) -> Result<()> {
        if album.name.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "Album".to_string(),
                message: "Album name cannot be empty".to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO albums (id, owner_id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&album.id)
        .bind(&album.owner_id)
        .bind(&album.name)
        .bind(&album.description)
        .bind(album.created_at)
        .bind(album.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_members(&mut tx, &album.id, asset_ids, album.created_at).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn add_assets(&self, album_id: &str, asset_ids: &[String], now: i64) -> Result<u64> {
        if asset_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        let added = Self::insert_members(&mut conn, album_id, asset_ids, now).await?;

        sqlx::query("UPDATE albums SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(album_id)
            .execute(&mut *conn)
            .await?;

        Ok(added)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Album>> {
        let row = sqlx::query_as::<_, AlbumRow>(
            "SELECT id, owner_id, name, description, created_at, updated_at FROM albums WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Album::from))
    }

    async fn asset_ids(&self, album_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT asset_id FROM album_assets WHERE album_id = ? ORDER BY created_at, rowid",
        )
        .bind(album_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM albums WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
