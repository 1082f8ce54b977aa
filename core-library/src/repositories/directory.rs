//! Directory repository trait and implementation
//!
//! Every write here is set-based: chunked insert-or-ignore on
//! `(library_id, path)` and updates by id list. Two workers processing
//! overlapping pages after a forced rescan therefore converge on the same rows.

use crate::error::{LibraryError, Result};
use crate::models::{Directory, DirectoryId, DirectoryStatus};
use crate::repositories::{dedup_normalized, push_in_list, DEFAULT_DIRECTORY_CHUNK};
use async_trait::async_trait;
use bridge_traits::paths::normalize_path;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

/// Directory repository interface for data access operations
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    /// Insert directories in `added` status, ignoring paths that already exist
    ///
    /// # Returns
    /// Only the rows this call actually inserted
    async fn create_all(
        &self,
        library_id: &str,
        owner_id: &str,
        paths: &[String],
        now: i64,
    ) -> Result<Vec<Directory>>;

    /// Normalized paths from `paths` not yet registered for the library
    async fn filter_new_paths(&self, library_id: &str, paths: &[String]) -> Result<Vec<String>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Directory>>;

    async fn find_by_path(&self, library_id: &str, path: &str) -> Result<Option<Directory>>;

    async fn find_by_paths(&self, library_id: &str, paths: &[String]) -> Result<Vec<Directory>>;

    /// Live directories of a library in any of `statuses`
    async fn find_by_status(
        &self,
        library_id: &str,
        statuses: &[DirectoryStatus],
    ) -> Result<Vec<Directory>>;

    /// Set the status of every listed directory
    async fn update_status(&self, ids: &[String], status: DirectoryStatus, now: i64)
        -> Result<u64>;

    async fn set_offline(&self, id: &str, is_offline: bool, now: i64) -> Result<()>;

    /// Owner-controlled visibility; `Ok(false)` when no live row has the id
    async fn set_hidden(&self, id: &str, is_hidden: bool, now: i64) -> Result<bool>;

    /// Link an album unless one is linked already
    ///
    /// # Returns
    /// `Ok(true)` when this call set the link
    async fn link_album(&self, id: &str, album_id: &str, now: i64) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite implementation of DirectoryRepository
pub struct SqliteDirectoryRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqliteDirectoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_DIRECTORY_CHUNK,
        }
    }

    /// Rows per insert statement
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[derive(Debug, FromRow)]
struct DirectoryRow {
    id: String,
    library_id: String,
    owner_id: String,
    path: String,
    status: String,
    is_offline: bool,
    is_hidden: bool,
    album_id: Option<String>,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl TryFrom<DirectoryRow> for Directory {
    type Error = LibraryError;

    fn try_from(row: DirectoryRow) -> Result<Self> {
        Ok(Directory {
            status: row.status.parse()?,
            id: row.id,
            library_id: row.library_id,
            owner_id: row.owner_id,
            path: row.path,
            is_offline: row.is_offline,
            is_hidden: row.is_hidden,
            album_id: row.album_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

const DIRECTORY_COLUMNS: &str = "id, library_id, owner_id, path, status, is_offline, is_hidden, \
                                 album_id, created_at, updated_at, deleted_at";

fn into_directories(rows: Vec<DirectoryRow>) -> Result<Vec<Directory>> {
    rows.into_iter().map(Directory::try_from).collect()
}

#[async_trait]
impl DirectoryRepository for SqliteDirectoryRepository {
    async fn create_all(
        &self,
        library_id: &str,
        owner_id: &str,
        paths: &[String],
        now: i64,
    ) -> Result<Vec<Directory>> {
        let paths = dedup_normalized(paths);
        let mut created = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO directories \
                 (id, library_id, owner_id, path, status, is_offline, is_hidden, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, path| {
                row.push_bind(DirectoryId::new().to_string())
                    .push_bind(library_id.to_string())
                    .push_bind(owner_id.to_string())
                    .push_bind(path.clone())
                    .push("'added'")
                    .push("0")
                    .push("0")
                    .push(now)
                    .push(now);
            });
            builder.push(" RETURNING ");
            builder.push(DIRECTORY_COLUMNS);

            let rows = builder
                .build_query_as::<DirectoryRow>()
                .fetch_all(&self.pool)
                .await?;

            debug!(
                library_id,
                requested = chunk.len(),
                inserted = rows.len(),
                "Inserted directory chunk"
            );
            created.extend(into_directories(rows)?);
        }

        Ok(created)
    }

    async fn filter_new_paths(&self, library_id: &str, paths: &[String]) -> Result<Vec<String>> {
        let paths = dedup_normalized(paths);
        let mut existing = HashSet::new();

        for chunk in paths.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT path FROM directories WHERE library_id = ",
            );
            builder.push_bind(library_id.to_string());
            builder.push(" AND path IN (");
            push_in_list(&mut builder, chunk);

            let found: Vec<String> = builder
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await?;
            existing.extend(found);
        }

        Ok(paths
            .into_iter()
            .filter(|path| !existing.contains(path))
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Directory>> {
        let row = sqlx::query_as::<_, DirectoryRow>(&format!(
            "SELECT {} FROM directories WHERE id = ?",
            DIRECTORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Directory::try_from).transpose()
    }

    async fn find_by_path(&self, library_id: &str, path: &str) -> Result<Option<Directory>> {
        let row = sqlx::query_as::<_, DirectoryRow>(&format!(
            "SELECT {} FROM directories WHERE library_id = ? AND path = ?",
            DIRECTORY_COLUMNS
        ))
        .bind(library_id)
        .bind(normalize_path(path))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Directory::try_from).transpose()
    }

    async fn find_by_paths(&self, library_id: &str, paths: &[String]) -> Result<Vec<Directory>> {
        let paths = dedup_normalized(paths);
        let mut found = Vec::new();

        for chunk in paths.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
            builder.push(DIRECTORY_COLUMNS);
            builder.push(" FROM directories WHERE library_id = ");
            builder.push_bind(library_id.to_string());
            builder.push(" AND path IN (");
            push_in_list(&mut builder, chunk);

            let rows = builder
                .build_query_as::<DirectoryRow>()
                .fetch_all(&self.pool)
                .await?;
            found.extend(into_directories(rows)?);
        }

        Ok(found)
    }

    async fn find_by_status(
        &self,
        library_id: &str,
        statuses: &[DirectoryStatus],
    ) -> Result<Vec<Directory>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        builder.push(DIRECTORY_COLUMNS);
        builder.push(" FROM directories WHERE deleted_at IS NULL AND library_id = ");
        builder.push_bind(library_id.to_string());
        builder.push(" AND status IN (");
        push_in_list(&mut builder, &statuses);
        builder.push(" ORDER BY path ASC");

        let rows = builder
            .build_query_as::<DirectoryRow>()
            .fetch_all(&self.pool)
            .await?;
        into_directories(rows)
    }

    async fn update_status(
        &self,
        ids: &[String],
        status: DirectoryStatus,
        now: i64,
    ) -> Result<u64> {
        let mut affected = 0;

        for chunk in ids.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE directories SET status = ");
            builder.push_bind(status.as_str());
            builder.push(", updated_at = ");
            builder.push_bind(now);
            builder.push(" WHERE id IN (");
            push_in_list(&mut builder, chunk);

            affected += builder.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(affected)
    }

    async fn set_offline(&self, id: &str, is_offline: bool, now: i64) -> Result<()> {
        sqlx::query("UPDATE directories SET is_offline = ?, updated_at = ? WHERE id = ?")
            .bind(is_offline)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_hidden(&self, id: &str, is_hidden: bool, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE directories SET is_hidden = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(is_hidden)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn link_album(&self, id: &str, album_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE directories SET album_id = ?, updated_at = ? WHERE id = ? AND album_id IS NULL",
        )
        .bind(album_id)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM directories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
