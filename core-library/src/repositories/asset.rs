//! Asset repository trait and implementation
//!
//! Assets are written by the file synchronizer and flipped online/offline by
//! the reconciler. Offline detection by import path and exclusion pattern is
//! evaluated inside SQLite as one `UPDATE`, never row by row.

use crate::error::{LibraryError, Result};
use crate::models::{Asset, AssetId, NewAsset, OfflineBuckets};
use crate::repositories::{dedup_normalized, push_in_list, DEFAULT_ASSET_CHUNK};
use async_trait::async_trait;
use bridge_traits::paths::normalize_path;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

/// Asset repository interface for data access operations
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Insert assets, ignoring checksums already present in the library
    ///
    /// # Returns
    /// Only the rows this call actually inserted
    async fn create_all(&self, assets: &[NewAsset], now: i64) -> Result<Vec<Asset>>;

    /// Normalized paths from `paths` with no asset in the directory
    async fn filter_new_paths_by_directory(
        &self,
        directory_id: &str,
        paths: &[String],
    ) -> Result<Vec<String>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Asset>>;

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Asset>>;

    /// Assets of a library whose fingerprint is in `checksums`
    async fn find_by_checksums(&self, library_id: &str, checksums: &[String])
        -> Result<Vec<Asset>>;

    /// Original paths of the directory's non-deleted assets
    async fn find_paths_by_directory(&self, directory_id: &str) -> Result<Vec<String>>;

    /// Non-deleted assets in the directory
    async fn count_by_directory(&self, directory_id: &str) -> Result<i64>;

    /// Take online assets of the directory offline when their path is outside
    /// every import path or matches an exclusion regex.
    ///
    /// # Returns
    /// Number of assets taken offline
    async fn detect_offline_by_directory(
        &self,
        directory_id: &str,
        import_paths: &[String],
        exclusion_regexes: &[String],
        now: i64,
    ) -> Result<u64>;

    /// Next page of non-deleted asset ids in the directory, ordered by id
    async fn page_ids_by_directory(
        &self,
        directory_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Next page of every asset id in the library, ordered by id
    async fn page_ids_by_library(
        &self,
        library_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Apply the four reconciliation buckets as four bulk updates
    async fn apply_offline_buckets(&self, buckets: &OfflineBuckets, now: i64) -> Result<u64>;

    /// Record fresh `(id, file_modified_at, file_size)` stat data
    async fn update_file_stats(&self, stats: &[(String, i64, i64)], now: i64) -> Result<u64>;

    /// Mark every asset of the library deleted
    async fn mark_deleted_by_library(&self, library_id: &str, now: i64) -> Result<u64>;

    /// Remove assets of the library by original path
    async fn remove_by_paths(&self, library_id: &str, paths: &[String]) -> Result<u64>;

    /// Remove one asset row
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite implementation of AssetRepository
pub struct SqliteAssetRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqliteAssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_ASSET_CHUNK,
        }
    }

    /// Rows per insert statement
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn update_ids(&self, set_clause: &str, ids: &[String], now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in ids.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE assets SET ");
            builder.push(set_clause);
            builder.push(", updated_at = ");
            builder.push_bind(now);
            builder.push(" WHERE id IN (");
            push_in_list(&mut builder, chunk);

            affected += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }
}

#[derive(Debug, FromRow)]
struct AssetRow {
    id: String,
    owner_id: String,
    library_id: String,
    directory_id: String,
    checksum: String,
    original_path: String,
    file_size: i64,
    file_modified_at: i64,
    is_offline: bool,
    status: String,
    deleted_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<AssetRow> for Asset {
    type Error = LibraryError;

    fn try_from(row: AssetRow) -> Result<Self> {
        Ok(Asset {
            status: row.status.parse()?,
            id: row.id,
            owner_id: row.owner_id,
            library_id: row.library_id,
            directory_id: row.directory_id,
            checksum: row.checksum,
            original_path: row.original_path,
            file_size: row.file_size,
            file_modified_at: row.file_modified_at,
            is_offline: row.is_offline,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ASSET_COLUMNS: &str = "id, owner_id, library_id, directory_id, checksum, original_path, \
                             file_size, file_modified_at, is_offline, status, deleted_at, \
                             created_at, updated_at";

fn into_assets(rows: Vec<AssetRow>) -> Result<Vec<Asset>> {
    rows.into_iter().map(Asset::try_from).collect()
}

/// `original_path` prefix that puts a file below `root`
fn import_prefix(root: &str) -> String {
    let root = normalize_path(root);
    if root.ends_with('/') {
        root
    } else {
        format!("{}/", root)
    }
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn create_all(&self, assets: &[NewAsset], now: i64) -> Result<Vec<Asset>> {
        let mut created = Vec::with_capacity(assets.len());

        for chunk in assets.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO assets \
                 (id, owner_id, library_id, directory_id, checksum, original_path, \
                  file_modified_at, file_size, is_offline, status, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, asset| {
                row.push_bind(AssetId::new().to_string())
                    .push_bind(asset.owner_id.clone())
                    .push_bind(asset.library_id.clone())
                    .push_bind(asset.directory_id.clone())
                    .push_bind(asset.checksum.clone())
                    .push_bind(asset.original_path.clone())
                    .push_bind(asset.file_modified_at)
                    .push_bind(asset.file_size)
                    .push("0")
                    .push("'active'")
                    .push(now)
                    .push(now);
            });
            builder.push(" RETURNING ");
            builder.push(ASSET_COLUMNS);

            let rows = builder
                .build_query_as::<AssetRow>()
                .fetch_all(&self.pool)
                .await?;

            debug!(
                requested = chunk.len(),
                inserted = rows.len(),
                "Inserted asset chunk"
            );
            created.extend(into_assets(rows)?);
        }

        Ok(created)
    }

    async fn filter_new_paths_by_directory(
        &self,
        directory_id: &str,
        paths: &[String],
    ) -> Result<Vec<String>> {
        let paths = dedup_normalized(paths);
        let mut existing = HashSet::new();

        for chunk in paths.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT original_path FROM assets WHERE directory_id = ",
            );
            builder.push_bind(directory_id.to_string());
            builder.push(" AND original_path IN (");
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

    async fn find_by_id(&self, id: &str) -> Result<Option<Asset>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {} FROM assets WHERE id = ?",
            ASSET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Asset::try_from).transpose()
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Asset>> {
        let mut found = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
            builder.push(ASSET_COLUMNS);
            builder.push(" FROM assets WHERE id IN (");
            push_in_list(&mut builder, chunk);

            let rows = builder
                .build_query_as::<AssetRow>()
                .fetch_all(&self.pool)
                .await?;
            found.extend(into_assets(rows)?);
        }

        Ok(found)
    }

    async fn find_by_checksums(
        &self,
        library_id: &str,
        checksums: &[String],
    ) -> Result<Vec<Asset>> {
        let mut found = Vec::new();

        for chunk in checksums.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
            builder.push(ASSET_COLUMNS);
            builder.push(" FROM assets WHERE library_id = ");
            builder.push_bind(library_id.to_string());
            builder.push(" AND checksum IN (");
            push_in_list(&mut builder, chunk);

            let rows = builder
                .build_query_as::<AssetRow>()
                .fetch_all(&self.pool)
                .await?;
            found.extend(into_assets(rows)?);
        }

        Ok(found)
    }

    async fn find_paths_by_directory(&self, directory_id: &str) -> Result<Vec<String>> {
        let paths = sqlx::query_scalar::<_, String>(
            "SELECT original_path FROM assets WHERE directory_id = ? AND status != 'deleted' \
             ORDER BY original_path ASC",
        )
        .bind(directory_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    async fn count_by_directory(&self, directory_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM assets WHERE directory_id = ? AND status != 'deleted'",
        )
        .bind(directory_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn detect_offline_by_directory(
        &self,
        directory_id: &str,
        import_paths: &[String],
        exclusion_regexes: &[String],
        now: i64,
    ) -> Result<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "UPDATE assets SET is_offline = 1, \
             deleted_at = CASE WHEN status = 'trashed' THEN deleted_at ELSE ",
        );
        builder.push_bind(now);
        builder.push(" END, updated_at = ");
        builder.push_bind(now);
        builder.push(" WHERE directory_id = ");
        builder.push_bind(directory_id.to_string());
        builder.push(" AND is_offline = 0 AND status != 'deleted' AND (NOT (0");

        for root in import_paths {
            let prefix = import_prefix(root);
            builder.push(" OR original_path = ");
            builder.push_bind(normalize_path(root));
            builder.push(" OR substr(original_path, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix);
        }
        builder.push(")");

        for regex in exclusion_regexes {
            builder.push(" OR original_path REGEXP ");
            builder.push_bind(regex.clone());
        }
        builder.push(")");

        let affected = builder.build().execute(&self.pool).await?.rows_affected();
        debug!(directory_id, affected, "Bulk offline detection finished");
        Ok(affected)
    }

    async fn page_ids_by_directory(
        &self,
        directory_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM assets
            WHERE directory_id = ? AND status != 'deleted' AND (? IS NULL OR id > ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(directory_id)
        .bind(after)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn page_ids_by_library(
        &self,
        library_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM assets
            WHERE library_id = ? AND (? IS NULL OR id > ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(library_id)
        .bind(after)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn apply_offline_buckets(&self, buckets: &OfflineBuckets, now: i64) -> Result<u64> {
        let mut affected = 0;

        if !buckets.offline.is_empty() {
            let set = format!("is_offline = 1, deleted_at = {}", now);
            affected += self.update_ids(&set, &buckets.offline, now).await?;
        }
        if !buckets.offline_trashed.is_empty() {
            affected += self
                .update_ids("is_offline = 1", &buckets.offline_trashed, now)
                .await?;
        }
        if !buckets.online.is_empty() {
            affected += self
                .update_ids("is_offline = 0, deleted_at = NULL", &buckets.online, now)
                .await?;
        }
        if !buckets.online_trashed.is_empty() {
            affected += self
                .update_ids("is_offline = 0", &buckets.online_trashed, now)
                .await?;
        }

        Ok(affected)
    }

    async fn update_file_stats(&self, stats: &[(String, i64, i64)], now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for (id, modified_at, size) in stats {
            affected += sqlx::query(
                "UPDATE assets SET file_modified_at = ?, file_size = ?, updated_at = ? WHERE id = ?",
            )
            .bind(modified_at)
            .bind(size)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn mark_deleted_by_library(&self, library_id: &str, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE assets SET status = 'deleted', deleted_at = ?, updated_at = ? \
             WHERE library_id = ? AND status != 'deleted'",
        )
        .bind(now)
        .bind(now)
        .bind(library_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn remove_by_paths(&self, library_id: &str, paths: &[String]) -> Result<u64> {
        let paths = dedup_normalized(paths);
        let mut affected = 0;

        for chunk in paths.chunks(self.chunk_size) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM assets WHERE library_id = ");
            builder.push_bind(library_id.to_string());
            builder.push(" AND original_path IN (");
            push_in_list(&mut builder, chunk);

            affected += builder.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(affected)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
