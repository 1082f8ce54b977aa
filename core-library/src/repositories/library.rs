//! Library repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Library, LibraryStatistics};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

/// Library repository interface for data access operations
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Insert a new library
    ///
    /// # Errors
    /// Returns error if validation fails or the id already exists
    async fn insert(&self, library: &Library) -> Result<()>;

    /// Persist name, import paths and exclusion patterns
    ///
    /// # Errors
    /// Returns `NotFound` if the library does not exist
    async fn update(&self, library: &Library) -> Result<()>;

    /// Find a library by its ID, soft-deleted ones included
    async fn find_by_id(&self, id: &str) -> Result<Option<Library>>;

    /// All libraries, oldest first
    async fn find_all(&self, include_deleted: bool) -> Result<Vec<Library>>;

    /// Libraries waiting for hard deletion
    async fn find_soft_deleted(&self) -> Result<Vec<Library>>;

    /// Stamp the end of a directory crawl
    async fn set_refreshed_at(&self, id: &str, refreshed_at: i64) -> Result<()>;

    /// Mark deleted without removing any row
    ///
    /// # Returns
    /// `Ok(false)` if the library was missing or already soft-deleted
    async fn soft_delete(&self, id: &str, deleted_at: i64) -> Result<bool>;

    /// Remove the library row; directories and assets cascade
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Directory and asset counts, `None` for an unknown library
    async fn statistics(&self, id: &str) -> Result<Option<LibraryStatistics>>;
}

/// SQLite implementation of LibraryRepository
pub struct SqliteLibraryRepository {
    pool: SqlitePool,
}

impl SqliteLibraryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn validate(library: &Library) -> Result<()> {
        library.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "Library".to_string(),
            message: msg,
        })
    }

    fn encode_list(values: &[String]) -> Result<String> {
        serde_json::to_string(values).map_err(|e| LibraryError::InvalidInput {
            field: "Library".to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, FromRow)]
struct LibraryRow {
    id: String,
    owner_id: String,
    name: String,
    import_paths: String,
    exclusion_patterns: String,
    created_at: i64,
    updated_at: i64,
    refreshed_at: Option<i64>,
    deleted_at: Option<i64>,
}

impl TryFrom<LibraryRow> for Library {
    type Error = LibraryError;

    fn try_from(row: LibraryRow) -> Result<Self> {
        let decode = |field: &str, raw: &str| -> Result<Vec<String>> {
            serde_json::from_str(raw).map_err(|e| LibraryError::InvalidInput {
                field: field.to_string(),
                message: format!("Corrupt list for library {}: {}", row.id, e),
            })
        };

        Ok(Library {
            import_paths: decode("import_paths", &row.import_paths)?,
            exclusion_patterns: decode("exclusion_patterns", &row.exclusion_patterns)?,
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            refreshed_at: row.refreshed_at,
            deleted_at: row.deleted_at,
        })
    }
}

const SELECT_LIBRARY: &str = r#"
    SELECT id, owner_id, name, import_paths, exclusion_patterns,
           created_at, updated_at, refreshed_at, deleted_at
    FROM libraries
"#;

#[async_trait]
impl LibraryRepository for SqliteLibraryRepository {
    async fn insert(&self, library: &Library) -> Result<()> {
        Self::validate(library)?;

        sqlx::query(
            r#"
            INSERT INTO libraries (
                id, owner_id, name, import_paths, exclusion_patterns,
                created_at, updated_at, refreshed_at, deleted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&library.id)
        .bind(&library.owner_id)
        .bind(&library.name)
        .bind(Self::encode_list(&library.import_paths)?)
        .bind(Self::encode_list(&library.exclusion_patterns)?)
        .bind(library.created_at)
        .bind(library.updated_at)
        .bind(library.refreshed_at)
        .bind(library.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, library: &Library) -> Result<()> {
        Self::validate(library)?;

        let result = sqlx::query(
            r#"
            UPDATE libraries
            SET name = ?, import_paths = ?, exclusion_patterns = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&library.name)
        .bind(Self::encode_list(&library.import_paths)?)
        .bind(Self::encode_list(&library.exclusion_patterns)?)
        .bind(library.updated_at)
        .bind(&library.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("Library", &library.id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Library>> {
        let row = sqlx::query_as::<_, LibraryRow>(&format!("{} WHERE id = ?", SELECT_LIBRARY))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Library::try_from).transpose()
    }

    async fn find_all(&self, include_deleted: bool) -> Result<Vec<Library>> {
        let sql = if include_deleted {
            format!("{} ORDER BY created_at ASC", SELECT_LIBRARY)
        } else {
            format!("{} WHERE deleted_at IS NULL ORDER BY created_at ASC", SELECT_LIBRARY)
        };

        let rows = sqlx::query_as::<_, LibraryRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Library::try_from).collect()
    }

    async fn find_soft_deleted(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, LibraryRow>(&format!(
            "{} WHERE deleted_at IS NOT NULL ORDER BY deleted_at ASC",
            SELECT_LIBRARY
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Library::try_from).collect()
    }

    async fn set_refreshed_at(&self, id: &str, refreshed_at: i64) -> Result<()> {
        sqlx::query("UPDATE libraries SET refreshed_at = ?, updated_at = ? WHERE id = ?")
            .bind(refreshed_at)
            .bind(refreshed_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete(&self, id: &str, deleted_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE libraries SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(deleted_at)
        .bind(deleted_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM libraries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn statistics(&self, id: &str) -> Result<Option<LibraryStatistics>> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM libraries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let (directories, offline_directories): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(is_offline), 0)
            FROM directories
            WHERE library_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let (assets, offline_assets): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(is_offline), 0)
            FROM assets
            WHERE library_id = ? AND status != 'deleted'
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(LibraryStatistics {
            directories,
            offline_directories,
            assets,
            online_assets: assets - offline_assets,
            offline_assets,
        }))
    }
}
