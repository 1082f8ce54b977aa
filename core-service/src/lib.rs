//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (filesystem access,
//! pending counters, clock) into the library synchronization engine. Desktop
//! and server hosts typically enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) and call [`bootstrap_desktop`].

pub mod engine;
pub mod error;

pub use engine::{EngineDependencies, LibraryEngine, JOB_PURGE_INTERVAL, WATCH_LOCK_TTL};
pub use error::{CoreError, Result};

/// Convenience bootstrapper for hosts running on the local disk.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_runtime::EngineConfig;
/// use core_service::bootstrap_desktop;
///
/// let config = EngineConfig::builder()
///     .database_path("/var/lib/library/engine.db")
///     .media_location("/srv/media/upload")
///     .watch_enabled(true)
///     .build()?;
/// let engine = bootstrap_desktop(config).await?;
/// engine.start().await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(config: core_runtime::EngineConfig) -> Result<LibraryEngine> {
    use std::sync::Arc;

    use bridge_desktop::{SqliteCounterStore, TokioFileSystem};
    use bridge_traits::SystemClock;
    use core_library::db::{create_pool, DatabaseConfig};

    config.validate()?;
    let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
    let counters = SqliteCounterStore::with_pool(pool.clone())
        .await
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    let deps = EngineDependencies::new(
        Arc::new(TokioFileSystem::new()),
        Arc::new(counters),
        Arc::new(SystemClock),
    );
    LibraryEngine::with_pool(config, pool, deps).await
}
