//! Shared test utilities for hud integration tests.
//!
//! Every test gets its own SQLite database file inside a temporary
//! directory, with all migrations applied. The directory is removed when the
//! returned [`TestDb`] is dropped.

use sqlx::SqlitePool;
use tempfile::TempDir;

use hud_db::config::DbConfig;
use hud_db::pool;

/// A migrated, isolated database that lives as long as this value.
pub struct TestDb {
    pub pool: SqlitePool,
    /// Held to keep the database file alive.
    _dir: TempDir,
}

impl TestDb {
    /// Close the pool. The directory is removed on drop.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Create a temporary database with migrations applied.
pub async fn create_test_db() -> TestDb {
    let dir = tempfile::Builder::new()
        .prefix("hud_test_")
        .tempdir()
        .expect("failed to create temp directory");
    let config = DbConfig::for_path(&dir.path().join("hud.db"));

    let pool = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to open test database: {e:#}"));

    pool::run_migrations(&pool)
        .await
        .expect("migrations should succeed");

    TestDb { pool, _dir: dir }
}
