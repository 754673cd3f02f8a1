pub mod models;
pub mod repository;

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

pub use models::*;
pub use repository::{CredentialRepository, LinkStateRepository, SlotDraftRepository};

/// Shared handle to the backing pool.
///
/// The pool slot is empty until the first successful connection; every store built on
/// top of it fails closed while it is empty.
#[derive(Clone, Default)]
pub struct Database {
    pool: Arc<RwLock<Option<SqlitePool>>>,
}

impl Database {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(RwLock::new(Some(pool))),
        }
    }

    /// Current pool, if connected.
    pub async fn pool(&self) -> Option<SqlitePool> {
        self.pool.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    pub async fn attach(&self, pool: SqlitePool) {
        *self.pool.write().await = Some(pool);
    }

    /// Drop the current pool; returns it so the caller can close it.
    pub async fn detach(&self) -> Option<SqlitePool> {
        self.pool.write().await.take()
    }
}

/// In-memory pool with migrations applied, one connection so every query sees the same database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}
