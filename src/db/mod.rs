pub mod queue;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::QueueError;

/// Handle to the durable queue. Cheap to clone; every clone shares the same
/// connection pool.
#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    /// Synchronous capability check: can a durable store be opened at `url`
    /// in this environment?
    pub fn is_supported(url: &str) -> bool {
        let Ok(options) = SqliteConnectOptions::from_str(url) else {
            return false;
        };

        if is_in_memory(url) {
            return true;
        }

        let parent = match options.get_filename().parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        match std::fs::metadata(&parent) {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    /// Open the store and bring its schema up to date. Safe to call more than
    /// once for the same location.
    pub async fn init(url: &str) -> Result<Self, QueueError> {
        if !Self::is_supported(url) {
            return Err(QueueError::StoreUnavailable(format!(
                "no durable storage available at {url}"
            )));
        }

        let in_memory = is_in_memory(url);
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to an in-memory database is its own database, so
        // keep exactly one alive for the lifetime of the pool.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            // A concurrent init may have applied the same version first.
            tracing::debug!("Retrying queue migrations after: {e}");
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        tracing::debug!("Queue store ready at {url}");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
