use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{ResultExt, ensure};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::{mpsc, oneshot};

use super::KeyValueStore;
use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageResult, UnsupportedLocationSnafu,
};

type Reply<T> = std_mpsc::SyncSender<StorageResult<T>>;

enum StorageCommand {
    Get {
        key: String,
        reply: Reply<Option<String>>,
    },
    Set {
        key: String,
        value: String,
        reply: Reply<()>,
    },
}

/// Key-value table in a single SQLite file.
///
/// One worker thread owns the pool and a current-thread runtime for the lifetime of
/// the store. The sync port hands it commands over a channel and waits for the reply.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    commands: mpsc::UnboundedSender<StorageCommand>,
    database_url: String,
}

impl std::fmt::Debug for StorageCommand {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get { key, .. } => formatter.debug_struct("Get").field("key", key).finish(),
            Self::Set { key, .. } => formatter.debug_struct("Set").field("key", key).finish(),
        }
    }
}

impl SqliteKeyValueStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure!(
            !is_in_memory_location(database_location),
            UnsupportedLocationSnafu {
                stage: "sqlite-open-check-location",
                location: database_location.to_string(),
                reason: "in-memory databases do not outlive a connection; use MemoryStore",
            }
        );
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker_url = database_url.clone();
        std::thread::Builder::new()
            .name("sqlite-kv".to_string())
            .spawn(move || run_storage_worker(worker_url, command_rx, ready_tx))
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-kv-spawn-worker",
            })?;

        match ready_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return InvariantViolationSnafu {
                    stage: "sqlite-open-await-worker",
                    details: "sqlite storage worker exited before opening".to_string(),
                }
                .fail();
            }
        }

        tracing::debug!(database_url = %database_url, "opened sqlite key-value store");
        Ok(Self {
            commands: command_tx,
            database_url,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn request<T>(
        &self,
        stage: &'static str,
        command: impl FnOnce(Reply<T>) -> StorageCommand,
    ) -> StorageResult<T> {
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        if self.commands.send(command(reply_tx)).is_err() {
            return InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker is gone".to_string(),
            }
            .fail();
        }

        match reply_rx.recv() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker dropped the reply".to_string(),
            }
            .fail(),
        }
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.request("kv-get", |reply| StorageCommand::Get { key, reply })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.request("kv-set", |reply| StorageCommand::Set { key, value, reply })
    }
}

fn run_storage_worker(
    database_url: String,
    mut commands: mpsc::UnboundedReceiver<StorageCommand>,
    ready_tx: oneshot::Sender<StorageResult<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(SqliteRuntimeInitSnafu {
            stage: "sqlite-kv-runtime-build",
        }) {
        Ok(runtime) => runtime,
        Err(error) => {
            let _ = ready_tx.send(Err(error));
            return;
        }
    };

    runtime.block_on(async move {
        let pool = match connect_pool(&database_url).await {
            Ok(pool) => pool,
            Err(error) => {
                let _ = ready_tx.send(Err(error));
                return;
            }
        };
        if ready_tx.send(Ok(())).is_err() {
            pool.close().await;
            return;
        }

        // Runs until every store handle is dropped.
        while let Some(command) = commands.recv().await {
            match command {
                StorageCommand::Get { key, reply } => {
                    let _ = reply.send(read_value(&pool, key).await);
                }
                StorageCommand::Set { key, value, reply } => {
                    let _ = reply.send(write_value(&pool, key, value).await);
                }
            }
        }

        pool.close().await;
        tracing::debug!(database_url = %database_url, "closed sqlite key-value store");
    });
}

async fn connect_pool(database_url: &str) -> StorageResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)
        .context(SqliteConnectOptionsSnafu {
            stage: "sqlite-open-parse-url",
            database_url: database_url.to_string(),
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5_000));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .context(SqliteConnectSnafu {
            stage: "sqlite-open-connect",
            database_url: database_url.to_string(),
        })?;

    let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
        .fetch_one(&pool)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-open-pragma-journal-mode",
            pragma: "journal_mode",
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context(SqliteMigrateSnafu {
            stage: "sqlite-open-migrate",
        })?;

    Ok(pool)
}

async fn read_value(pool: &SqlitePool, key: String) -> StorageResult<Option<String>> {
    sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "kv-get-query",
        })
}

async fn write_value(pool: &SqlitePool, key: String, value: String) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(unix_timestamp_seconds())
    .execute(pool)
    .await
    .context(SqliteQuerySnafu {
        stage: "kv-set-upsert",
    })?;
    Ok(())
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn is_in_memory_location(database_location: &str) -> bool {
    let location = database_location.trim();
    location.contains(":memory:") || location.contains("mode=memory")
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}
