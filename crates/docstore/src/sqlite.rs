//! SQLite backend.
//!
//! Reads go through a regular pool; every batch runs on a single-connection write
//! pool inside `BEGIN IMMEDIATE`, so read-modify-write transforms (array union,
//! array remove, preconditions) are serialized against each other.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::random;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::debug;

use crate::DocumentStore;
use crate::batch::{Staged, WriteBatch};
use crate::change::{ChangeFeed, DocumentChange};
use crate::document::{Document, Fields};
use crate::error::{Result, StoreError};
use crate::path::{CollectionPath, DocumentPath};
use crate::query::Query;

/// Connection pool type alias.
pub type DbPool = Pool<Sqlite>;

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

const SQLITE_BUSY_MAX_RETRIES: usize = 12;
const SQLITE_BUSY_BASE_DELAY_MS: u64 = 10;
const SQLITE_BUSY_MAX_DELAY_MS: u64 = 2000;

#[derive(sqlx::FromRow)]
struct DocumentRow {
    path: String,
    data: String,
    create_time: String,
    update_time: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let path = DocumentPath::parse(self.path)?;
        let fields: Fields = serde_json::from_str(&self.data)
            .map_err(|e| StoreError::corrupt(path.as_str(), e.to_string()))?;
        let create_time = parse_row_time(&path, &self.create_time)?;
        let update_time = parse_row_time(&path, &self.update_time)?;
        Ok(Document {
            path,
            fields,
            create_time,
            update_time,
        })
    }
}

fn parse_row_time(path: &DocumentPath, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(path.as_str(), format!("bad timestamp '{}': {}", raw, e)))
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(true))
}

fn is_sqlite_busy_error(err: &StoreError) -> bool {
    let StoreError::Sqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        let msg = sqlx_err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    if matches!(db_err.code().as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_sqlite_busy_error(&err) || attempt >= SQLITE_BUSY_MAX_RETRIES {
                    return Err(err);
                }

                let exp_backoff_ms = SQLITE_BUSY_BASE_DELAY_MS.saturating_mul(1u64 << attempt);
                let capped_ms = exp_backoff_ms.min(SQLITE_BUSY_MAX_DELAY_MS);
                let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
                let delay =
                    Duration::from_millis((capped_ms + jitter_ms).min(SQLITE_BUSY_MAX_DELAY_MS));

                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    SQLITE_BUSY_MAX_RETRIES
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// A manual `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// Taking the write lock up front avoids deadlocks from deferred transactions
/// upgrading to writers. Dropping it unfinished closes the connection.
struct ImmediateTransaction {
    conn: sqlx::pool::PoolConnection<Sqlite>,
    finished: bool,
}

impl ImmediateTransaction {
    async fn begin(pool: &DbPool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    async fn commit(mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.conn
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}

/// Document store persisted in SQLite.
pub struct SqliteStore {
    read_pool: DbPool,
    write_pool: DbPool,
    feed: ChangeFeed,
}

impl SqliteStore {
    /// Open (creating if needed) the database and run migrations.
    ///
    /// # Arguments
    /// * `database_url` - SQLite URL such as `sqlite:push-relay.db?mode=rwc`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let read_pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_POOL_SIZE)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options(database_url)?)
            .await?;

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(connect_options(database_url)?)
            .await?;

        let store = Self::from_pools(read_pool, write_pool);
        store.run_migrations().await?;

        tracing::info!(
            "Document store opened with {} read connections and a serialized write pool",
            DEFAULT_POOL_SIZE
        );
        Ok(store)
    }

    /// Build a store over existing pools. Migrations are not run.
    pub fn from_pools(read_pool: DbPool, write_pool: DbPool) -> Self {
        Self {
            read_pool,
            write_pool,
            feed: ChangeFeed::default(),
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        tracing::info!("Running document store migrations...");
        sqlx::migrate!("./migrations").run(&self.write_pool).await?;
        tracing::info!("Document store migrations completed");
        Ok(())
    }

    async fn load_row(conn: &mut SqliteConnection, path: &DocumentPath) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT path, data, create_time, update_time FROM documents WHERE path = ?",
        )
        .bind(path.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn commit_once(&self, batch: &WriteBatch) -> Result<Vec<DocumentChange>> {
        let mut tx = ImmediateTransaction::begin(&self.write_pool).await?;
        match Self::apply_batch(tx.conn(), batch).await {
            Ok(changes) => {
                tx.commit().await?;
                Ok(changes)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back document batch");
                }
                Err(e)
            }
        }
    }

    async fn apply_batch(
        conn: &mut SqliteConnection,
        batch: &WriteBatch,
    ) -> Result<Vec<DocumentChange>> {
        let mut staged = Staged::new(Utc::now());

        for op in batch.ops() {
            let path = op.path();
            if !staged.is_loaded(path) {
                let current = Self::load_row(conn, path).await?;
                staged.load(path.clone(), current);
            }
            staged.apply(op)?;
        }

        for (path, after) in staged.writes() {
            match after {
                Some(doc) => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (path, parent, data, create_time, update_time)
                        VALUES (?, ?, ?, ?, ?)
                        ON CONFLICT(path) DO UPDATE SET
                            data = excluded.data,
                            update_time = excluded.update_time
                        "#,
                    )
                    .bind(path.as_str())
                    .bind(path.parent().as_str())
                    .bind(serde_json::to_string(&doc.fields)?)
                    .bind(doc.create_time.to_rfc3339())
                    .bind(doc.update_time.to_rfc3339())
                    .execute(&mut *conn)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM documents WHERE path = ?")
                        .bind(path.as_str())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }

        Ok(staged.into_changes())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT path, data, create_time, update_time FROM documents WHERE path = ?",
        )
        .bind(path.as_str())
        .fetch_optional(&self.read_pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT path, data, create_time, update_time FROM documents WHERE parent = ? ORDER BY path",
        )
        .bind(collection.as_str())
        .fetch_all(&self.read_pool)
        .await?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .list(query.collection())
            .await?
            .into_iter()
            .filter(|doc| query.matches(&doc.fields))
            .collect();
        if let Some(limit) = query.max_results() {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let batch = &batch;
        let changes = retry_on_sqlite_busy("commit", || self.commit_once(batch)).await?;
        self.feed.publish(changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.feed.subscribe()
    }
}
