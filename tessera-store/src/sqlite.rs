// SPDX-License-Identifier: MIT OR Apache-2.0

use std::str::FromStr;
use std::sync::Arc;

use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, migrate};
use tessera_core::{AclKeyError, ParseError};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Create SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<(), SqliteError> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?
    }
    Ok(())
}

/// Drop SQLite database if it exists.
pub async fn drop_database(url: &str) -> Result<(), SqliteError> {
    if Sqlite::database_exists(url).await? {
        Sqlite::drop_database(url).await?
    }
    Ok(())
}

/// Get migrations from folder without running them.
pub fn migrations() -> Migrator {
    migrate!()
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &sqlx::SqlitePool) -> Result<(), SqliteError> {
    migrations().run(pool).await?;
    Ok(())
}

pub struct SqliteStoreBuilder {
    url: String,
    max_connections: u32,
    run_migrations: bool,
    create_database: bool,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 16,
            create_database: true,
            run_migrations: true,
        }
    }
}

impl SqliteStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn random_memory_url(mut self) -> Self {
        // Combining Rust tests with in-memory databases can lead to unsound behaviour, this
        // "workaround" assigns every temporary database a different, random name and keeps them
        // isolated from other tests.
        //
        // See related issue: https://github.com/launchbadge/sqlx/issues/2510
        self.url = format!(
            "sqlite://dbmem{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn run_default_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    pub async fn build(self) -> Result<SqliteStore, SqliteError> {
        if self.create_database {
            create_database(&self.url).await?;
        }

        let pool: sqlx::SqlitePool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;

        if self.run_migrations {
            debug!(url = %self.url, "run pending migrations");
            run_pending_migrations(&pool).await?;
        }

        Ok(SqliteStore::new(pool))
    }
}

pub(crate) type Transaction = sqlx::Transaction<'static, Sqlite>;

/// SQLite database with connection pool.
///
/// This struct can be cloned and used in multiple places in the application. Every cloned instance
/// will re-use the same connection pool and the same write permit.
///
/// SQLite strictly serializes transactions with _writes_. We make this explicit: every mutation
/// acquires the single write permit before it begins its transaction and holds it until the
/// transaction was committed or rolled back. This turns every read-modify-write (for example
/// `update_ace`) into an atomic operation with respect to all other writers sharing this store.
///
/// Reads do not acquire the permit and are executed directly against the pool, they observe the
/// last committed state.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) pool: sqlx::SqlitePool,
    semaphore: Arc<Semaphore>,
}

impl SqliteStore {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool,
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Shortcut building an in-memory SQLite database with a randomised name for testing purposes.
    #[cfg(any(test, feature = "test_utils"))]
    pub async fn temporary() -> Self {
        SqliteStoreBuilder::new()
            .random_memory_url()
            .max_connections(1)
            .build()
            .await
            .expect("migrations succeeded")
    }

    /// Acquire the write permit and begin a transaction.
    ///
    /// Dropping the returned transaction without committing rolls it back and frees the permit.
    pub(crate) async fn begin_write(&self) -> Result<WriteTransaction, SqliteError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("if semaphore is closed then the whole struct is gone as well");
        let tx = self.pool.begin().await?;
        Ok(WriteTransaction { tx, _permit: permit })
    }
}

/// Transaction holding the write permit of a `SqliteStore`.
pub(crate) struct WriteTransaction {
    pub(crate) tx: Transaction,
    _permit: OwnedSemaphorePermit,
}

impl WriteTransaction {
    /// Commits the transaction and frees the permit, both on success and error.
    pub(crate) async fn commit(self) -> Result<(), SqliteError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database and connection error.
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    /// SQL table schema migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Invalid, corrupted data was found in the database. This is a critical error.
    #[error("could not decode corrupted '{0}' value from database: {1}")]
    Decode(String, DecodeError),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    AclKey(#[from] AclKeyError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Uuid(#[from] uuid::Error),

    #[error("unknown bits {0:#x}")]
    InvalidBits(i64),

    #[error("negative value {0}")]
    Negative(i64),
}

/// Decode a textual column into a typed value, attributing failures to the column name.
pub(crate) fn decode<T>(field: &str, value: &str) -> Result<T, SqliteError>
where
    T: FromStr,
    T::Err: Into<DecodeError>,
{
    T::from_str(value).map_err(|err| SqliteError::Decode(field.to_string(), err.into()))
}

pub(crate) fn decode_u64(field: &str, value: i64) -> Result<u64, SqliteError> {
    u64::try_from(value)
        .map_err(|_| SqliteError::Decode(field.to_string(), DecodeError::Negative(value)))
}

/// Encode an unsigned integer into a signed column, values beyond its range saturate.
pub(crate) fn encode_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use sqlx::{Executor, query, query_as};

    use crate::sqlite::SqliteStoreBuilder;

    #[tokio::test]
    async fn serialized_writes() {
        let store_1 = SqliteStoreBuilder::new()
            .run_default_migrations(false)
            .max_connections(1)
            .random_memory_url()
            .build()
            .await
            .unwrap();

        let store_2 = store_1.clone();

        store_1
            .pool
            .execute("CREATE TABLE test(x INTEGER)")
            .await
            .unwrap();

        // 1. Store 1 acquires the write permit.
        let mut write_1 = store_1.begin_write().await.unwrap();

        // .. in parallel store 2 tries to do some work as well, this waits until store 1 is done.
        let handle = tokio::spawn(async move {
            let mut write_2 = store_2.begin_write().await.unwrap();

            // 3. We see the committed change of store 1.
            let row: (i64,) = query_as("SELECT x FROM test")
                .fetch_one(&mut *write_2.tx)
                .await
                .unwrap();
            assert_eq!(row.0, 5);

            query("UPDATE test SET x = 10")
                .execute(&mut *write_2.tx)
                .await
                .unwrap();

            // 4. Dropping without commit rolls back.
            drop(write_2);

            let row: (i64,) = query_as("SELECT x FROM test")
                .fetch_one(&store_2.pool)
                .await
                .unwrap();
            assert_eq!(row.0, 5);
        });

        // 2. Store 1 writes and commits.
        query("INSERT INTO test (x) VALUES (5)")
            .execute(&mut *write_1.tx)
            .await
            .unwrap();
        write_1.commit().await.unwrap();

        handle.await.unwrap();
    }
}
