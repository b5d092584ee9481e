// SPDX-License-Identifier: MIT OR Apache-2.0

use std::str::FromStr;
use std::time::Duration;

use sqlx::{Executor, PgPool};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{debug, trace};

use crate::config::PostgresConfiguration;
use crate::error::TenantError;
use crate::sql;
use crate::tenant::{ConnectionManager, TenantConnection, TenantConnector};

/// Organization databases hosted in one PostgreSQL cluster.
///
/// Databases are created and dropped through a pool of the administrative role. Connections to an
/// organization database use the same role, pools are opened lazily on first use.
#[derive(Clone)]
pub struct PostgresConnector {
    config: PostgresConfiguration,
    options: PgConnectOptions,
    admin: PgPool,
}

impl PostgresConnector {
    pub fn new(config: PostgresConfiguration) -> Result<Self, TenantError> {
        let options = PgConnectOptions::from_str(&config.admin_url)?;
        let admin = pool_options(&config).connect_lazy_with(options.clone());
        Ok(Self {
            config,
            options,
            admin,
        })
    }

    /// Connection manager for the organization databases of this cluster.
    pub fn connection_manager(&self) -> ConnectionManager<Self> {
        ConnectionManager::new(self.clone(), self.config.database_prefix.clone())
    }

    async fn database_exists(&self, database: &str) -> Result<bool, TenantError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(database)
                .fetch_one(&self.admin)
                .await?;
        Ok(exists)
    }
}

fn pool_options(config: &PostgresConfiguration) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
}

impl TenantConnector for PostgresConnector {
    type Connection = PostgresConnection;

    async fn create_database(&self, database: &str) -> Result<(), TenantError> {
        // CREATE DATABASE can't run inside a transaction block and has no IF NOT EXISTS.
        if self.database_exists(database).await? {
            trace!(database, "database exists already");
            return Ok(());
        }

        debug!(database, "create organization database");
        sqlx::raw_sql(&sql::create_database(database))
            .execute(&self.admin)
            .await?;
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), TenantError> {
        debug!(database, "drop organization database");
        sqlx::raw_sql(&sql::drop_database(database))
            .execute(&self.admin)
            .await?;
        Ok(())
    }

    async fn connect(&self, database: &str) -> Result<PostgresConnection, TenantError> {
        let options = self.options.clone().database(database);
        let pool = pool_options(&self.config).connect_lazy_with(options);
        Ok(PostgresConnection { pool })
    }
}

#[derive(Clone, Debug)]
pub struct PostgresConnection {
    pool: PgPool,
}

impl TenantConnection for PostgresConnection {
    async fn execute(&self, statements: Vec<String>, timeout: Duration) -> Result<(), TenantError> {
        let mut tx = self.pool.begin().await?;

        let set_timeout = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        (&mut *tx).execute(sqlx::raw_sql(&set_timeout)).await?;

        for statement in &statements {
            trace!(%statement, "execute");
            (&mut *tx).execute(sqlx::raw_sql(statement)).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
