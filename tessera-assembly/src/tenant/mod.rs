// SPDX-License-Identifier: MIT OR Apache-2.0

//! Physical databases of organizations.
mod connections;
#[cfg(feature = "postgres")]
mod postgres;

use std::time::Duration;

pub use connections::ConnectionManager;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnection, PostgresConnector};

use crate::error::TenantError;

/// Creates, drops and connects to organization databases.
pub trait TenantConnector: Clone + Send + Sync + 'static {
    type Connection: TenantConnection;

    /// Creates a database, nothing happens if it exists already.
    fn create_database(
        &self,
        database: &str,
    ) -> impl Future<Output = Result<(), TenantError>> + Send;

    /// Drops a database, terminating open sessions. Nothing happens if it doesn't exist.
    fn drop_database(&self, database: &str)
    -> impl Future<Output = Result<(), TenantError>> + Send;

    /// Opens a connection pool to a database.
    fn connect(
        &self,
        database: &str,
    ) -> impl Future<Output = Result<Self::Connection, TenantError>> + Send;
}

/// Pooled connection to one organization database.
pub trait TenantConnection: Clone + Send + Sync + 'static {
    /// Executes all statements in one transaction.
    ///
    /// Every statement is aborted by the database when it runs longer than the timeout.
    fn execute(
        &self,
        statements: Vec<String>,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TenantError>> + Send;
}
