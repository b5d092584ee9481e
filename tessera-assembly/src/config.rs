// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use tessera_core::AssemblyEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

const PERMISSION_SYNC_INTERVAL: Duration = Duration::from_secs(60);
const DATA_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const INITIAL_DELAY: Duration = Duration::from_secs(60);
const STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_TENANT_OPERATIONS: usize = 8;
const SCHEMA: &str = "materialized";
const SOURCE_SCHEMA: &str = "upstream";
const PASSWORD_LENGTH: usize = 32;
const EVENT_BUFFER: usize = 256;

#[cfg(feature = "postgres")]
const DATABASE_PREFIX: &str = "org_";
#[cfg(feature = "postgres")]
const MAX_TENANT_CONNECTIONS: u32 = 4;
#[cfg(feature = "postgres")]
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration parameters of the materialization coordinator and its reconciliation tasks.
#[derive(Clone, Debug)]
pub struct AssemblyConfiguration {
    /// Period of the permission sync task.
    ///
    /// Default: 60 seconds.
    pub(crate) permission_sync_interval: Duration,

    /// Period of the data refresh task.
    ///
    /// Default: 60 seconds.
    pub(crate) data_refresh_interval: Duration,

    /// Delay before the first tick of every reconciliation task.
    ///
    /// Default: 60 seconds.
    pub(crate) initial_delay: Duration,

    /// Maximum duration of every operation against an organization database.
    ///
    /// Default: 30 seconds.
    pub(crate) statement_timeout: Duration,

    /// Maximum number of operations against organization databases running at the same time.
    ///
    /// Default: 8.
    pub(crate) max_concurrent_tenant_operations: usize,

    /// Schema in every organization database holding the materialized views.
    ///
    /// Default: "materialized".
    pub(crate) schema: String,

    /// Schema in every organization database exposing the upstream entity set tables.
    ///
    /// Default: "upstream".
    pub(crate) source_schema: String,

    /// Identity of this node when competing for reconciliation task leases.
    ///
    /// Default: random.
    pub(crate) node_id: String,

    /// Length of generated database passwords.
    ///
    /// Default: 32.
    pub(crate) password_length: usize,

    /// Capacity of the domain event channel.
    ///
    /// Default: 256.
    pub(crate) event_buffer: usize,
}

impl AssemblyConfiguration {
    /// Return a default instance of `AssemblyConfiguration`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Define the period of the permission sync task.
    pub fn permission_sync_interval(mut self, interval: Duration) -> Self {
        self.permission_sync_interval = interval;
        self
    }

    /// Define the period of the data refresh task.
    pub fn data_refresh_interval(mut self, interval: Duration) -> Self {
        self.data_refresh_interval = interval;
        self
    }

    /// Define the delay before reconciliation tasks start ticking.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Define the maximum duration of operations against organization databases.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Define the maximum number of concurrent operations against organization databases.
    pub fn max_concurrent_tenant_operations(mut self, operations: usize) -> Self {
        self.max_concurrent_tenant_operations = operations.max(1);
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn source_schema(mut self, schema: impl Into<String>) -> Self {
        self.source_schema = schema.into();
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn password_length(mut self, length: usize) -> Self {
        self.password_length = length;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Channel carrying domain events to the coordinator, sized by the configured buffer.
    pub fn event_channel(&self) -> (mpsc::Sender<AssemblyEvent>, mpsc::Receiver<AssemblyEvent>) {
        mpsc::channel(self.event_buffer)
    }
}

impl Default for AssemblyConfiguration {
    fn default() -> Self {
        Self {
            permission_sync_interval: PERMISSION_SYNC_INTERVAL,
            data_refresh_interval: DATA_REFRESH_INTERVAL,
            initial_delay: INITIAL_DELAY,
            statement_timeout: STATEMENT_TIMEOUT,
            max_concurrent_tenant_operations: MAX_CONCURRENT_TENANT_OPERATIONS,
            schema: SCHEMA.to_string(),
            source_schema: SOURCE_SCHEMA.to_string(),
            node_id: Uuid::new_v4().to_string(),
            password_length: PASSWORD_LENGTH,
            event_buffer: EVENT_BUFFER,
        }
    }
}

/// Configuration of the PostgreSQL cluster hosting the organization databases.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PostgresConfiguration {
    /// Connection url of an administrative role allowed to create databases and roles.
    pub(crate) admin_url: String,

    /// Prefix of every organization database name.
    ///
    /// Default: "org_".
    pub(crate) database_prefix: String,

    /// Maximum number of pooled connections per organization database.
    ///
    /// Default: 4.
    pub(crate) max_connections: u32,

    /// Maximum time to wait for a connection.
    ///
    /// Default: 10 seconds.
    pub(crate) connect_timeout: Duration,
}

#[cfg(feature = "postgres")]
impl PostgresConfiguration {
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            admin_url: admin_url.into(),
            database_prefix: DATABASE_PREFIX.to_string(),
            max_connections: MAX_TENANT_CONNECTIONS,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn database_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database_prefix = prefix.into();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(feature = "postgres")]
impl std::fmt::Debug for PostgresConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfiguration")
            .field("admin_url", &"[REDACTED]")
            .field("database_prefix", &self.database_prefix)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
