// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;
use uuid::Uuid;

use crate::error::TenantError;
use crate::sql;
use crate::tenant::TenantConnector;

/// Resolves connection pools to organization databases.
///
/// Pools are opened lazily and cached per organization. Pools of different organizations are
/// never shared.
#[derive(Clone)]
pub struct ConnectionManager<C>
where
    C: TenantConnector,
{
    connector: C,
    database_prefix: String,
    pools: Arc<RwLock<HashMap<Uuid, C::Connection>>>,
}

impl<C> ConnectionManager<C>
where
    C: TenantConnector,
{
    pub fn new(connector: C, database_prefix: impl Into<String>) -> Self {
        Self {
            connector,
            database_prefix: database_prefix.into(),
            pools: Arc::default(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn database_name(&self, organization_id: &Uuid) -> String {
        sql::database_name(&self.database_prefix, organization_id)
    }

    /// Returns the cached pool of an organization database, connecting on first use.
    pub async fn connect_to_organization(
        &self,
        organization_id: &Uuid,
    ) -> Result<C::Connection, TenantError> {
        if let Some(connection) = self
            .pools
            .read()
            .expect("acquire shared read access on connection pools")
            .get(organization_id)
        {
            return Ok(connection.clone());
        }

        let database = self.database_name(organization_id);
        debug!(%organization_id, database, "open connection pool");
        let connection = self.connector.connect(&database).await?;

        // Another caller might have connected in the meantime, the first pool wins.
        let mut pools = self
            .pools
            .write()
            .expect("acquire exclusive write access on connection pools");
        Ok(pools
            .entry(*organization_id)
            .or_insert(connection)
            .clone())
    }

    /// Forgets the cached pool of an organization, the next use connects again.
    pub fn evict(&self, organization_id: &Uuid) -> bool {
        self.pools
            .write()
            .expect("acquire exclusive write access on connection pools")
            .remove(organization_id)
            .is_some()
    }

    pub fn is_connected(&self, organization_id: &Uuid) -> bool {
        self.pools
            .read()
            .expect("acquire shared read access on connection pools")
            .contains_key(organization_id)
    }
}
