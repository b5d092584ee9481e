// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use tessera_core::{EntitySetAssemblyKey, SyncFlags, Timestamp};
use tessera_store::{AclStore, AssemblyStore, CredentialStore};
use uuid::Uuid;

use crate::coordinator::MaterializationCoordinator;
use crate::directory::{EntitySetCatalog, OrganizationDirectory};
use crate::error::AssemblyError;
use crate::tasks::{ReconciliationTask, TickReport, log_failure};
use crate::tenant::TenantConnector;

/// Tears down projections whose organization lost MATERIALIZE and recomputes column grants of
/// projections whose permissions changed.
pub struct PermissionSyncTask<S, C, D>
where
    C: TenantConnector,
{
    coordinator: MaterializationCoordinator<S, C, D>,
}

impl<S, C, D> PermissionSyncTask<S, C, D>
where
    C: TenantConnector,
{
    pub fn new(coordinator: MaterializationCoordinator<S, C, D>) -> Self {
        Self { coordinator }
    }
}

impl<S, C, D> ReconciliationTask for PermissionSyncTask<S, C, D>
where
    S: AclStore + AssemblyStore + CredentialStore + Clone + Send + Sync + 'static,
    C: TenantConnector,
    D: EntitySetCatalog + OrganizationDirectory + Send + Sync + 'static,
{
    const NAME: &'static str = "materialize-permission-sync";

    async fn run_once(&self, _now: Timestamp) -> Result<TickReport, AssemblyError> {
        let mut report = TickReport::default();

        let removed: Vec<EntitySetAssemblyKey> = self
            .coordinator
            .store()
            .flagged_materialized_entity_sets(SyncFlags::MATERIALIZE_PERMISSION_REMOVED)
            .await
            .map_err(AssemblyError::store)?
            .into_iter()
            .map(|entry| entry.key)
            .collect();

        for (key, result) in self.coordinator.delete_entity_set_assemblies(removed).await {
            report.record(&key, SyncFlags::MATERIALIZE_PERMISSION_REMOVED, &result);
        }

        // Entries flagged for removal in the meantime are left for the next tick.
        let mut unsynchronized: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        for entry in self
            .coordinator
            .store()
            .flagged_materialized_entity_sets(SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED)
            .await
            .map_err(AssemblyError::store)?
        {
            if entry
                .flags
                .contains(SyncFlags::MATERIALIZE_PERMISSION_REMOVED)
            {
                continue;
            }
            unsynchronized
                .entry(entry.key.organization_id)
                .or_default()
                .insert(entry.key.entity_set_id);
        }

        let flag = SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED;
        for (organization_id, entity_set_ids) in unsynchronized {
            let mut authorized = BTreeMap::new();
            for entity_set_id in entity_set_ids {
                let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
                match self
                    .coordinator
                    .authorized_property_types(organization_id, entity_set_id)
                    .await
                {
                    Ok(property_types) => {
                        authorized.insert(entity_set_id, property_types);
                    }
                    Err(err) => {
                        report.failed += 1;
                        log_failure(&key, flag, &err);
                    }
                }
            }

            for (key, result) in self
                .coordinator
                .update_materialized_entity_sets(organization_id, authorized)
                .await
            {
                report.record(&key, flag, &result);
            }
        }

        Ok(report)
    }
}
