// SPDX-License-Identifier: MIT OR Apache-2.0

use tessera_core::{SyncFlags, Timestamp};
use tessera_store::{AclStore, AssemblyStore, CredentialStore};

use crate::coordinator::MaterializationCoordinator;
use crate::directory::{EntitySetCatalog, OrganizationDirectory};
use crate::error::AssemblyError;
use crate::tasks::{ReconciliationTask, TickReport};
use crate::tenant::TenantConnector;

/// Refreshes projections with stale data once their refresh interval passed.
///
/// Entries refreshed less than one refresh interval ago wait for a later tick, which bounds the
/// load on organization databases. Entries waiting for a schema rebuild or without a refresh
/// rate are never picked.
pub struct DataRefreshTask<S, C, D>
where
    C: TenantConnector,
{
    coordinator: MaterializationCoordinator<S, C, D>,
}

impl<S, C, D> DataRefreshTask<S, C, D>
where
    C: TenantConnector,
{
    pub fn new(coordinator: MaterializationCoordinator<S, C, D>) -> Self {
        Self { coordinator }
    }
}

impl<S, C, D> ReconciliationTask for DataRefreshTask<S, C, D>
where
    S: AclStore + AssemblyStore + CredentialStore + Clone + Send + Sync + 'static,
    C: TenantConnector,
    D: EntitySetCatalog + OrganizationDirectory + Send + Sync + 'static,
{
    const NAME: &'static str = "materialized-data-refresh";

    async fn run_once(&self, now: Timestamp) -> Result<TickReport, AssemblyError> {
        let entries = self
            .coordinator
            .store()
            .refreshable_materialized_entity_sets(now)
            .await
            .map_err(AssemblyError::store)?;

        let jobs = entries.into_iter().map(|entry| {
            let coordinator = self.coordinator.clone();
            let key = entry.key;
            (key, async move {
                coordinator
                    .refresh_materialized_entity_set(key.organization_id, key.entity_set_id, now)
                    .await
            })
        });

        let mut report = TickReport::default();
        for (key, result) in self.coordinator.offloader().run(jobs).await {
            report.record(&key, SyncFlags::DATA_UNSYNCHRONIZED, &result);
        }
        Ok(report)
    }
}
