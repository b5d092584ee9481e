// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cluster-wide periodic reconciliation of organization databases.
//!
//! Every node runs a [`Scheduler`] for each task, but per tick only the node holding the task's
//! lease executes it. The holder extends its lease on every tick, another node takes over once
//! the lease expired after two missed periods.
mod data_refresh;
mod permission_sync;

use std::time::Duration;

use tessera_core::{EntitySetAssemblyKey, SyncFlags, Timestamp, now};
use tessera_store::{AclStore, AssemblyStore, CredentialStore, LeaseStore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub use data_refresh::DataRefreshTask;
pub use permission_sync::PermissionSyncTask;

use crate::coordinator::MaterializationCoordinator;
use crate::directory::{EntitySetCatalog, OrganizationDirectory};
use crate::error::AssemblyError;
use crate::tenant::TenantConnector;

/// Outcome of one tick of a reconciliation task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl TickReport {
    pub(crate) fn record<T>(
        &mut self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
        result: &Result<T, AssemblyError>,
    ) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(err) => {
                self.failed += 1;
                log_failure(key, flags, err);
            }
        }
    }
}

/// Logs a failed reconciliation of one entry, its flags stay set for the next tick.
pub(crate) fn log_failure(key: &EntitySetAssemblyKey, flags: SyncFlags, err: &AssemblyError) {
    if err.is_transient() {
        warn!(
            organization_id = %key.organization_id,
            entity_set_id = %key.entity_set_id,
            flag = ?flags,
            %err,
            "reconciliation failed, retry on next tick"
        );
    } else {
        error!(
            organization_id = %key.organization_id,
            entity_set_id = %key.entity_set_id,
            flag = ?flags,
            %err,
            "reconciliation failed"
        );
    }
}

/// Periodic job converging organization databases towards the registry.
pub trait ReconciliationTask: Send + Sync + 'static {
    /// Name of the lease guarding the task.
    const NAME: &'static str;

    /// Runs one tick. Failures of single entries are part of the report, an error means the tick
    /// could not run at all.
    fn run_once(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<TickReport, AssemblyError>> + Send;
}

/// Runs reconciliation tasks at a fixed rate while holding their lease.
#[derive(Clone, Debug)]
pub struct Scheduler<L> {
    leases: L,
    holder: String,
    initial_delay: Duration,
}

impl<L> Scheduler<L>
where
    L: LeaseStore + Clone + Send + Sync + 'static,
{
    pub fn new(leases: L, holder: impl Into<String>, initial_delay: Duration) -> Self {
        Self {
            leases,
            holder: holder.into(),
            initial_delay,
        }
    }

    /// Spawns the loop of a task, it ends and gives up the lease when the token is cancelled.
    pub fn spawn<T>(&self, task: T, period: Duration, token: CancellationToken) -> JoinHandle<()>
    where
        T: ReconciliationTask,
    {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(task, period, token).await })
    }

    pub async fn run<T>(&self, task: T, period: Duration, token: CancellationToken)
    where
        T: ReconciliationTask,
    {
        let mut interval = interval_at(Instant::now() + self.initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ttl = period * 2;

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(task = T::NAME, "reconciliation task received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(&task, ttl).await;
                }
            }
        }

        if let Err(err) = self.leases.release_lease(T::NAME, &self.holder).await {
            warn!(task = T::NAME, %err, "failed releasing lease");
        }
    }

    /// Runs the task once if this node holds or acquires the lease.
    ///
    /// Returns `None` if another node holds the lease.
    pub async fn tick<T>(&self, task: &T, ttl: Duration) -> Option<TickReport>
    where
        T: ReconciliationTask,
    {
        match self
            .leases
            .try_acquire_lease(T::NAME, &self.holder, now(), ttl)
            .await
        {
            Ok(true) => (),
            Ok(false) => {
                trace!(task = T::NAME, "lease held by another node");
                return None;
            }
            Err(err) => {
                warn!(task = T::NAME, %err, "failed acquiring lease");
                return None;
            }
        }

        match task.run_once(now()).await {
            Ok(report) => {
                if report.failed > 0 {
                    info!(
                        task = T::NAME,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "reconciliation tick finished with failures"
                    );
                } else {
                    debug!(task = T::NAME, succeeded = report.succeeded, "reconciliation tick");
                }
                Some(report)
            }
            Err(err) => {
                error!(task = T::NAME, %err, "reconciliation tick failed");
                None
            }
        }
    }
}

/// Spawns the permission sync and the data refresh task with the configured periods.
pub fn spawn_reconciliation_tasks<S, C, D>(
    coordinator: &MaterializationCoordinator<S, C, D>,
    token: CancellationToken,
) -> [JoinHandle<()>; 2]
where
    S: AclStore + AssemblyStore + CredentialStore + LeaseStore + Clone + Send + Sync + 'static,
    C: TenantConnector,
    D: EntitySetCatalog + OrganizationDirectory + Send + Sync + 'static,
{
    let config = coordinator.config();
    let scheduler = Scheduler::new(
        coordinator.store().clone(),
        config.node_id.clone(),
        config.initial_delay,
    );

    [
        scheduler.spawn(
            PermissionSyncTask::new(coordinator.clone()),
            config.permission_sync_interval,
            token.clone(),
        ),
        scheduler.spawn(
            DataRefreshTask::new(coordinator.clone()),
            config.data_refresh_interval,
            token,
        ),
    ]
}
