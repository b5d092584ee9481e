// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use tessera_assembly::tasks::spawn_reconciliation_tasks;
use tessera_assembly::test_utils::{TestAssembly, setup_logging};
use tessera_assembly::{
    AssemblyConfiguration, AssemblyError, DataRefreshTask, PermissionSyncTask,
    ReconciliationTask, Scheduler, TickReport, sql,
};
use tessera_core::{
    AclKey, EntitySetAssemblyKey, MaterializedEntitySet, NEVER_EXPIRES, Permissions, Principal,
    SecurableObjectType, SyncFlags, Timestamp, now,
};
use tessera_store::{AssemblyStore, MemoryStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MINUTE: Timestamp = 60 * 1000;

async fn entry(
    assembly: &TestAssembly,
    key: &EntitySetAssemblyKey,
) -> Option<MaterializedEntitySet> {
    assembly
        .store
        .get_materialized_entity_set(key)
        .await
        .unwrap()
}

/// Polls the flags of an entry until they match, the event loop handles events concurrently.
async fn wait_for_flags(assembly: &TestAssembly, key: &EntitySetAssemblyKey, flags: SyncFlags) {
    for _ in 0..100 {
        if entry(assembly, key).await.map(|entry| entry.flags) == Some(flags) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{key} never reached flags {flags:?}");
}

async fn grant(
    assembly: &TestAssembly,
    acl_key: AclKey,
    principal: &Principal,
    permissions: Permissions,
) {
    let object_type = if acl_key.depth() == 1 {
        SecurableObjectType::EntitySet
    } else {
        SecurableObjectType::PropertyTypeInEntitySet
    };
    assembly
        .coordinator
        .authorization()
        .add_permission(&acl_key, principal, object_type, permissions, NEVER_EXPIRES)
        .await
        .unwrap();
}

#[tokio::test]
async fn permission_changes_reach_organization_database() {
    setup_logging();

    let mut assembly = TestAssembly::new(AssemblyConfiguration::new());
    let organization_id = Uuid::new_v4();
    let organization = Principal::organization(organization_id);
    let alice = Principal::user("alice");
    let database = assembly.database(&organization_id);

    let token = CancellationToken::new();
    let event_loop = assembly.spawn_event_loop(token.clone());

    // The organization materializes the "people" entity set without any of its properties.
    assembly.directory.add_member(organization_id, alice.clone());
    let entity_set_id = Uuid::new_v4();
    let property_type_id = assembly
        .directory
        .add_entity_set(entity_set_id, "people", &["name"])[0];
    let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);

    grant(
        &assembly,
        AclKey::entity_set(entity_set_id),
        &organization,
        Permissions::MATERIALIZE,
    )
    .await;
    assembly
        .coordinator
        .initialize_organization(organization_id)
        .await
        .unwrap();
    let entries = assembly
        .coordinator
        .materialize_entity_sets(organization_id, &BTreeSet::from([entity_set_id]), None)
        .await
        .unwrap();
    assert!(entries[0].columns.is_empty());

    // Alice may read the property, the organization may materialize it from now on.
    let property = AclKey::property(entity_set_id, property_type_id);
    grant(&assembly, property.clone(), &alice, Permissions::READ).await;
    grant(&assembly, property, &organization, Permissions::MATERIALIZE).await;
    wait_for_flags(
        &assembly,
        &key,
        SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED,
    )
    .await;

    let task = PermissionSyncTask::new(assembly.coordinator.clone());
    assert_eq!(
        task.run_once(now()).await.unwrap(),
        TickReport {
            succeeded: 1,
            failed: 0
        }
    );

    let entry_after_sync = entry(&assembly, &key).await.unwrap();
    assert!(entry_after_sync.flags.is_empty());
    assert_eq!(entry_after_sync.columns, BTreeSet::from([property_type_id]));
    assert_eq!(
        assembly
            .connector
            .statements_containing(&database, "GRANT SELECT"),
        vec![format!(
            "GRANT SELECT (\"entity_key_id\", \"name\") ON TABLE \"materialized\".\"people\" TO {}",
            sql::quote_ident(&sql::role_name(&alice))
        )]
    );

    // Nothing is flagged anymore.
    assert_eq!(task.run_once(now()).await.unwrap(), TickReport::default());

    // Losing MATERIALIZE on the entity set removes the projection with the next tick.
    assembly
        .coordinator
        .authorization()
        .remove_permission(
            &AclKey::entity_set(entity_set_id),
            &organization,
            Permissions::MATERIALIZE,
        )
        .await
        .unwrap();
    wait_for_flags(&assembly, &key, SyncFlags::MATERIALIZE_PERMISSION_REMOVED).await;

    assembly.connector.clear_statements();
    assert_eq!(
        task.run_once(now()).await.unwrap(),
        TickReport {
            succeeded: 1,
            failed: 0
        }
    );
    assert!(entry(&assembly, &key).await.is_none());
    assert_eq!(
        assembly.connector.statements(&database),
        vec!["DROP MATERIALIZED VIEW IF EXISTS \"materialized\".\"people\"".to_string()]
    );

    token.cancel();
    event_loop.await.unwrap();
}

#[tokio::test]
async fn removal_wins_over_other_flags() {
    setup_logging();

    let assembly = TestAssembly::new(AssemblyConfiguration::new());
    let organization_id = Uuid::new_v4();
    let organization = Principal::organization(organization_id);
    let entity_set_id = Uuid::new_v4();
    assembly
        .directory
        .add_entity_set(entity_set_id, "people", &["name"]);
    let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);

    grant(
        &assembly,
        AclKey::entity_set(entity_set_id),
        &organization,
        Permissions::MATERIALIZE,
    )
    .await;
    assembly
        .coordinator
        .initialize_organization(organization_id)
        .await
        .unwrap();
    assembly
        .coordinator
        .materialize_entity_sets(organization_id, &BTreeSet::from([entity_set_id]), None)
        .await
        .unwrap();

    assembly
        .store
        .add_flags(
            &key,
            SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED
                | SyncFlags::MATERIALIZE_PERMISSION_REMOVED
                | SyncFlags::DATA_UNSYNCHRONIZED,
        )
        .await
        .unwrap();

    // A refresh can't revive an entry which is about to be removed.
    assert_matches!(
        assembly
            .coordinator
            .refresh_materialized_entity_set(organization_id, entity_set_id, now())
            .await,
        Err(AssemblyError::PreconditionFailed(_))
    );

    let report = PermissionSyncTask::new(assembly.coordinator.clone())
        .run_once(now())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(entry(&assembly, &key).await.is_none());
}

#[tokio::test]
async fn data_refresh_respects_refresh_rate() {
    setup_logging();

    let assembly = TestAssembly::new(AssemblyConfiguration::new());
    let organization_id = Uuid::new_v4();
    let organization = Principal::organization(organization_id);
    assembly
        .coordinator
        .initialize_organization(organization_id)
        .await
        .unwrap();

    // One entity set refreshes automatically every five minutes, the other one only manually.
    let automatic = Uuid::new_v4();
    let manual = Uuid::new_v4();
    for (entity_set_id, name, refresh_rate) in [
        (automatic, "people", Some(Duration::from_secs(5 * 60))),
        (manual, "places", None),
    ] {
        assembly
            .directory
            .add_entity_set(entity_set_id, name, &["name"]);
        grant(
            &assembly,
            AclKey::entity_set(entity_set_id),
            &organization,
            Permissions::MATERIALIZE,
        )
        .await;
        assembly
            .coordinator
            .materialize_entity_sets(
                organization_id,
                &BTreeSet::from([entity_set_id]),
                refresh_rate,
            )
            .await
            .unwrap();
        assembly
            .coordinator
            .on_entity_set_data_changed(entity_set_id)
            .await
            .unwrap();
    }

    let automatic_key = EntitySetAssemblyKey::new(automatic, organization_id);
    let manual_key = EntitySetAssemblyKey::new(manual, organization_id);
    let last_refresh = entry(&assembly, &automatic_key).await.unwrap().last_refresh;
    let task = DataRefreshTask::new(assembly.coordinator.clone());

    // Four minutes after the last refresh it's too early.
    let report = task.run_once(last_refresh + 4 * MINUTE).await.unwrap();
    assert_eq!(report, TickReport::default());
    assert_eq!(
        entry(&assembly, &automatic_key).await.unwrap().flags,
        SyncFlags::DATA_UNSYNCHRONIZED
    );

    let report = task.run_once(last_refresh + 6 * MINUTE).await.unwrap();
    assert_eq!(report.succeeded, 1);
    let refreshed = entry(&assembly, &automatic_key).await.unwrap();
    assert!(refreshed.flags.is_empty());
    assert_eq!(refreshed.last_refresh, last_refresh + 6 * MINUTE);
    assert_eq!(
        assembly
            .connector
            .statements_containing(&assembly.database(&organization_id), "REFRESH"),
        vec!["REFRESH MATERIALIZED VIEW \"materialized\".\"people\"".to_string()]
    );

    // Without a refresh rate the entry waits for a manual refresh.
    assert_eq!(
        entry(&assembly, &manual_key).await.unwrap().flags,
        SyncFlags::DATA_UNSYNCHRONIZED
    );
    let report = task.run_once(last_refresh + 60 * MINUTE).await.unwrap();
    assert_eq!(report, TickReport::default());
}

#[tokio::test]
async fn failing_organizations_do_not_block_others() {
    setup_logging();

    let assembly = TestAssembly::new(AssemblyConfiguration::new());
    let entity_set_id = Uuid::new_v4();
    assembly
        .directory
        .add_entity_set(entity_set_id, "people", &["name"]);

    let organization_ids = [Uuid::new_v4(), Uuid::new_v4()];
    for organization_id in organization_ids {
        grant(
            &assembly,
            AclKey::entity_set(entity_set_id),
            &Principal::organization(organization_id),
            Permissions::MATERIALIZE,
        )
        .await;
        assembly
            .coordinator
            .initialize_organization(organization_id)
            .await
            .unwrap();
        assembly
            .coordinator
            .materialize_entity_sets(
                organization_id,
                &BTreeSet::from([entity_set_id]),
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
    }
    assert_eq!(
        assembly
            .coordinator
            .on_entity_set_data_changed(entity_set_id)
            .await
            .unwrap(),
        2
    );

    let [failing, healthy] = organization_ids;
    assembly
        .connector
        .fail(&assembly.database(&failing), true);

    let report = DataRefreshTask::new(assembly.coordinator.clone())
        .run_once(now() + 2 * MINUTE)
        .await
        .unwrap();
    assert_eq!(
        report,
        TickReport {
            succeeded: 1,
            failed: 1
        }
    );

    let failing_key = EntitySetAssemblyKey::new(entity_set_id, failing);
    let healthy_key = EntitySetAssemblyKey::new(entity_set_id, healthy);
    assert_eq!(
        entry(&assembly, &failing_key).await.unwrap().flags,
        SyncFlags::DATA_UNSYNCHRONIZED
    );
    assert!(entry(&assembly, &healthy_key).await.unwrap().flags.is_empty());
}

#[derive(Clone, Default)]
struct CountingTask {
    ticks: Arc<AtomicUsize>,
}

impl ReconciliationTask for CountingTask {
    const NAME: &'static str = "counting";

    async fn run_once(&self, _now: Timestamp) -> Result<TickReport, AssemblyError> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(TickReport::default())
    }
}

#[tokio::test]
async fn only_lease_holder_runs_task() {
    setup_logging();

    let leases = MemoryStore::default();
    let panda = Scheduler::new(leases.clone(), "panda", Duration::ZERO);
    let penguin = Scheduler::new(leases, "penguin", Duration::ZERO);
    let task = CountingTask::default();
    let ttl = Duration::from_secs(60);

    assert!(panda.tick(&task, ttl).await.is_some());
    assert!(penguin.tick(&task, ttl).await.is_none());
    assert!(panda.tick(&task, ttl).await.is_some());
    assert_eq!(task.ticks.load(Ordering::SeqCst), 2);

    // Panda gives the lease up when its loop ends, then penguin takes over.
    let token = CancellationToken::new();
    let handle = panda.spawn(task.clone(), Duration::from_millis(25), token.clone());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(penguin.tick(&task, ttl).await.is_none());

    token.cancel();
    handle.await.unwrap();
    let ticks = task.ticks.load(Ordering::SeqCst);
    assert!(ticks > 2);

    assert!(penguin.tick(&task, ttl).await.is_some());
    assert_eq!(task.ticks.load(Ordering::SeqCst), ticks + 1);
}

#[tokio::test]
async fn spawned_tasks_converge() {
    setup_logging();

    let config = AssemblyConfiguration::new()
        .initial_delay(Duration::ZERO)
        .permission_sync_interval(Duration::from_millis(20))
        .data_refresh_interval(Duration::from_millis(20));
    let assembly = TestAssembly::new(config);
    let organization_id = Uuid::new_v4();
    let entity_set_id = Uuid::new_v4();
    let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
    assembly
        .directory
        .add_entity_set(entity_set_id, "people", &["name"]);

    grant(
        &assembly,
        AclKey::entity_set(entity_set_id),
        &Principal::organization(organization_id),
        Permissions::MATERIALIZE,
    )
    .await;
    assembly
        .coordinator
        .initialize_organization(organization_id)
        .await
        .unwrap();
    assembly
        .coordinator
        .materialize_entity_sets(
            organization_id,
            &BTreeSet::from([entity_set_id]),
            Some(Duration::ZERO),
        )
        .await
        .unwrap();
    assembly
        .store
        .add_flags(
            &key,
            SyncFlags::DATA_UNSYNCHRONIZED | SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED,
        )
        .await
        .unwrap();

    let token = CancellationToken::new();
    let handles = spawn_reconciliation_tasks(&assembly.coordinator, token.clone());
    wait_for_flags(&assembly, &key, SyncFlags::empty()).await;

    token.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}
