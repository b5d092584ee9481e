// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::time::Duration;

use tessera_core::{EntitySetAssemblyKey, MaterializedEntitySet, SyncFlags};
use uuid::Uuid;

use crate::assemblies::AssemblyStore;
use crate::assert_all_stores;

const MINUTE: u64 = 60 * 1000;

fn entry(key: EntitySetAssemblyKey, refresh_rate: Option<Duration>) -> MaterializedEntitySet {
    MaterializedEntitySet::new(
        key,
        "people",
        BTreeSet::from([Uuid::new_v4(), Uuid::new_v4()]),
        refresh_rate,
        0,
    )
}

#[tokio::test]
async fn entries_and_mirror() {
    assert_all_stores!(|store| async {
        let organization_id = Uuid::new_v4();
        let key = EntitySetAssemblyKey::new(Uuid::new_v4(), organization_id);

        assert!(
            store
                .get_organization_assembly(&organization_id)
                .await
                .unwrap()
                .is_none()
        );

        store
            .set_organization_initialized(organization_id, true)
            .await
            .unwrap();

        let materialized = entry(key, Some(Duration::from_secs(300)));
        store
            .insert_materialized_entity_set(materialized.clone())
            .await
            .unwrap();
        assert_eq!(
            store.get_materialized_entity_set(&key).await.unwrap(),
            Some(materialized.clone())
        );

        // Flags are mirrored into the organization assembly.
        assert_eq!(
            store
                .add_flags(&key, SyncFlags::DATA_UNSYNCHRONIZED)
                .await
                .unwrap(),
            Some(SyncFlags::DATA_UNSYNCHRONIZED)
        );
        assert_eq!(
            store
                .add_flags(&key, SyncFlags::EDM_UNSYNCHRONIZED)
                .await
                .unwrap(),
            Some(SyncFlags::DATA_UNSYNCHRONIZED | SyncFlags::EDM_UNSYNCHRONIZED)
        );

        let assembly = store
            .get_organization_assembly(&organization_id)
            .await
            .unwrap()
            .unwrap();
        assert!(assembly.initialized);
        assert_eq!(
            assembly.materialized_entity_sets.get(&key.entity_set_id),
            Some(&(SyncFlags::DATA_UNSYNCHRONIZED | SyncFlags::EDM_UNSYNCHRONIZED))
        );

        // Clearing one flag keeps the other.
        assert_eq!(
            store
                .remove_flags(&key, SyncFlags::EDM_UNSYNCHRONIZED)
                .await
                .unwrap(),
            Some(SyncFlags::DATA_UNSYNCHRONIZED)
        );
        let assembly = store
            .get_organization_assembly(&organization_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            assembly
                .flagged(SyncFlags::DATA_UNSYNCHRONIZED)
                .collect::<Vec<Uuid>>(),
            vec![key.entity_set_id]
        );

        // Flags of missing entries can't be set.
        let missing = EntitySetAssemblyKey::new(Uuid::new_v4(), organization_id);
        assert_eq!(
            store
                .add_flags(&missing, SyncFlags::DATA_UNSYNCHRONIZED)
                .await
                .unwrap(),
            None
        );

        // Updates keep the key.
        let updated = store
            .update_materialized_entity_set(&key, |entry| {
                entry.view_name = "persons".into();
                entry.last_refresh = 42;
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.key, key);
        assert_eq!(updated.view_name, "persons");
        assert_eq!(
            store
                .get_materialized_entity_set(&key)
                .await
                .unwrap()
                .unwrap()
                .last_refresh,
            42
        );

        // Removing the entry removes the mirror.
        assert!(store.remove_materialized_entity_set(&key).await.unwrap());
        assert!(!store.remove_materialized_entity_set(&key).await.unwrap());
        let assembly = store
            .get_organization_assembly(&organization_id)
            .await
            .unwrap()
            .unwrap();
        assert!(assembly.materialized_entity_sets.is_empty());
    });
}

#[tokio::test]
async fn index_queries() {
    assert_all_stores!(|store| async {
        let organization_1 = Uuid::new_v4();
        let organization_2 = Uuid::new_v4();
        let entity_set_1 = Uuid::new_v4();
        let entity_set_2 = Uuid::new_v4();

        let key_1_1 = EntitySetAssemblyKey::new(entity_set_1, organization_1);
        let key_1_2 = EntitySetAssemblyKey::new(entity_set_1, organization_2);
        let key_2_1 = EntitySetAssemblyKey::new(entity_set_2, organization_1);

        for key in [key_1_1, key_1_2, key_2_1] {
            store
                .insert_materialized_entity_set(entry(key, None))
                .await
                .unwrap();
        }

        let keys = |entries: Vec<MaterializedEntitySet>| {
            entries
                .into_iter()
                .map(|entry| entry.key)
                .collect::<BTreeSet<EntitySetAssemblyKey>>()
        };

        assert_eq!(
            keys(
                store
                    .materialized_entity_sets_by_entity_set(&entity_set_1)
                    .await
                    .unwrap()
            ),
            BTreeSet::from([key_1_1, key_1_2])
        );
        assert_eq!(
            keys(
                store
                    .materialized_entity_sets_by_organization(&organization_1)
                    .await
                    .unwrap()
            ),
            BTreeSet::from([key_1_1, key_2_1])
        );

        store
            .add_flags(&key_1_2, SyncFlags::MATERIALIZE_PERMISSION_REMOVED)
            .await
            .unwrap();
        store
            .add_flags(&key_2_1, SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED)
            .await
            .unwrap();

        assert_eq!(
            keys(
                store
                    .flagged_materialized_entity_sets(SyncFlags::MATERIALIZE_PERMISSION_REMOVED)
                    .await
                    .unwrap()
            ),
            BTreeSet::from([key_1_2])
        );
        assert_eq!(
            keys(
                store
                    .flagged_materialized_entity_sets(
                        SyncFlags::MATERIALIZE_PERMISSION_REMOVED
                            | SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED
                    )
                    .await
                    .unwrap()
            ),
            BTreeSet::from([key_1_2, key_2_1])
        );

        // Newly inserted entries create an uninitialized organization assembly.
        let assembly = store
            .get_organization_assembly(&organization_2)
            .await
            .unwrap()
            .unwrap();
        assert!(!assembly.initialized);
        assert_eq!(store.organization_assemblies().await.unwrap().len(), 2);

        // Removing an organization removes its entries.
        assert!(
            store
                .remove_organization_assembly(&organization_1)
                .await
                .unwrap()
        );
        assert!(
            store
                .get_materialized_entity_set(&key_2_1)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            keys(
                store
                    .materialized_entity_sets_by_entity_set(&entity_set_1)
                    .await
                    .unwrap()
            ),
            BTreeSet::from([key_1_2])
        );
    });
}

#[tokio::test]
async fn refreshable_entries() {
    assert_all_stores!(|store| async {
        let now = 100 * MINUTE;
        let organization_id = Uuid::new_v4();
        let five_minutes = Some(Duration::from_secs(5 * 60));

        let recent = EntitySetAssemblyKey::new(Uuid::new_v4(), organization_id);
        let due = EntitySetAssemblyKey::new(Uuid::new_v4(), organization_id);
        let schema_drift = EntitySetAssemblyKey::new(Uuid::new_v4(), organization_id);
        let manual = EntitySetAssemblyKey::new(Uuid::new_v4(), organization_id);

        for (key, refresh_rate, last_refresh) in [
            (recent, five_minutes, now - 4 * MINUTE),
            (due, five_minutes, now - 6 * MINUTE),
            (schema_drift, five_minutes, now - 6 * MINUTE),
            (manual, None, 0),
        ] {
            let mut materialized = entry(key, refresh_rate);
            materialized.last_refresh = last_refresh;
            materialized.flags = SyncFlags::DATA_UNSYNCHRONIZED;
            store
                .insert_materialized_entity_set(materialized)
                .await
                .unwrap();
        }
        store
            .add_flags(&schema_drift, SyncFlags::EDM_UNSYNCHRONIZED)
            .await
            .unwrap();

        let refreshable = store
            .refreshable_materialized_entity_sets(now)
            .await
            .unwrap();
        assert_eq!(refreshable.len(), 1);
        assert_eq!(refreshable[0].key, due);
    });
}
