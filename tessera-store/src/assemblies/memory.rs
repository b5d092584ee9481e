// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_core::{
    EntitySetAssemblyKey, MaterializedEntitySet, OrganizationAssembly, SyncFlags, Timestamp,
};
use uuid::Uuid;

use crate::assemblies::AssemblyStore;
use crate::memory::MemoryStore;

#[derive(Debug, Default)]
struct InnerAssemblyMemoryStore {
    organizations: BTreeMap<Uuid, OrganizationAssembly>,

    /// Entries ordered by entity set first, all organizations of one entity set are next to each
    /// other.
    entries: BTreeMap<EntitySetAssemblyKey, MaterializedEntitySet>,
}

impl InnerAssemblyMemoryStore {
    fn mirror(&mut self, key: &EntitySetAssemblyKey, flags: SyncFlags) {
        self.organizations
            .entry(key.organization_id)
            .or_insert_with(|| OrganizationAssembly::new(key.organization_id))
            .materialized_entity_sets
            .insert(key.entity_set_id, flags);
    }

    fn unmirror(&mut self, key: &EntitySetAssemblyKey) {
        if let Some(assembly) = self.organizations.get_mut(&key.organization_id) {
            assembly.materialized_entity_sets.remove(&key.entity_set_id);
        }
    }

    fn modify_flags(
        &mut self,
        key: &EntitySetAssemblyKey,
        f: impl FnOnce(&mut SyncFlags),
    ) -> Option<SyncFlags> {
        let entry = self.entries.get_mut(key)?;
        f(&mut entry.flags);
        let flags = entry.flags;
        self.mirror(key, flags);
        Some(flags)
    }

    fn filtered(&self, f: impl Fn(&MaterializedEntitySet) -> bool) -> Vec<MaterializedEntitySet> {
        self.entries
            .values()
            .filter(|entry| f(entry))
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct AssemblyMemoryStore {
    inner: Arc<RwLock<InnerAssemblyMemoryStore>>,
}

impl AssemblyMemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, InnerAssemblyMemoryStore> {
        self.inner
            .read()
            .expect("acquire shared read access on assembly store")
    }

    fn write(&self) -> RwLockWriteGuard<'_, InnerAssemblyMemoryStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on assembly store")
    }
}

impl AssemblyStore for MemoryStore {
    type Error = Infallible;

    async fn get_organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> Result<Option<OrganizationAssembly>, Self::Error> {
        Ok(self.assemblies.read().organizations.get(organization_id).cloned())
    }

    async fn organization_assemblies(&self) -> Result<Vec<OrganizationAssembly>, Self::Error> {
        Ok(self.assemblies.read().organizations.values().cloned().collect())
    }

    async fn set_organization_initialized(
        &self,
        organization_id: Uuid,
        initialized: bool,
    ) -> Result<(), Self::Error> {
        self.assemblies
            .write()
            .organizations
            .entry(organization_id)
            .or_insert_with(|| OrganizationAssembly::new(organization_id))
            .initialized = initialized;
        Ok(())
    }

    async fn remove_organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> Result<bool, Self::Error> {
        let mut store = self.assemblies.write();
        let Some(assembly) = store.organizations.remove(organization_id) else {
            return Ok(false);
        };
        for entity_set_id in assembly.materialized_entity_sets.keys() {
            store
                .entries
                .remove(&EntitySetAssemblyKey::new(*entity_set_id, *organization_id));
        }
        Ok(true)
    }

    async fn get_materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> Result<Option<MaterializedEntitySet>, Self::Error> {
        Ok(self.assemblies.read().entries.get(key).cloned())
    }

    async fn insert_materialized_entity_set(
        &self,
        entry: MaterializedEntitySet,
    ) -> Result<(), Self::Error> {
        let mut store = self.assemblies.write();
        store.mirror(&entry.key, entry.flags);
        store.entries.insert(entry.key, entry);
        Ok(())
    }

    async fn update_materialized_entity_set<F>(
        &self,
        key: &EntitySetAssemblyKey,
        f: F,
    ) -> Result<Option<MaterializedEntitySet>, Self::Error>
    where
        F: FnOnce(&mut MaterializedEntitySet) + Send,
    {
        let mut store = self.assemblies.write();
        let Some(entry) = store.entries.get_mut(key) else {
            return Ok(None);
        };
        f(entry);
        entry.key = *key;
        let updated = entry.clone();
        store.mirror(key, updated.flags);
        Ok(Some(updated))
    }

    async fn remove_materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> Result<bool, Self::Error> {
        let mut store = self.assemblies.write();
        let removed = store.entries.remove(key).is_some();
        store.unmirror(key);
        Ok(removed)
    }

    async fn add_flags(
        &self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
    ) -> Result<Option<SyncFlags>, Self::Error> {
        Ok(self
            .assemblies
            .write()
            .modify_flags(key, |current| current.insert(flags)))
    }

    async fn remove_flags(
        &self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
    ) -> Result<Option<SyncFlags>, Self::Error> {
        Ok(self
            .assemblies
            .write()
            .modify_flags(key, |current| current.remove(flags)))
    }

    async fn materialized_entity_sets_by_entity_set(
        &self,
        entity_set_id: &Uuid,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        let store = self.assemblies.read();
        let from = EntitySetAssemblyKey::new(*entity_set_id, Uuid::nil());
        let to = EntitySetAssemblyKey::new(*entity_set_id, Uuid::max());
        Ok(store
            .entries
            .range(from..=to)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn materialized_entity_sets_by_organization(
        &self,
        organization_id: &Uuid,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        let store = self.assemblies.read();
        let Some(assembly) = store.organizations.get(organization_id) else {
            return Ok(Vec::new());
        };
        Ok(assembly
            .materialized_entity_sets
            .keys()
            .filter_map(|entity_set_id| {
                store
                    .entries
                    .get(&EntitySetAssemblyKey::new(*entity_set_id, *organization_id))
                    .cloned()
            })
            .collect())
    }

    async fn flagged_materialized_entity_sets(
        &self,
        flags: SyncFlags,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        Ok(self
            .assemblies
            .read()
            .filtered(|entry| entry.flags.intersects(flags)))
    }

    async fn refreshable_materialized_entity_sets(
        &self,
        now: Timestamp,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        Ok(self
            .assemblies
            .read()
            .filtered(|entry| entry.is_refreshable(now)))
    }
}
