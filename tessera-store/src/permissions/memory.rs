// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_core::{AceKey, AceValue, AclKey, Principal, Timestamp};

use crate::memory::MemoryStore;
use crate::permissions::{AcePredicate, AclStore};

#[derive(Debug, Default)]
struct InnerAclMemoryStore {
    /// Entries ordered by acl key, all keys sharing a prefix are stored next to each other.
    aces: BTreeMap<AclKey, BTreeMap<Principal, AceValue>>,

    /// Secondary index of objects per principal.
    by_principal: HashMap<Principal, BTreeSet<AclKey>>,
}

impl InnerAclMemoryStore {
    fn get(&self, key: &AceKey) -> Option<&AceValue> {
        self.aces
            .get(&key.acl_key)
            .and_then(|aces| aces.get(&key.principal))
    }

    fn insert(&mut self, key: AceKey, value: AceValue) {
        self.by_principal
            .entry(key.principal.clone())
            .or_default()
            .insert(key.acl_key.clone());
        self.aces
            .entry(key.acl_key)
            .or_default()
            .insert(key.principal, value);
    }

    fn remove(&mut self, key: &AceKey) -> Option<AceValue> {
        let aces = self.aces.get_mut(&key.acl_key)?;
        let removed = aces.remove(&key.principal)?;
        if aces.is_empty() {
            self.aces.remove(&key.acl_key);
        }

        if let Some(acl_keys) = self.by_principal.get_mut(&key.principal) {
            acl_keys.remove(&key.acl_key);
            if acl_keys.is_empty() {
                self.by_principal.remove(&key.principal);
            }
        }

        Some(removed)
    }

    /// Collect candidate keys using the most selective index the predicate allows, the predicate
    /// is applied to every candidate afterwards.
    fn candidates(&self, predicate: &AcePredicate) -> Vec<AceKey> {
        let by_acl_key = |acl_key: &AclKey| {
            self.aces
                .get(acl_key)
                .into_iter()
                .flat_map(|aces| aces.keys())
                .map(|principal| AceKey::new(acl_key.clone(), principal.clone()))
                .collect::<Vec<AceKey>>()
        };

        if let Some(acl_keys) = &predicate.acl_keys {
            return acl_keys.iter().flat_map(by_acl_key).collect();
        }

        if let Some(prefix) = &predicate.acl_key_prefix {
            return self
                .aces
                .range(prefix.clone()..)
                .take_while(|(acl_key, _)| prefix.is_prefix_of(acl_key))
                .flat_map(|(acl_key, aces)| {
                    aces.keys()
                        .map(move |principal| AceKey::new(acl_key.clone(), principal.clone()))
                })
                .collect();
        }

        if let Some(principals) = &predicate.principals {
            return principals
                .iter()
                .flat_map(|principal| {
                    self.by_principal
                        .get(principal)
                        .into_iter()
                        .flatten()
                        .map(move |acl_key| AceKey::new(acl_key.clone(), principal.clone()))
                })
                .collect();
        }

        self.aces
            .iter()
            .flat_map(|(acl_key, aces)| {
                aces.keys()
                    .map(move |principal| AceKey::new(acl_key.clone(), principal.clone()))
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct AclMemoryStore {
    inner: Arc<RwLock<InnerAclMemoryStore>>,
}

impl AclMemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, InnerAclMemoryStore> {
        self.inner
            .read()
            .expect("acquire shared read access on acl store")
    }

    fn write(&self) -> RwLockWriteGuard<'_, InnerAclMemoryStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on acl store")
    }
}

impl AclStore for MemoryStore {
    type Error = Infallible;

    async fn get_ace(&self, key: &AceKey) -> Result<Option<AceValue>, Self::Error> {
        Ok(self.aces.read().get(key).cloned())
    }

    async fn get_aces(&self, keys: &[AceKey]) -> Result<HashMap<AceKey, AceValue>, Self::Error> {
        let store = self.aces.read();
        Ok(keys
            .iter()
            .filter_map(|key| store.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn put_ace(&self, key: AceKey, value: AceValue) -> Result<(), Self::Error> {
        self.aces.write().insert(key, value);
        Ok(())
    }

    async fn put_aces(&self, entries: Vec<(AceKey, AceValue)>) -> Result<(), Self::Error> {
        let mut store = self.aces.write();
        for (key, value) in entries {
            store.insert(key, value);
        }
        Ok(())
    }

    async fn update_ace<F>(&self, key: &AceKey, f: F) -> Result<Option<AceValue>, Self::Error>
    where
        F: FnOnce(Option<AceValue>) -> Option<AceValue> + Send,
    {
        // Holding the write lock for the whole read-modify-write makes it atomic.
        let mut store = self.aces.write();
        let current = store.get(key).cloned();
        let next = f(current);
        match &next {
            Some(value) => store.insert(key.clone(), value.clone()),
            None => {
                store.remove(key);
            }
        }
        Ok(next)
    }

    async fn remove_ace(&self, key: &AceKey) -> Result<bool, Self::Error> {
        Ok(self.aces.write().remove(key).is_some())
    }

    async fn remove_acl_key(&self, acl_key: &AclKey) -> Result<usize, Self::Error> {
        let mut store = self.aces.write();
        let principals: Vec<Principal> = store
            .aces
            .get(acl_key)
            .map(|aces| aces.keys().cloned().collect())
            .unwrap_or_default();
        for principal in &principals {
            store.remove(&AceKey::new(acl_key.clone(), principal.clone()));
        }
        Ok(principals.len())
    }

    async fn remove_expired(&self, now: Timestamp) -> Result<usize, Self::Error> {
        let mut store = self.aces.write();
        let expired: Vec<AceKey> = store
            .aces
            .iter()
            .flat_map(|(acl_key, aces)| {
                aces.iter()
                    .filter(move |(_, value)| value.is_expired(now))
                    .map(move |(principal, _)| AceKey::new(acl_key.clone(), principal.clone()))
            })
            .collect();
        for key in &expired {
            store.remove(key);
        }
        Ok(expired.len())
    }

    async fn query_aces(
        &self,
        predicate: &AcePredicate,
    ) -> Result<Vec<(AceKey, AceValue)>, Self::Error> {
        let store = self.aces.read();
        Ok(store
            .candidates(predicate)
            .into_iter()
            .filter_map(|key| {
                let value = store.get(&key)?.clone();
                predicate.matches(&key, &value).then_some((key, value))
            })
            .collect())
    }
}
