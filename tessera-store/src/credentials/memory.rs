// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_core::{DbCredential, Principal};

use crate::credentials::CredentialStore;
use crate::memory::MemoryStore;

#[derive(Clone, Debug, Default)]
pub struct CredentialMemoryStore {
    inner: Arc<RwLock<HashMap<Principal, DbCredential>>>,
}

impl CredentialMemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Principal, DbCredential>> {
        self.inner
            .read()
            .expect("acquire shared read access on credential store")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Principal, DbCredential>> {
        self.inner
            .write()
            .expect("acquire exclusive write access on credential store")
    }
}

impl CredentialStore for MemoryStore {
    type Error = Infallible;

    async fn get_credential(
        &self,
        principal: &Principal,
    ) -> Result<Option<DbCredential>, Self::Error> {
        Ok(self.credentials.read().get(principal).cloned())
    }

    async fn insert_credential_if_absent(
        &self,
        principal: &Principal,
        credential: DbCredential,
    ) -> Result<DbCredential, Self::Error> {
        Ok(self
            .credentials
            .write()
            .entry(principal.clone())
            .or_insert(credential)
            .clone())
    }

    async fn update_password(
        &self,
        principal: &Principal,
        password: String,
    ) -> Result<Option<DbCredential>, Self::Error> {
        Ok(self
            .credentials
            .write()
            .get_mut(principal)
            .map(|credential| {
                credential.password = password;
                credential.clone()
            }))
    }

    async fn remove_credential(&self, principal: &Principal) -> Result<bool, Self::Error> {
        Ok(self.credentials.write().remove(principal).is_some())
    }
}
