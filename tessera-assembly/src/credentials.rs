// SPDX-License-Identifier: MIT OR Apache-2.0

use rand::Rng;
use rand::distr::Alphanumeric;
use tessera_core::{DbCredential, Principal};
use tessera_store::CredentialStore;
use tracing::debug;

use crate::error::AssemblyError;
use crate::sql;

/// Issues and rotates database logins of principals.
#[derive(Clone, Debug)]
pub struct CredentialManager<S> {
    store: S,
    password_length: usize,
}

impl<S> CredentialManager<S>
where
    S: CredentialStore + Sync,
{
    pub fn new(store: S, password_length: usize) -> Self {
        Self {
            store,
            password_length,
        }
    }

    /// Returns the login of a principal, generating one on first use.
    ///
    /// When two callers race for the same principal both receive the credential which was stored
    /// first.
    pub async fn get_or_create_credential(
        &self,
        principal: &Principal,
    ) -> Result<DbCredential, AssemblyError> {
        if let Some(credential) = self
            .store
            .get_credential(principal)
            .await
            .map_err(AssemblyError::store)?
        {
            return Ok(credential);
        }

        debug!(%principal, "generate database credential");
        let credential = DbCredential::new(sql::role_name(principal), self.generate_password());
        self.store
            .insert_credential_if_absent(principal, credential)
            .await
            .map_err(AssemblyError::store)
    }

    /// Replaces the password of a principal, the username stays the same.
    ///
    /// The caller applies the new password to every database the role exists in.
    pub async fn roll_credential(
        &self,
        principal: &Principal,
    ) -> Result<DbCredential, AssemblyError> {
        debug!(%principal, "roll database credential");
        self.store
            .update_password(principal, self.generate_password())
            .await
            .map_err(AssemblyError::store)?
            .ok_or_else(|| AssemblyError::NotFound(format!("credential of {principal}")))
    }

    fn generate_password(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.password_length)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tessera_core::Principal;
    use tessera_store::MemoryStore;

    use crate::error::AssemblyError;
    use crate::sql;

    use super::CredentialManager;

    #[tokio::test]
    async fn credentials_are_stable_until_rolled() {
        let manager = CredentialManager::new(MemoryStore::default(), 24);
        let principal = Principal::user("casey");

        let first = manager.get_or_create_credential(&principal).await.unwrap();
        assert_eq!(first.username, sql::role_name(&principal));
        assert_eq!(first.password.len(), 24);
        assert!(first.password.chars().all(|c| c.is_ascii_alphanumeric()));

        let again = manager.get_or_create_credential(&principal).await.unwrap();
        assert_eq!(first, again);

        let rolled = manager.roll_credential(&principal).await.unwrap();
        assert_eq!(rolled.username, first.username);
        assert_ne!(rolled.password, first.password);
        assert_eq!(
            manager.get_or_create_credential(&principal).await.unwrap(),
            rolled
        );
    }

    #[tokio::test]
    async fn rolling_unknown_credential_fails() {
        let manager = CredentialManager::new(MemoryStore::default(), 24);
        assert_matches!(
            manager.roll_credential(&Principal::user("nobody")).await,
            Err(AssemblyError::NotFound(_))
        );
    }
}
