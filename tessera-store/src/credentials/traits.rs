// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use tessera_core::{DbCredential, Principal};

/// Database logins of principals.
pub trait CredentialStore {
    type Error: Error + Send + Sync + 'static;

    fn get_credential(
        &self,
        principal: &Principal,
    ) -> impl Future<Output = Result<Option<DbCredential>, Self::Error>> + Send;

    /// Stores the credential unless the principal already has one.
    ///
    /// Returns the credential which is stored after the call. Concurrent callers racing for the
    /// same principal all receive the one which won.
    fn insert_credential_if_absent(
        &self,
        principal: &Principal,
        credential: DbCredential,
    ) -> impl Future<Output = Result<DbCredential, Self::Error>> + Send;

    /// Replaces the password and keeps the username. Returns `None` if the principal has no
    /// credential.
    fn update_password(
        &self,
        principal: &Principal,
        password: String,
    ) -> impl Future<Output = Result<Option<DbCredential>, Self::Error>> + Send;

    fn remove_credential(
        &self,
        principal: &Principal,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
