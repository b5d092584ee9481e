// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::error::Error;

use tessera_core::{AceKey, AceValue, AclKey, Timestamp};

use crate::permissions::AcePredicate;

/// Key-value store of access control entries, keyed by `(acl_key, principal)`.
///
/// Next to point and batched access it offers an atomic read-modify-write primitive per key
/// (`update_ace`) which is used to merge and subtract permissions without a separate lock, and
/// predicate queries over the secondary indexes (acl key prefix, principal, principal type,
/// securable object type and permission bits).
pub trait AclStore {
    type Error: Error + Send + Sync + 'static;

    /// Returns the entry for a key, `None` if no entry exists.
    fn get_ace(
        &self,
        key: &AceKey,
    ) -> impl Future<Output = Result<Option<AceValue>, Self::Error>> + Send;

    /// Returns all existing entries for the given keys. Missing keys are not part of the result.
    fn get_aces(
        &self,
        keys: &[AceKey],
    ) -> impl Future<Output = Result<HashMap<AceKey, AceValue>, Self::Error>> + Send;

    /// Inserts or overwrites an entry.
    fn put_ace(
        &self,
        key: AceKey,
        value: AceValue,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Inserts or overwrites all given entries.
    fn put_aces(
        &self,
        entries: Vec<(AceKey, AceValue)>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Applies a function to the current value of a key and writes the result back.
    ///
    /// The function receives `None` if no entry exists. Returning `None` removes the entry.
    /// Applies on the same key are serialized, the function never observes a value which is
    /// concurrently being replaced. Returns the value which was written.
    fn update_ace<F>(
        &self,
        key: &AceKey,
        f: F,
    ) -> impl Future<Output = Result<Option<AceValue>, Self::Error>> + Send
    where
        F: FnOnce(Option<AceValue>) -> Option<AceValue> + Send;

    /// Removes an entry.
    ///
    /// Returns `true` if the entry existed.
    fn remove_ace(&self, key: &AceKey) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Removes all entries of an object. Returns number of removed entries.
    fn remove_acl_key(
        &self,
        acl_key: &AclKey,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Removes all entries which expired at the given time. Returns number of removed entries.
    fn remove_expired(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Returns all entries matching the predicate.
    fn query_aces(
        &self,
        predicate: &AcePredicate,
    ) -> impl Future<Output = Result<Vec<(AceKey, AceValue)>, Self::Error>> + Send;
}
