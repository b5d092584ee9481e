// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use tessera_core::{
    EntitySetAssemblyKey, MaterializedEntitySet, OrganizationAssembly, SyncFlags, Timestamp,
};
use uuid::Uuid;

/// Materialized-set registry.
///
/// Holds one `MaterializedEntitySet` per `(entity_set_id, organization_id)` and one
/// `OrganizationAssembly` per organization. The per-entity-set flag map of an organization
/// assembly mirrors the flags of its entries, every mutation of an entry updates the mirror in the
/// same atomic step.
pub trait AssemblyStore {
    type Error: Error + Send + Sync + 'static;

    /// Returns the assembly of an organization including its flag mirror.
    fn get_organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> impl Future<Output = Result<Option<OrganizationAssembly>, Self::Error>> + Send;

    /// Returns all known organization assemblies.
    fn organization_assemblies(
        &self,
    ) -> impl Future<Output = Result<Vec<OrganizationAssembly>, Self::Error>> + Send;

    /// Creates the assembly of an organization if it doesn't exist yet and sets its
    /// `initialized` state.
    fn set_organization_initialized(
        &self,
        organization_id: Uuid,
        initialized: bool,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Removes an organization assembly together with all its materialized entity sets.
    ///
    /// Returns `false` if no assembly existed.
    fn remove_organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    fn get_materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> impl Future<Output = Result<Option<MaterializedEntitySet>, Self::Error>> + Send;

    /// Inserts or overwrites an entry.
    ///
    /// An uninitialized organization assembly is created if none exists yet.
    fn insert_materialized_entity_set(
        &self,
        entry: MaterializedEntitySet,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Applies a function to an existing entry and writes the result back atomically.
    ///
    /// The key of the entry can not be changed. Returns `None` without calling the function if no
    /// entry exists.
    fn update_materialized_entity_set<F>(
        &self,
        key: &EntitySetAssemblyKey,
        f: F,
    ) -> impl Future<Output = Result<Option<MaterializedEntitySet>, Self::Error>> + Send
    where
        F: FnOnce(&mut MaterializedEntitySet) + Send;

    /// Removes an entry and its mirror. Returns `true` if the entry existed.
    fn remove_materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Sets the given flags on an entry. Returns the resulting flags, `None` if no entry exists.
    fn add_flags(
        &self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
    ) -> impl Future<Output = Result<Option<SyncFlags>, Self::Error>> + Send;

    /// Clears the given flags on an entry. Returns the resulting flags, `None` if no entry exists.
    fn remove_flags(
        &self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
    ) -> impl Future<Output = Result<Option<SyncFlags>, Self::Error>> + Send;

    /// All organizations' entries of one entity set.
    fn materialized_entity_sets_by_entity_set(
        &self,
        entity_set_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<MaterializedEntitySet>, Self::Error>> + Send;

    /// All entries of one organization.
    fn materialized_entity_sets_by_organization(
        &self,
        organization_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<MaterializedEntitySet>, Self::Error>> + Send;

    /// Entries which have any of the given flags set.
    fn flagged_materialized_entity_sets(
        &self,
        flags: SyncFlags,
    ) -> impl Future<Output = Result<Vec<MaterializedEntitySet>, Self::Error>> + Send;

    /// Entries due for an automatic data refresh at the given time, see
    /// `MaterializedEntitySet::is_refreshable`.
    fn refreshable_materialized_entity_sets(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<MaterializedEntitySet>, Self::Error>> + Send;
}
