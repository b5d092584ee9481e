// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to the entity graph and the organization membership services.
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;

use tessera_core::Principal;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySet {
    pub id: Uuid,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyType {
    pub id: Uuid,
    pub name: String,
}

/// Entity sets and their property types as known to the entity graph.
pub trait EntitySetCatalog {
    type Error: Error + Send + Sync + 'static;

    fn entity_set(
        &self,
        entity_set_id: &Uuid,
    ) -> impl Future<Output = Result<Option<EntitySet>, Self::Error>> + Send;

    /// Property types of an entity set, keyed by their id.
    fn property_types(
        &self,
        entity_set_id: &Uuid,
    ) -> impl Future<Output = Result<BTreeMap<Uuid, PropertyType>, Self::Error>> + Send;
}

/// Members of organizations.
pub trait OrganizationDirectory {
    type Error: Error + Send + Sync + 'static;

    fn members(
        &self,
        organization_id: &Uuid,
    ) -> impl Future<Output = Result<BTreeSet<Principal>, Self::Error>> + Send;

    /// Organizations the principal is a member of.
    fn organizations_of(
        &self,
        principal: &Principal,
    ) -> impl Future<Output = Result<BTreeSet<Uuid>, Self::Error>> + Send;
}
