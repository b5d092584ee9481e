// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use tessera_core::{AclKey, Principal};
use uuid::Uuid;

use crate::directory::PropertyType;
use crate::sql::ViewColumn;

/// Columns of a materialized view and the subset of them each organization member may read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizedPropertyTypes {
    /// Property types the organization holds MATERIALIZE on.
    pub columns: BTreeMap<Uuid, PropertyType>,

    /// Property types each member holds READ on, always a subset of the columns.
    pub by_principal: BTreeMap<Principal, BTreeSet<Uuid>>,
}

impl AuthorizedPropertyTypes {
    /// Keeps the property types of the entity set whose property key is among the materializable
    /// objects.
    pub fn new(
        property_types: BTreeMap<Uuid, PropertyType>,
        materializable: &BTreeSet<AclKey>,
    ) -> Self {
        let property_type_ids = property_ids(materializable);
        let columns = property_types
            .into_iter()
            .filter(|(id, _)| property_type_ids.contains(id))
            .collect();
        Self {
            columns,
            by_principal: BTreeMap::new(),
        }
    }

    /// Lets a member read the columns among the given readable objects.
    pub fn grant(&mut self, principal: Principal, readable: &BTreeSet<AclKey>) {
        let property_type_ids = property_ids(readable)
            .into_iter()
            .filter(|id| self.columns.contains_key(id))
            .collect();
        self.by_principal.insert(principal, property_type_ids);
    }

    pub fn column_ids(&self) -> BTreeSet<Uuid> {
        self.columns.keys().copied().collect()
    }

    /// Columns of the view, ordered by their name.
    pub fn view_columns(&self) -> Vec<ViewColumn> {
        let mut columns: Vec<ViewColumn> = self
            .columns
            .values()
            .map(|property_type| ViewColumn {
                property_type_id: property_type.id,
                name: property_type.name.clone(),
            })
            .collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        columns
    }

    /// Names of the readable columns per member.
    pub fn column_names_by_principal(
        &self,
    ) -> impl Iterator<Item = (&Principal, BTreeSet<String>)> + '_ {
        self.by_principal.iter().map(|(principal, ids)| {
            let names = ids
                .iter()
                .filter_map(|id| self.columns.get(id))
                .map(|property_type| property_type.name.clone())
                .collect();
            (principal, names)
        })
    }
}

/// Property type ids of `[entity_set_id, property_type_id]` keys.
fn property_ids(acl_keys: &BTreeSet<AclKey>) -> BTreeSet<Uuid> {
    acl_keys
        .iter()
        .filter(|acl_key| acl_key.depth() == 2)
        .map(|acl_key| acl_key.ids()[1])
        .collect()
}
