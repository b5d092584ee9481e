// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::permission::SecurableObjectType;
use crate::principal::Principal;

/// Domain events which can make materialized entity sets go stale.
///
/// Delivery is at-least-once, handling an event twice only sets the same flags again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssemblyEvent {
    /// Rows of an entity set were written or deleted.
    EntitySetDataChanged { entity_set_id: Uuid },

    /// Properties of an entity set (and with that the columns of its views) changed.
    EntitySetSchemaChanged { entity_set_id: Uuid },

    /// An entity set got a new name, views named after it need to follow.
    EntitySetRenamed { entity_set_id: Uuid, name: String },

    /// An entity set was deleted.
    EntitySetDeleted { entity_set_id: Uuid },

    /// MATERIALIZE permission of an organization principal changed on entity sets or properties
    /// within them.
    MaterializationPermissionChanged {
        principal: Principal,
        entity_set_ids: BTreeSet<Uuid>,
        object_type: SecurableObjectType,
    },

    /// Principals joined an organization.
    MembersAdded {
        organization_id: Uuid,
        principals: BTreeSet<Principal>,
    },

    /// Principals left an organization.
    MembersRemoved {
        organization_id: Uuid,
        principals: BTreeSet<Principal>,
    },
}
