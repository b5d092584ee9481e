// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data types shared by the tessera permission store, authorization engine and
//! materialization coordinator.
//!
//! Securable objects are addressed by an [`AclKey`], permissions are held by a [`Principal`] in
//! form of an access control entry ([`Ace`]). Materialized projections of entity sets into an
//! organization's database are tracked per [`EntitySetAssemblyKey`] together with a set of
//! [`SyncFlags`] describing in which ways the projection went stale.
pub mod acl;
pub mod assembly;
pub mod credential;
pub mod events;
pub mod permission;
pub mod principal;
mod time;

pub use acl::{Ace, AceKey, AceValue, Acl, AclKey, AclKeyError};
pub use assembly::{EntitySetAssemblyKey, MaterializedEntitySet, OrganizationAssembly, SyncFlags};
pub use credential::DbCredential;
pub use events::AssemblyEvent;
pub use permission::{ParseError, Permission, Permissions, SecurableObjectType};
pub use principal::{Principal, PrincipalType};
pub use time::{NEVER_EXPIRES, Timestamp, now};
