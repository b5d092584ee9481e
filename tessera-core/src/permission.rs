// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single capability a principal can hold on a securable object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Permission {
    /// Permission to learn that an object exists.
    Discover,

    /// Permission to link entities of a data set with others.
    Link,

    /// Permission to project a data set into an organization's database.
    Materialize,

    /// Permission to read data.
    Read,

    /// Permission to write data.
    Write,

    /// Permission to manage permissions of an object.
    Owner,

    /// Permission to run integrations writing into a data set.
    Integrate,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::Discover,
        Permission::Link,
        Permission::Materialize,
        Permission::Read,
        Permission::Write,
        Permission::Owner,
        Permission::Integrate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Discover => "DISCOVER",
            Permission::Link => "LINK",
            Permission::Materialize => "MATERIALIZE",
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::Owner => "OWNER",
            Permission::Integrate => "INTEGRATE",
        }
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| ParseError::Unknown("permission", value.to_string()))
    }
}

bitflags! {
    /// Set of permissions with bitset semantics.
    ///
    /// The bit pattern is what the permission store persists and indexes, two sets are equal
    /// exactly when their bits are.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct Permissions: u16 {
        const DISCOVER = 1 << 0;
        const LINK = 1 << 1;
        const MATERIALIZE = 1 << 2;
        const READ = 1 << 3;
        const WRITE = 1 << 4;
        const OWNER = 1 << 5;
        const INTEGRATE = 1 << 6;
    }
}

impl Permissions {
    /// Returns `true` if the given single permission is part of this set.
    pub fn has(&self, permission: Permission) -> bool {
        self.contains(Permissions::from(permission))
    }

    /// Iterate over the single permissions contained in this set, in declaration order.
    pub fn permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL
            .into_iter()
            .filter(move |permission| self.has(*permission))
    }
}

impl From<Permission> for Permissions {
    fn from(permission: Permission) -> Self {
        match permission {
            Permission::Discover => Permissions::DISCOVER,
            Permission::Link => Permissions::LINK,
            Permission::Materialize => Permissions::MATERIALIZE,
            Permission::Read => Permissions::READ,
            Permission::Write => Permissions::WRITE,
            Permission::Owner => Permissions::OWNER,
            Permission::Integrate => Permissions::INTEGRATE,
        }
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Permissions::empty(), |acc, permission| {
                acc | Permissions::from(permission)
            })
    }
}

/// Kind of a securable object.
///
/// Denormalised onto every access control entry so "all entity sets I own" can be answered
/// without resolving the object first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SecurableObjectType {
    Organization,
    Role,
    App,
    EntityType,
    PropertyTypeInEntityType,
    EntitySet,
    PropertyTypeInEntitySet,
    Unknown,
}

impl SecurableObjectType {
    const ALL: [SecurableObjectType; 8] = [
        SecurableObjectType::Organization,
        SecurableObjectType::Role,
        SecurableObjectType::App,
        SecurableObjectType::EntityType,
        SecurableObjectType::PropertyTypeInEntityType,
        SecurableObjectType::EntitySet,
        SecurableObjectType::PropertyTypeInEntitySet,
        SecurableObjectType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurableObjectType::Organization => "Organization",
            SecurableObjectType::Role => "Role",
            SecurableObjectType::App => "App",
            SecurableObjectType::EntityType => "EntityType",
            SecurableObjectType::PropertyTypeInEntityType => "PropertyTypeInEntityType",
            SecurableObjectType::EntitySet => "EntitySet",
            SecurableObjectType::PropertyTypeInEntitySet => "PropertyTypeInEntitySet",
            SecurableObjectType::Unknown => "Unknown",
        }
    }

    /// Returns `true` for objects whose MATERIALIZE permission controls a projection into an
    /// organization database.
    pub fn is_materializable(&self) -> bool {
        matches!(
            self,
            SecurableObjectType::EntitySet | SecurableObjectType::PropertyTypeInEntitySet
        )
    }
}

impl Display for SecurableObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecurableObjectType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SecurableObjectType::ALL
            .into_iter()
            .find(|object_type| object_type.as_str() == value)
            .ok_or_else(|| ParseError::Unknown("securable object type", value.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    /// String does not name a known variant.
    #[error("unknown {0} '{1}'")]
    Unknown(&'static str, String),
}
