// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::permission::{Permissions, SecurableObjectType};
use crate::principal::Principal;
use crate::time::{NEVER_EXPIRES, Timestamp};

/// Ordered, non-empty sequence of ids addressing a securable object.
///
/// `[entity_set_id]` is an entity set, `[entity_set_id, property_type_id]` a property within that
/// entity set. A prefix of a key addresses the parent object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<Uuid>", into = "Vec<Uuid>"))]
pub struct AclKey(Vec<Uuid>);

impl AclKey {
    pub fn new(ids: Vec<Uuid>) -> Result<Self, AclKeyError> {
        if ids.is_empty() {
            return Err(AclKeyError::Empty);
        }
        Ok(Self(ids))
    }

    pub fn entity_set(entity_set_id: Uuid) -> Self {
        Self(vec![entity_set_id])
    }

    pub fn property(entity_set_id: Uuid, property_type_id: Uuid) -> Self {
        Self(vec![entity_set_id, property_type_id])
    }

    /// First id of the key, for entity set scoped keys this is the entity set id.
    pub fn root(&self) -> Uuid {
        self.0[0]
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Key of the parent object, `None` for top-level objects.
    pub fn parent(&self) -> Option<AclKey> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// Returns `true` if this key equals or is an ancestor of the other key.
    pub fn is_prefix_of(&self, other: &AclKey) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl TryFrom<Vec<Uuid>> for AclKey {
    type Error = AclKeyError;

    fn try_from(ids: Vec<Uuid>) -> Result<Self, Self::Error> {
        Self::new(ids)
    }
}

impl From<AclKey> for Vec<Uuid> {
    fn from(acl_key: AclKey) -> Self {
        acl_key.0
    }
}

impl Display for AclKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, id) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

impl FromStr for AclKey {
    type Err = AclKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let ids = value
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| Uuid::parse_str(part).map_err(|_| AclKeyError::InvalidId(part.to_string())))
            .collect::<Result<Vec<Uuid>, AclKeyError>>()?;
        Self::new(ids)
    }
}

#[derive(Debug, Error)]
pub enum AclKeyError {
    #[error("acl key must contain at least one id")]
    Empty,

    #[error("invalid id '{0}' in acl key")]
    InvalidId(String),
}

/// Physical key of the permission store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AceKey {
    pub acl_key: AclKey,
    pub principal: Principal,
}

impl AceKey {
    pub fn new(acl_key: AclKey, principal: Principal) -> Self {
        Self { acl_key, principal }
    }
}

/// Physical value of the permission store.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AceValue {
    pub permissions: Permissions,
    pub object_type: SecurableObjectType,
    pub expiration: Timestamp,
}

impl AceValue {
    pub fn new(permissions: Permissions, object_type: SecurableObjectType) -> Self {
        Self {
            permissions,
            object_type,
            expiration: NEVER_EXPIRES,
        }
    }

    /// Expirations beyond [`NEVER_EXPIRES`] are capped to it.
    pub fn with_expiration(mut self, expiration: Timestamp) -> Self {
        self.expiration = expiration.min(NEVER_EXPIRES);
        self
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration <= now
    }

    /// Permissions which are in effect at the given time, expired entries hold none.
    pub fn granted(&self, now: Timestamp) -> Permissions {
        if self.is_expired(now) {
            Permissions::empty()
        } else {
            self.permissions
        }
    }
}

/// One principal's permissions on an object.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ace {
    pub principal: Principal,
    pub permissions: Permissions,
    pub expiration: Timestamp,
}

impl Ace {
    pub fn new(principal: Principal, permissions: Permissions) -> Self {
        Self {
            principal,
            permissions,
            expiration: NEVER_EXPIRES,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration <= now
    }
}

/// Full permission list of an object.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Acl {
    pub acl_key: AclKey,
    pub aces: Vec<Ace>,
}
