// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permission::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrincipalType {
    User,
    Role,
    Organization,
    App,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::User => "USER",
            PrincipalType::Role => "ROLE",
            PrincipalType::Organization => "ORGANIZATION",
            PrincipalType::App => "APP",
        }
    }
}

impl Display for PrincipalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PrincipalType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USER" => Ok(PrincipalType::User),
            "ROLE" => Ok(PrincipalType::Role),
            "ORGANIZATION" => Ok(PrincipalType::Organization),
            "APP" => Ok(PrincipalType::App),
            _ => Err(ParseError::Unknown("principal type", value.to_string())),
        }
    }
}

/// An identity which can hold permissions.
///
/// Identity is the pair of type and id, a user and a role with the same id are different
/// principals.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Principal {
    principal_type: PrincipalType,
    id: String,
}

impl Principal {
    pub fn new(principal_type: PrincipalType, id: impl Into<String>) -> Self {
        Self {
            principal_type,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(PrincipalType::User, id)
    }

    pub fn role(id: impl Into<String>) -> Self {
        Self::new(PrincipalType::Role, id)
    }

    /// Principal representing an organization as a whole, its id is the organization id.
    pub fn organization(organization_id: Uuid) -> Self {
        Self::new(PrincipalType::Organization, organization_id.to_string())
    }

    pub fn app(id: impl Into<String>) -> Self {
        Self::new(PrincipalType::App, id)
    }

    pub fn principal_type(&self) -> PrincipalType {
        self.principal_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Organization id of an organization principal.
    ///
    /// Returns `None` for other principal types or when the id is not a valid uuid.
    pub fn organization_id(&self) -> Option<Uuid> {
        match self.principal_type {
            PrincipalType::Organization => Uuid::parse_str(&self.id).ok(),
            _ => None,
        }
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.principal_type, self.id)
    }
}
