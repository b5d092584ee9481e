// SPDX-License-Identifier: MIT OR Apache-2.0

use tessera_core::{
    AceKey, AceValue, AclKey, Permissions, Principal, PrincipalType, SecurableObjectType,
    Timestamp,
};

/// Conjunction of conditions over access control entries.
///
/// Every condition which is set needs to hold for an entry to match, unset conditions match
/// everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcePredicate {
    pub(crate) acl_keys: Option<Vec<AclKey>>,
    pub(crate) acl_key_prefix: Option<AclKey>,
    pub(crate) principals: Option<Vec<Principal>>,
    pub(crate) principal_type: Option<PrincipalType>,
    pub(crate) object_type: Option<SecurableObjectType>,
    pub(crate) permissions_exact: Option<Permissions>,
    pub(crate) permissions_contain: Option<Permissions>,
    pub(crate) not_expired_at: Option<Timestamp>,
}

impl AcePredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry belongs to one of the given objects.
    pub fn acl_keys(mut self, acl_keys: impl IntoIterator<Item = AclKey>) -> Self {
        self.acl_keys = Some(acl_keys.into_iter().collect());
        self
    }

    /// Entry belongs to the given object or any object nested below it.
    pub fn acl_key_prefix(mut self, prefix: AclKey) -> Self {
        self.acl_key_prefix = Some(prefix);
        self
    }

    /// Entry is held by one of the given principals.
    pub fn principals(mut self, principals: impl IntoIterator<Item = Principal>) -> Self {
        self.principals = Some(principals.into_iter().collect());
        self
    }

    pub fn principal_type(mut self, principal_type: PrincipalType) -> Self {
        self.principal_type = Some(principal_type);
        self
    }

    pub fn object_type(mut self, object_type: SecurableObjectType) -> Self {
        self.object_type = Some(object_type);
        self
    }

    /// Entry holds exactly this permission set, not more and not less.
    pub fn permissions_exact(mut self, permissions: Permissions) -> Self {
        self.permissions_exact = Some(permissions);
        self
    }

    /// Entry holds at least all of these permissions.
    pub fn permissions_contain(mut self, permissions: Permissions) -> Self {
        self.permissions_contain = Some(permissions);
        self
    }

    /// Entry did not expire at the given time.
    pub fn not_expired_at(mut self, now: Timestamp) -> Self {
        self.not_expired_at = Some(now);
        self
    }

    pub fn matches(&self, key: &AceKey, value: &AceValue) -> bool {
        if let Some(acl_keys) = &self.acl_keys
            && !acl_keys.contains(&key.acl_key)
        {
            return false;
        }

        if let Some(prefix) = &self.acl_key_prefix
            && !prefix.is_prefix_of(&key.acl_key)
        {
            return false;
        }

        if let Some(principals) = &self.principals
            && !principals.contains(&key.principal)
        {
            return false;
        }

        if let Some(principal_type) = self.principal_type
            && key.principal.principal_type() != principal_type
        {
            return false;
        }

        if let Some(object_type) = self.object_type
            && value.object_type != object_type
        {
            return false;
        }

        if let Some(permissions) = self.permissions_exact
            && value.permissions != permissions
        {
            return false;
        }

        if let Some(permissions) = self.permissions_contain
            && !value.permissions.contains(permissions)
        {
            return false;
        }

        if let Some(now) = self.not_expired_at
            && value.is_expired(now)
        {
            return false;
        }

        true
    }
}
