// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tessera_core::{
    Ace, AceKey, AceValue, Acl, AclKey, AssemblyEvent, Permission, Permissions, Principal,
    PrincipalType, SecurableObjectType, Timestamp, now,
};
use tessera_store::{AcePredicate, AclStore};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::algebra::{merge, overwrite, subtract};
use crate::error::AuthorizationError;

/// Authorization engine on top of a permission store.
///
/// All mutations are applied per access control entry through the store's atomic update
/// primitive. Removing OWNER from a principal is only allowed while at least one other principal
/// of type USER holds OWNER on the same object.
///
/// Changes of MATERIALIZE held by an organization principal on entity sets or their properties
/// are announced as [`AssemblyEvent::MaterializationPermissionChanged`] if an event sender is
/// configured.
#[derive(Clone, Debug)]
pub struct AuthorizationManager<S> {
    store: S,
    events: Option<mpsc::Sender<AssemblyEvent>>,
}

impl<S> AuthorizationManager<S>
where
    S: AclStore + Sync,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            events: None,
        }
    }

    /// Announce materialization relevant permission changes on this channel.
    pub fn with_events(mut self, events: mpsc::Sender<AssemblyEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Overwrites the permissions of a principal on an object.
    ///
    /// Fails with `PreconditionFailed` if the principal holds OWNER, the new entry wouldn't hold it
    /// anymore at the time of the call and no other user would remain owner. An empty permission
    /// set removes the entry.
    pub async fn set_permission(
        &self,
        acl_key: &AclKey,
        principal: &Principal,
        object_type: SecurableObjectType,
        permissions: Permissions,
        expiration: Timestamp,
    ) -> Result<(), AuthorizationError<S::Error>> {
        let now = now();
        let key = AceKey::new(acl_key.clone(), principal.clone());

        if !permissions.contains(Permissions::OWNER) || expiration <= now {
            self.ensure_other_owner(&key, now).await?;
        }

        let mut previous = None;
        let next = self
            .store
            .update_ace(&key, |current| {
                previous = current;
                overwrite(permissions, object_type, expiration)
            })
            .await
            .map_err(AuthorizationError::Store)?;

        debug!(%acl_key, %principal, ?permissions, "set permissions");

        self.announce(&key, object_type, previous, next, Permissions::empty(), now)
            .await;
        Ok(())
    }

    /// Unites permissions into the existing ones of a principal, the later expiration wins.
    ///
    /// Adding is idempotent and never violates owner safety.
    pub async fn add_permission(
        &self,
        acl_key: &AclKey,
        principal: &Principal,
        object_type: SecurableObjectType,
        permissions: Permissions,
        expiration: Timestamp,
    ) -> Result<(), AuthorizationError<S::Error>> {
        let now = now();
        let key = AceKey::new(acl_key.clone(), principal.clone());

        let mut previous = None;
        let next = self
            .store
            .update_ace(&key, |current| {
                previous = current.clone();
                Some(merge(current, permissions, object_type, expiration, now))
            })
            .await
            .map_err(AuthorizationError::Store)?;

        debug!(%acl_key, %principal, ?permissions, "add permissions");

        self.announce(&key, object_type, previous, next, permissions, now)
            .await;
        Ok(())
    }

    /// Removes permissions from a principal. Removing permissions which are not held is a no-op.
    ///
    /// Fails with `PreconditionFailed` if OWNER is removed from a principal holding it and no
    /// other user would remain owner.
    pub async fn remove_permission(
        &self,
        acl_key: &AclKey,
        principal: &Principal,
        permissions: Permissions,
    ) -> Result<(), AuthorizationError<S::Error>> {
        let now = now();
        let key = AceKey::new(acl_key.clone(), principal.clone());

        if permissions.contains(Permissions::OWNER) {
            self.ensure_other_owner(&key, now).await?;
        }

        let mut previous = None;
        let next = self
            .store
            .update_ace(&key, |current| {
                previous = current.clone();
                subtract(current, permissions)
            })
            .await
            .map_err(AuthorizationError::Store)?;

        let Some(object_type) = previous.as_ref().map(|value| value.object_type) else {
            return Ok(());
        };

        debug!(%acl_key, %principal, ?permissions, "remove permissions");

        self.announce(&key, object_type, previous, next, permissions, now)
            .await;
        Ok(())
    }

    /// Removes the access control entries of an object and all objects nested below it.
    ///
    /// Used when the object itself is deleted, owner safety does not apply.
    pub async fn delete_permissions(
        &self,
        acl_key: &AclKey,
    ) -> Result<usize, AuthorizationError<S::Error>> {
        let acl_keys: BTreeSet<AclKey> = self
            .store
            .query_aces(&AcePredicate::new().acl_key_prefix(acl_key.clone()))
            .await
            .map_err(AuthorizationError::Store)?
            .into_iter()
            .map(|(key, _)| key.acl_key)
            .collect();

        let mut removed = 0;
        for acl_key in &acl_keys {
            removed += self
                .store
                .remove_acl_key(acl_key)
                .await
                .map_err(AuthorizationError::Store)?;
        }

        debug!(%acl_key, removed, "delete permissions");
        Ok(removed)
    }

    /// Purges entries which expired at the given time. Returns the number of removed entries.
    pub async fn remove_expired_permissions(
        &self,
        now: Timestamp,
    ) -> Result<usize, AuthorizationError<S::Error>> {
        let removed = self
            .store
            .remove_expired(now)
            .await
            .map_err(AuthorizationError::Store)?;
        if removed > 0 {
            debug!(removed, "removed expired permissions");
        }
        Ok(removed)
    }

    /// Answers for every requested permission on every object if any of the principals holds it.
    pub async fn authorize(
        &self,
        requests: &HashMap<AclKey, Permissions>,
        principals: &[Principal],
    ) -> Result<HashMap<AclKey, BTreeMap<Permission, bool>>, AuthorizationError<S::Error>> {
        let held = self
            .held_permissions(requests.keys().cloned(), principals)
            .await?;

        Ok(requests
            .iter()
            .map(|(acl_key, requested)| {
                let held = held.get(acl_key).copied().unwrap_or_default();
                let answers = requested
                    .permissions()
                    .map(|permission| (permission, held.has(permission)))
                    .collect();
                (acl_key.clone(), answers)
            })
            .collect())
    }

    /// Union of all non-expired permissions the principals hold on an object.
    pub async fn get_permissions(
        &self,
        acl_key: &AclKey,
        principals: &[Principal],
    ) -> Result<Permissions, AuthorizationError<S::Error>> {
        let held = self
            .held_permissions([acl_key.clone()], principals)
            .await?;
        Ok(held.get(acl_key).copied().unwrap_or_default())
    }

    /// Returns `true` if the principals together hold all required permissions on an object.
    pub async fn check_if_has_permissions(
        &self,
        acl_key: &AclKey,
        principals: &[Principal],
        required: Permissions,
    ) -> Result<bool, AuthorizationError<S::Error>> {
        Ok(self
            .get_permissions(acl_key, principals)
            .await?
            .contains(required))
    }

    /// Objects of a type on which at least one principal holds exactly the given permission set.
    ///
    /// Supersets do not match, callers ask for every bit pattern they are interested in.
    pub async fn get_authorized_objects_of_type(
        &self,
        principals: &[Principal],
        object_type: SecurableObjectType,
        permissions: Permissions,
    ) -> Result<BTreeSet<AclKey>, AuthorizationError<S::Error>> {
        let predicate = AcePredicate::new()
            .principals(principals.iter().cloned())
            .object_type(object_type)
            .permissions_exact(permissions)
            .not_expired_at(now());
        self.acl_keys(&predicate).await
    }

    /// Objects on which at least one principal holds at least the given permissions.
    pub async fn get_authorized_objects(
        &self,
        principals: &[Principal],
        permissions: Permissions,
    ) -> Result<BTreeSet<AclKey>, AuthorizationError<S::Error>> {
        let predicate = AcePredicate::new()
            .principals(principals.iter().cloned())
            .permissions_contain(permissions)
            .not_expired_at(now());
        self.acl_keys(&predicate).await
    }

    /// Objects nested below a parent object on which at least one principal holds at least the
    /// given permissions.
    pub async fn get_authorized_objects_within(
        &self,
        parent: &AclKey,
        principals: &[Principal],
        permissions: Permissions,
    ) -> Result<BTreeSet<AclKey>, AuthorizationError<S::Error>> {
        let predicate = AcePredicate::new()
            .acl_key_prefix(parent.clone())
            .principals(principals.iter().cloned())
            .permissions_contain(permissions)
            .not_expired_at(now());
        let mut acl_keys = self.acl_keys(&predicate).await?;
        acl_keys.remove(parent);
        Ok(acl_keys)
    }

    /// All principals holding OWNER on each of the objects.
    pub async fn get_owners_for_securable_objects(
        &self,
        acl_keys: &[AclKey],
    ) -> Result<HashMap<AclKey, BTreeSet<Principal>>, AuthorizationError<S::Error>> {
        let predicate = AcePredicate::new()
            .acl_keys(acl_keys.iter().cloned())
            .permissions_contain(Permissions::OWNER)
            .not_expired_at(now());

        let mut owners: HashMap<AclKey, BTreeSet<Principal>> = HashMap::new();
        for (key, _) in self
            .store
            .query_aces(&predicate)
            .await
            .map_err(AuthorizationError::Store)?
        {
            owners.entry(key.acl_key).or_default().insert(key.principal);
        }
        Ok(owners)
    }

    /// Full permission list of an object including expired entries.
    pub async fn get_acl(&self, acl_key: &AclKey) -> Result<Acl, AuthorizationError<S::Error>> {
        self.get_acls(std::slice::from_ref(acl_key))
            .await?
            .pop()
            .ok_or_else(|| AuthorizationError::NotFound(acl_key.clone()))
    }

    /// Permission lists of all given objects, objects without any entry are left out.
    pub async fn get_acls(
        &self,
        acl_keys: &[AclKey],
    ) -> Result<Vec<Acl>, AuthorizationError<S::Error>> {
        let entries = self
            .store
            .query_aces(&AcePredicate::new().acl_keys(acl_keys.iter().cloned()))
            .await
            .map_err(AuthorizationError::Store)?;

        let mut acls: BTreeMap<AclKey, Acl> = BTreeMap::new();
        for (key, value) in entries {
            acls.entry(key.acl_key.clone())
                .or_insert_with(|| Acl {
                    acl_key: key.acl_key,
                    aces: Vec::new(),
                })
                .aces
                .push(Ace {
                    principal: key.principal,
                    permissions: value.permissions,
                    expiration: value.expiration,
                });
        }
        Ok(acls.into_values().collect())
    }

    async fn held_permissions(
        &self,
        acl_keys: impl IntoIterator<Item = AclKey>,
        principals: &[Principal],
    ) -> Result<HashMap<AclKey, Permissions>, AuthorizationError<S::Error>> {
        let predicate = AcePredicate::new()
            .acl_keys(acl_keys)
            .principals(principals.iter().cloned())
            .not_expired_at(now());

        let mut held: HashMap<AclKey, Permissions> = HashMap::new();
        for (key, value) in self
            .store
            .query_aces(&predicate)
            .await
            .map_err(AuthorizationError::Store)?
        {
            *held.entry(key.acl_key).or_default() |= value.permissions;
        }
        Ok(held)
    }

    async fn acl_keys(
        &self,
        predicate: &AcePredicate,
    ) -> Result<BTreeSet<AclKey>, AuthorizationError<S::Error>> {
        Ok(self
            .store
            .query_aces(predicate)
            .await
            .map_err(AuthorizationError::Store)?
            .into_iter()
            .map(|(key, _)| key.acl_key)
            .collect())
    }

    /// Fails if the principal currently holds OWNER and is the last user doing so.
    async fn ensure_other_owner(
        &self,
        key: &AceKey,
        now: Timestamp,
    ) -> Result<(), AuthorizationError<S::Error>> {
        let holds_owner = self
            .store
            .get_ace(key)
            .await
            .map_err(AuthorizationError::Store)?
            .is_some_and(|value| value.granted(now).contains(Permissions::OWNER));

        if !holds_owner {
            return Ok(());
        }

        let predicate = AcePredicate::new()
            .acl_keys([key.acl_key.clone()])
            .principal_type(PrincipalType::User)
            .permissions_contain(Permissions::OWNER)
            .not_expired_at(now);

        let other_owner = self
            .store
            .query_aces(&predicate)
            .await
            .map_err(AuthorizationError::Store)?
            .iter()
            .any(|(owner, _)| owner.principal != key.principal);

        if other_owner {
            Ok(())
        } else {
            warn!(acl_key = %key.acl_key, principal = %key.principal, "rejected removal of last owner");
            Err(AuthorizationError::PreconditionFailed {
                acl_key: key.acl_key.clone(),
                principal: key.principal.clone(),
            })
        }
    }

    /// Announces changes of MATERIALIZE held by organizations on entity sets and their
    /// properties.
    ///
    /// Losing MATERIALIZE on the entity set itself removes the whole projection, gaining it is
    /// only relevant once an organization asks to materialize. Any change touching MATERIALIZE on
    /// a property changes the columns an organization may project.
    async fn announce(
        &self,
        key: &AceKey,
        object_type: SecurableObjectType,
        previous: Option<AceValue>,
        next: Option<AceValue>,
        touched: Permissions,
        now: Timestamp,
    ) {
        let Some(events) = &self.events else {
            return;
        };

        if key.principal.principal_type() != PrincipalType::Organization
            || !object_type.is_materializable()
        {
            return;
        }

        let had = previous
            .is_some_and(|value| value.granted(now).contains(Permissions::MATERIALIZE));
        let has = next.is_some_and(|value| value.granted(now).contains(Permissions::MATERIALIZE));

        let changed = match object_type {
            SecurableObjectType::EntitySet => had && !has,
            _ => had != has || touched.contains(Permissions::MATERIALIZE),
        };

        if !changed {
            return;
        }

        let event = AssemblyEvent::MaterializationPermissionChanged {
            principal: key.principal.clone(),
            entity_set_ids: BTreeSet::from([key.acl_key.root()]),
            object_type,
        };

        if events.send(event).await.is_err() {
            warn!(acl_key = %key.acl_key, "materialization event receiver was dropped");
        }
    }
}
