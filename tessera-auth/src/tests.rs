// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeSet, HashMap};

use assert_matches::assert_matches;
use tessera_core::{
    AceKey, AclKey, AssemblyEvent, NEVER_EXPIRES, Permission, Permissions, Principal,
    SecurableObjectType, now,
};
use tessera_store::{AclStore, MemoryStore, assert_all_stores};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::test_utils::setup_logging;
use crate::{AuthorizationError, AuthorizationManager};

const ENTITY_SET: SecurableObjectType = SecurableObjectType::EntitySet;
const PROPERTY: SecurableObjectType = SecurableObjectType::PropertyTypeInEntitySet;

#[tokio::test]
async fn last_user_owner_can_not_be_removed() {
    setup_logging();

    assert_all_stores!(|store| async {
        let manager = AuthorizationManager::new(store);
        let acl_key = AclKey::entity_set(Uuid::new_v4());
        let alice = Principal::user("alice");
        let bob = Principal::user("bob");
        let admins = Principal::role("admins");

        manager
            .add_permission(&acl_key, &alice, ENTITY_SET, Permissions::OWNER, NEVER_EXPIRES)
            .await
            .unwrap();

        assert_matches!(
            manager
                .remove_permission(&acl_key, &alice, Permissions::OWNER)
                .await,
            Err(AuthorizationError::PreconditionFailed { principal, .. }) if principal == alice
        );

        // Owners which are not users don't count.
        manager
            .add_permission(&acl_key, &admins, ENTITY_SET, Permissions::OWNER, NEVER_EXPIRES)
            .await
            .unwrap();
        assert_matches!(
            manager
                .set_permission(&acl_key, &alice, ENTITY_SET, Permissions::READ, NEVER_EXPIRES)
                .await,
            Err(AuthorizationError::PreconditionFailed { .. })
        );

        // Expired owners don't count either.
        manager
            .add_permission(&acl_key, &bob, ENTITY_SET, Permissions::OWNER, 1)
            .await
            .unwrap();
        assert_matches!(
            manager
                .remove_permission(&acl_key, &alice, Permissions::OWNER | Permissions::READ)
                .await,
            Err(AuthorizationError::PreconditionFailed { .. })
        );

        // Keeping OWNER with an expiration in the past removes it as well.
        assert_matches!(
            manager
                .set_permission(&acl_key, &alice, ENTITY_SET, Permissions::OWNER, 1)
                .await,
            Err(AuthorizationError::PreconditionFailed { principal, .. }) if principal == alice
        );

        // The rejected calls didn't write anything.
        assert_eq!(
            manager.get_permissions(&acl_key, &[alice.clone()]).await.unwrap(),
            Permissions::OWNER
        );

        // With a second user owner the first one can step down.
        manager
            .add_permission(&acl_key, &bob, ENTITY_SET, Permissions::OWNER, NEVER_EXPIRES)
            .await
            .unwrap();
        manager
            .set_permission(&acl_key, &alice, ENTITY_SET, Permissions::READ, NEVER_EXPIRES)
            .await
            .unwrap();
        assert_eq!(
            manager.get_permissions(&acl_key, &[alice.clone()]).await.unwrap(),
            Permissions::READ
        );

        assert_matches!(
            manager
                .remove_permission(&acl_key, &bob, Permissions::OWNER)
                .await,
            Err(AuthorizationError::PreconditionFailed { .. })
        );

        // Removing OWNER from someone not holding it needs no check.
        manager
            .remove_permission(&acl_key, &alice, Permissions::OWNER)
            .await
            .unwrap();

        // Deleting the object removes everything.
        assert_eq!(manager.delete_permissions(&acl_key).await.unwrap(), 3);
        assert_matches!(
            manager.get_acl(&acl_key).await,
            Err(AuthorizationError::NotFound(_))
        );
    });
}

#[tokio::test]
async fn add_is_commutative() {
    assert_all_stores!(|store| async {
        let manager = AuthorizationManager::new(store);
        let alice = Principal::user("alice");
        let a = Permissions::READ | Permissions::DISCOVER;
        let b = Permissions::WRITE | Permissions::LINK;

        let key_1 = AclKey::entity_set(Uuid::new_v4());
        manager
            .add_permission(&key_1, &alice, ENTITY_SET, a, NEVER_EXPIRES)
            .await
            .unwrap();
        manager
            .add_permission(&key_1, &alice, ENTITY_SET, b, NEVER_EXPIRES)
            .await
            .unwrap();

        let key_2 = AclKey::entity_set(Uuid::new_v4());
        manager
            .add_permission(&key_2, &alice, ENTITY_SET, b, NEVER_EXPIRES)
            .await
            .unwrap();
        manager
            .add_permission(&key_2, &alice, ENTITY_SET, a, NEVER_EXPIRES)
            .await
            .unwrap();

        let held_1 = manager.get_permissions(&key_1, &[alice.clone()]).await.unwrap();
        let held_2 = manager.get_permissions(&key_2, &[alice.clone()]).await.unwrap();
        assert_eq!(held_1, a | b);
        assert_eq!(held_1, held_2);

        // Adding again changes nothing.
        manager
            .add_permission(&key_1, &alice, ENTITY_SET, a, NEVER_EXPIRES)
            .await
            .unwrap();
        assert_eq!(
            manager.get_permissions(&key_1, &[alice.clone()]).await.unwrap(),
            a | b
        );
    });
}

#[tokio::test]
async fn authorize_is_or_across_principals() {
    assert_all_stores!(|store| async {
        let manager = AuthorizationManager::new(store);
        let acl_key = AclKey::entity_set(Uuid::new_v4());
        let other_key = AclKey::entity_set(Uuid::new_v4());
        let reader = Principal::user("reader");
        let nobody = Principal::role("nobody");

        manager
            .add_permission(&acl_key, &reader, ENTITY_SET, Permissions::READ, NEVER_EXPIRES)
            .await
            .unwrap();

        let requests = HashMap::from([
            (acl_key.clone(), Permissions::READ | Permissions::WRITE),
            (other_key.clone(), Permissions::READ),
        ]);
        let result = manager
            .authorize(&requests, &[reader.clone(), nobody.clone()])
            .await
            .unwrap();

        assert!(result[&acl_key][&Permission::Read]);
        assert!(!result[&acl_key][&Permission::Write]);
        assert!(!result[&other_key][&Permission::Read]);

        // The union of all principals needs to cover the requirement.
        manager
            .add_permission(&acl_key, &nobody, ENTITY_SET, Permissions::WRITE, NEVER_EXPIRES)
            .await
            .unwrap();
        assert!(
            manager
                .check_if_has_permissions(
                    &acl_key,
                    &[reader.clone(), nobody.clone()],
                    Permissions::READ | Permissions::WRITE
                )
                .await
                .unwrap()
        );
        assert!(
            !manager
                .check_if_has_permissions(
                    &acl_key,
                    &[reader.clone()],
                    Permissions::READ | Permissions::WRITE
                )
                .await
                .unwrap()
        );
    });
}

#[tokio::test]
async fn expired_permissions_are_absent() {
    assert_all_stores!(|store| async {
        let manager = AuthorizationManager::new(store);
        let acl_key = AclKey::entity_set(Uuid::new_v4());
        let alice = Principal::user("alice");

        manager
            .add_permission(&acl_key, &alice, ENTITY_SET, Permissions::READ, 1)
            .await
            .unwrap();

        assert_eq!(
            manager.get_permissions(&acl_key, &[alice.clone()]).await.unwrap(),
            Permissions::empty()
        );

        // The expired entry is still part of the full permission list until purged.
        assert_eq!(manager.get_acl(&acl_key).await.unwrap().aces.len(), 1);
        assert_eq!(manager.remove_expired_permissions(now()).await.unwrap(), 1);
        assert!(manager.get_acls(&[acl_key.clone()]).await.unwrap().is_empty());
    });
}

#[tokio::test]
async fn authorized_objects_match_exactly() {
    assert_all_stores!(|store| async {
        let manager = AuthorizationManager::new(store);
        let alice = Principal::user("alice");
        let read_only = AclKey::entity_set(Uuid::new_v4());
        let read_write = AclKey::entity_set(Uuid::new_v4());
        let property = AclKey::property(read_only.root(), Uuid::new_v4());

        manager
            .add_permission(&read_only, &alice, ENTITY_SET, Permissions::READ, NEVER_EXPIRES)
            .await
            .unwrap();
        manager
            .add_permission(
                &read_write,
                &alice,
                ENTITY_SET,
                Permissions::READ | Permissions::WRITE,
                NEVER_EXPIRES,
            )
            .await
            .unwrap();
        manager
            .add_permission(&property, &alice, PROPERTY, Permissions::READ, NEVER_EXPIRES)
            .await
            .unwrap();

        assert_eq!(
            manager
                .get_authorized_objects_of_type(&[alice.clone()], ENTITY_SET, Permissions::READ)
                .await
                .unwrap(),
            BTreeSet::from([read_only.clone()])
        );
        assert_eq!(
            manager
                .get_authorized_objects_of_type(
                    &[alice.clone()],
                    ENTITY_SET,
                    Permissions::READ | Permissions::WRITE
                )
                .await
                .unwrap(),
            BTreeSet::from([read_write.clone()])
        );

        // "At least" matches supersets and all object types.
        assert_eq!(
            manager
                .get_authorized_objects(&[alice.clone()], Permissions::READ)
                .await
                .unwrap(),
            BTreeSet::from([read_only.clone(), read_write.clone(), property.clone()])
        );
        assert_eq!(
            manager
                .get_authorized_objects_within(&read_only, &[alice.clone()], Permissions::READ)
                .await
                .unwrap(),
            BTreeSet::from([property.clone()])
        );
    });
}

#[tokio::test]
async fn owners_of_objects() {
    assert_all_stores!(|store| async {
        let manager = AuthorizationManager::new(store);
        let acl_key_1 = AclKey::entity_set(Uuid::new_v4());
        let acl_key_2 = AclKey::entity_set(Uuid::new_v4());
        let alice = Principal::user("alice");
        let bob = Principal::user("bob");

        for (acl_key, principal) in [(&acl_key_1, &alice), (&acl_key_1, &bob), (&acl_key_2, &bob)]
        {
            manager
                .add_permission(acl_key, principal, ENTITY_SET, Permissions::OWNER, NEVER_EXPIRES)
                .await
                .unwrap();
        }

        let owners = manager
            .get_owners_for_securable_objects(&[acl_key_1.clone(), acl_key_2.clone()])
            .await
            .unwrap();
        assert_eq!(owners[&acl_key_1], BTreeSet::from([alice.clone(), bob.clone()]));
        assert_eq!(owners[&acl_key_2], BTreeSet::from([bob.clone()]));
    });
}

#[tokio::test]
async fn materialization_changes_are_announced() {
    let (sender, mut receiver) = mpsc::channel(16);
    let manager = AuthorizationManager::new(MemoryStore::new()).with_events(sender);

    let organization = Principal::organization(Uuid::new_v4());
    let entity_set_id = Uuid::new_v4();
    let entity_set = AclKey::entity_set(entity_set_id);
    let property = AclKey::property(entity_set_id, Uuid::new_v4());

    // Gaining MATERIALIZE on the entity set itself is not announced.
    manager
        .add_permission(
            &entity_set,
            &organization,
            ENTITY_SET,
            Permissions::MATERIALIZE | Permissions::READ,
            NEVER_EXPIRES,
        )
        .await
        .unwrap();
    assert!(receiver.try_recv().is_err());

    // Property level changes are.
    manager
        .add_permission(
            &property,
            &organization,
            PROPERTY,
            Permissions::MATERIALIZE | Permissions::READ,
            NEVER_EXPIRES,
        )
        .await
        .unwrap();
    assert_eq!(
        receiver.try_recv().unwrap(),
        AssemblyEvent::MaterializationPermissionChanged {
            principal: organization.clone(),
            entity_set_ids: BTreeSet::from([entity_set_id]),
            object_type: PROPERTY,
        }
    );

    // Changes not touching MATERIALIZE are not.
    manager
        .remove_permission(&property, &organization, Permissions::READ)
        .await
        .unwrap();
    assert!(receiver.try_recv().is_err());

    // Users are never announced.
    manager
        .add_permission(
            &property,
            &Principal::user("alice"),
            PROPERTY,
            Permissions::MATERIALIZE,
            NEVER_EXPIRES,
        )
        .await
        .unwrap();
    assert!(receiver.try_recv().is_err());

    // Losing MATERIALIZE on the entity set is.
    manager
        .remove_permission(&entity_set, &organization, Permissions::MATERIALIZE)
        .await
        .unwrap();
    assert_eq!(
        receiver.try_recv().unwrap(),
        AssemblyEvent::MaterializationPermissionChanged {
            principal: organization.clone(),
            entity_set_ids: BTreeSet::from([entity_set_id]),
            object_type: ENTITY_SET,
        }
    );

    // The store reflects all changes.
    assert!(
        manager
            .store()
            .get_ace(&AceKey::new(entity_set.clone(), organization.clone()))
            .await
            .unwrap()
            .is_some_and(|value| value.permissions == Permissions::READ)
    );
}
