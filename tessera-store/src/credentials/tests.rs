// SPDX-License-Identifier: MIT OR Apache-2.0

use tessera_core::{DbCredential, Principal};

use crate::assert_all_stores;
use crate::credentials::CredentialStore;

#[tokio::test]
async fn first_credential_wins() {
    assert_all_stores!(|store| async {
        let alice = Principal::user("alice");

        assert!(store.get_credential(&alice).await.unwrap().is_none());

        let stored = store
            .insert_credential_if_absent(&alice, DbCredential::new("user_alice", "first"))
            .await
            .unwrap();
        assert_eq!(stored.password, "first");

        let stored = store
            .insert_credential_if_absent(&alice, DbCredential::new("user_alice", "second"))
            .await
            .unwrap();
        assert_eq!(stored.password, "first");
        assert_eq!(
            store.get_credential(&alice).await.unwrap(),
            Some(DbCredential::new("user_alice", "first"))
        );
    });
}

#[tokio::test]
async fn update_keeps_username() {
    assert_all_stores!(|store| async {
        let bob = Principal::user("bob");

        assert!(
            store
                .update_password(&bob, "secret".into())
                .await
                .unwrap()
                .is_none()
        );

        store
            .insert_credential_if_absent(&bob, DbCredential::new("user_bob", "old"))
            .await
            .unwrap();
        let updated = store
            .update_password(&bob, "new".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated, DbCredential::new("user_bob", "new"));

        assert!(store.remove_credential(&bob).await.unwrap());
        assert!(!store.remove_credential(&bob).await.unwrap());
        assert!(store.get_credential(&bob).await.unwrap().is_none());
    });
}
