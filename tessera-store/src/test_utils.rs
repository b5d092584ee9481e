// SPDX-License-Identifier: MIT OR Apache-2.0

/// Macro to run the same test logic against all store backend implementations.
///
/// This macro takes a closure that will be executed against each store type:
/// - In-memory store (`MemoryStore`)
/// - SQLite store (`SqliteStore`), backed by a fresh, randomly named in-memory database
///
/// ## Example
///
/// ```rust
/// # use tessera_core::{AceKey, AceValue, AclKey, Permissions, Principal, SecurableObjectType};
/// # use tessera_store::{AclStore, assert_all_stores};
/// # async fn run() {
/// assert_all_stores!(|store| async {
///     let key = AceKey::new(AclKey::entity_set(uuid::Uuid::new_v4()), Principal::user("alice"));
///     let value = AceValue::new(Permissions::READ, SecurableObjectType::EntitySet);
///     store.put_ace(key.clone(), value.clone()).await.unwrap();
///     assert_eq!(store.get_ace(&key).await.unwrap(), Some(value));
/// });
/// # }
/// ```
#[macro_export]
macro_rules! assert_all_stores {
    (|$store:ident| $test_body:expr) => {
        // Test with MemoryStore.
        {
            let $store = $crate::MemoryStore::default();
            $test_body.await;
        }

        // Test with SqliteStore.
        {
            let $store = $crate::SqliteStore::temporary().await;
            $test_body.await;
        }
    };
}
