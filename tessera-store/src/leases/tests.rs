// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use crate::assert_all_stores;
use crate::leases::LeaseStore;

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
async fn single_holder() {
    assert_all_stores!(|store| async {
        let now = 1_000_000;

        assert!(
            store
                .try_acquire_lease("refresh", "node-a", now, TTL)
                .await
                .unwrap()
        );

        // Another node has to wait for the lease to expire.
        assert!(
            !store
                .try_acquire_lease("refresh", "node-b", now + 1_000, TTL)
                .await
                .unwrap()
        );

        // The holder extends its lease.
        assert!(
            store
                .try_acquire_lease("refresh", "node-a", now + 30_000, TTL)
                .await
                .unwrap()
        );
        assert!(
            !store
                .try_acquire_lease("refresh", "node-b", now + 61_000, TTL)
                .await
                .unwrap()
        );

        // Expired leases can be taken over.
        assert!(
            store
                .try_acquire_lease("refresh", "node-b", now + 90_000, TTL)
                .await
                .unwrap()
        );

        // Leases with other names are independent.
        assert!(
            store
                .try_acquire_lease("permissions", "node-a", now + 90_000, TTL)
                .await
                .unwrap()
        );
    });
}

#[tokio::test]
async fn release() {
    assert_all_stores!(|store| async {
        let now = 1_000_000;

        store
            .try_acquire_lease("refresh", "node-a", now, TTL)
            .await
            .unwrap();

        // Only the holder can release.
        assert!(!store.release_lease("refresh", "node-b").await.unwrap());
        assert!(store.release_lease("refresh", "node-a").await.unwrap());

        assert!(
            store
                .try_acquire_lease("refresh", "node-b", now + 1_000, TTL)
                .await
                .unwrap()
        );
    });
}
