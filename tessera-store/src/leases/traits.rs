// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;
use std::time::Duration;

use tessera_core::Timestamp;

/// Named leases with a single holder.
///
/// A lease is held by whoever acquired it last until it expires. The current holder can extend it
/// at any time by acquiring it again, everyone else only after it expired or was released.
pub trait LeaseStore {
    type Error: Error + Send + Sync + 'static;

    /// Acquires or extends the lease until `now + ttl`.
    ///
    /// Returns `true` if the given holder holds the lease after the call.
    fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Gives up the lease if it is held by the given holder.
    ///
    /// Returns `true` if the lease was released.
    fn release_lease(
        &self,
        name: &str,
        holder: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
