// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tessera_core::Timestamp;

use crate::leases::LeaseStore;
use crate::memory::MemoryStore;

#[derive(Clone, Debug)]
struct Lease {
    holder: String,
    expires_at: Timestamp,
}

#[derive(Clone, Debug, Default)]
pub struct LeaseMemoryStore {
    inner: Arc<Mutex<HashMap<String, Lease>>>,
}

impl LeaseMemoryStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Lease>> {
        self.inner.lock().expect("acquire lock on lease store")
    }
}

impl LeaseStore for MemoryStore {
    type Error = Infallible;

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let mut leases = self.leases.lock();

        if let Some(lease) = leases.get(name)
            && lease.holder != holder
            && lease.expires_at > now
        {
            return Ok(false);
        }

        leases.insert(
            name.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now.saturating_add(ttl.as_millis() as Timestamp),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<bool, Self::Error> {
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some(lease) if lease.holder == holder => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
