// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::assemblies::AssemblyMemoryStore;
use crate::credentials::CredentialMemoryStore;
use crate::leases::LeaseMemoryStore;
use crate::permissions::AclMemoryStore;

/// In-memory store.
///
/// This does not persist data permamently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
///
/// Cloned instances share the same underlying state, every sub-store is guarded by its own lock.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    pub(crate) aces: AclMemoryStore,
    pub(crate) assemblies: AssemblyMemoryStore,
    pub(crate) credentials: CredentialMemoryStore,
    pub(crate) leases: LeaseMemoryStore,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// Trait implementations are in the regarding modules, see for example `permissions` or
// `assemblies` etc.
