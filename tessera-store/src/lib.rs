// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence layer of tessera.
//!
//! Every store is defined as a trait with an in-memory implementation (`MemoryStore`, gated by
//! the `memory` feature) and a SQLite implementation (`SqliteStore`, gated by the `sqlite`
//! feature). Both give the same guarantees:
//!
//! - Mutations of a single key through an `update_*` method are atomic with respect to other
//!   mutations of the same key. The closure sees the current value and its result is written back
//!   without anyone else interleaving.
//! - Queries over several keys are read-committed. They might observe some concurrent mutations
//!   and miss others, callers need to tolerate slightly stale results.
pub mod assemblies;
pub mod credentials;
pub mod leases;
#[cfg(feature = "memory")]
pub mod memory;
pub mod permissions;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test_utils"))]
mod test_utils;

pub use assemblies::AssemblyStore;
pub use credentials::CredentialStore;
pub use leases::LeaseStore;
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use permissions::{AclStore, AcePredicate};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteError, SqliteStore, SqliteStoreBuilder};
