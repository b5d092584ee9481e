// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-bound leases electing a single holder for cluster-wide tasks.
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(test)]
mod tests;
mod traits;

#[cfg(feature = "memory")]
pub use memory::LeaseMemoryStore;
pub use traits::LeaseStore;
