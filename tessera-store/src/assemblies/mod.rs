// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of materialized entity sets and the organization assemblies they belong to.
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(test)]
mod tests;
mod traits;

#[cfg(feature = "memory")]
pub use memory::AssemblyMemoryStore;
pub use traits::AssemblyStore;
