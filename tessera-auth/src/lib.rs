// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization engine of tessera.
//!
//! [`AuthorizationManager`] stores access control entries in any [`AclStore`], applies the
//! permission algebra (union on add, difference on remove, overwrite on set) atomically per entry
//! and guards the owner safety invariant: no object which has an owner can lose its last owner of
//! type USER.
//!
//! [`AclStore`]: tessera_store::AclStore
pub mod algebra;
mod error;
mod manager;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;

pub use error::AuthorizationError;
pub use manager::AuthorizationManager;
