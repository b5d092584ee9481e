// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission-aware materialization of entity sets into organization databases.
//!
//! Every organization owns a database into which it can project entity sets as materialized
//! views. Which columns a view has depends on the MATERIALIZE permissions of the organization,
//! which of them a member can select depends on the member's READ permissions.
//!
//! The [`MaterializationCoordinator`] reacts to domain events by flagging entries of the
//! materialized-set registry. Two reconciliation tasks, [`PermissionSyncTask`] and
//! [`DataRefreshTask`], run once per period across the whole cluster and converge the
//! organization databases towards the flagged state:
//!
//! ```text
//! domain events -> coordinator flags registry entries
//!               -> reconciliation tasks scan flagged entries
//!               -> coordinator issues statements against organization databases
//!               -> flags are cleared on success
//! ```
//!
//! Organization databases are a derived cache. Failing or slow databases leave flags set and the
//! next tick retries.
pub mod config;
mod coordinator;
mod credentials;
pub mod directory;
mod error;
mod offload;
pub mod sql;
pub mod tasks;
pub mod tenant;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(feature = "postgres")]
pub use config::PostgresConfiguration;
pub use config::AssemblyConfiguration;
pub use coordinator::{AuthorizedPropertyTypes, MaterializationCoordinator};
pub use credentials::CredentialManager;
pub use error::{AssemblyError, TenantError};
pub use offload::Offloader;
pub use tasks::{DataRefreshTask, PermissionSyncTask, ReconciliationTask, Scheduler, TickReport};
