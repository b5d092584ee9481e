// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use tessera_core::{AclKey, Principal};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthorizationError<E>
where
    E: Error + 'static,
{
    /// The change would leave the object without a user holding OWNER.
    #[error("removing OWNER from {principal} would leave {acl_key} without a user owner")]
    PreconditionFailed {
        acl_key: AclKey,
        principal: Principal,
    },

    /// No access control entries exist for the object.
    #[error("no permissions found for {0}")]
    NotFound(AclKey),

    /// Error occurred in the permission store.
    #[error(transparent)]
    Store(E),
}
