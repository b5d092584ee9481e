// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;
use std::time::Duration;

use tessera_auth::AuthorizationError;
use thiserror::Error;

/// Failure of an operation against an organization database.
#[derive(Debug, Error)]
pub enum TenantError {
    /// The database could not be reached.
    #[error("organization database {0} is unreachable: {1}")]
    Unreachable(String, String),

    /// The operation did not complete within the statement timeout.
    #[error("operation on organization database timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(#[from] sqlx::Error),

    /// The database rejected a statement.
    #[error("statement failed: {0}")]
    Statement(String),
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The operation is not allowed in the current state, retrying does not help.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Organization database unreachable or too slow, retried on the next reconciliation tick.
    #[error(transparent)]
    Transient(#[from] TenantError),

    /// Organization membership or entity set catalog could not be queried.
    #[error("directory lookup failed: {0}")]
    Directory(#[source] Box<dyn Error + Send + Sync + 'static>),

    /// Persisted state contradicts itself.
    #[error("inconsistent state: {0}")]
    Fatal(String),

    #[error("store error: {0}")]
    Store(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl AssemblyError {
    pub(crate) fn store<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Store(Box::new(err))
    }

    pub(crate) fn directory<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Directory(Box::new(err))
    }

    /// Returns `true` if the failed operation can succeed when retried later.
    ///
    /// Reconciliation leaves the flags of an entry set after a transient failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Directory(_))
    }
}

impl<E> From<AuthorizationError<E>> for AssemblyError
where
    E: Error + Send + Sync + 'static,
{
    fn from(err: AuthorizationError<E>) -> Self {
        match err {
            AuthorizationError::PreconditionFailed { .. } => {
                Self::PreconditionFailed(err.to_string())
            }
            AuthorizationError::NotFound(acl_key) => Self::NotFound(acl_key.to_string()),
            AuthorizationError::Store(err) => Self::store(err),
        }
    }
}
