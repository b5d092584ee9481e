// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use sqlx::query;
use tessera_core::Timestamp;
use tracing::trace;

use crate::leases::LeaseStore;
use crate::sqlite::{SqliteError, SqliteStore, encode_u64};

impl LeaseStore for SqliteStore {
    type Error = SqliteError;

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let expires_at = now.saturating_add(ttl.as_millis() as Timestamp);

        let mut write = self.begin_write().await?;

        // The upsert only takes over a lease from another holder after it expired.
        let result = query(
            "
            INSERT INTO
                task_leases_v1 (
                    name,
                    holder,
                    expires_at
                )
            VALUES
                (?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE
                task_leases_v1.holder = excluded.holder
                OR task_leases_v1.expires_at <= ?
            ",
        )
        .bind(name)
        .bind(holder)
        .bind(encode_u64(expires_at))
        .bind(encode_u64(now))
        .execute(&mut *write.tx)
        .await?;

        write.commit().await?;

        let acquired = result.rows_affected() > 0;
        trace!(name, holder, acquired, "try acquire lease");
        Ok(acquired)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<bool, Self::Error> {
        let mut write = self.begin_write().await?;
        let result = query("DELETE FROM task_leases_v1 WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&mut *write.tx)
            .await?;
        write.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
