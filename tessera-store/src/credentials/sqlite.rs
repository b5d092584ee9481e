// SPDX-License-Identifier: MIT OR Apache-2.0

use sqlx::{SqliteConnection, query, query_as};
use tessera_core::{DbCredential, Principal};

use crate::credentials::CredentialStore;
use crate::sqlite::{SqliteError, SqliteStore};

async fn select_credential(
    connection: &mut SqliteConnection,
    principal: &Principal,
) -> Result<Option<DbCredential>, SqliteError> {
    let row: Option<(String, String)> = query_as(
        "
        SELECT
            username,
            password
        FROM
            db_credentials_v1
        WHERE
            principal_type = ?
            AND principal_id = ?
        ",
    )
    .bind(principal.principal_type().as_str())
    .bind(principal.id())
    .fetch_optional(&mut *connection)
    .await?;

    Ok(row.map(|(username, password)| DbCredential { username, password }))
}

impl CredentialStore for SqliteStore {
    type Error = SqliteError;

    async fn get_credential(
        &self,
        principal: &Principal,
    ) -> Result<Option<DbCredential>, Self::Error> {
        let mut connection = self.pool.acquire().await?;
        select_credential(&mut connection, principal).await
    }

    async fn insert_credential_if_absent(
        &self,
        principal: &Principal,
        credential: DbCredential,
    ) -> Result<DbCredential, Self::Error> {
        let mut write = self.begin_write().await?;

        // A clash on the username of another principal is reported as an error.
        query(
            "
            INSERT INTO
                db_credentials_v1 (
                    principal_type,
                    principal_id,
                    username,
                    password
                )
            VALUES
                (?, ?, ?, ?)
            ON CONFLICT (principal_type, principal_id) DO NOTHING
            ",
        )
        .bind(principal.principal_type().as_str())
        .bind(principal.id())
        .bind(&credential.username)
        .bind(&credential.password)
        .execute(&mut *write.tx)
        .await?;

        let stored = select_credential(&mut write.tx, principal)
            .await?
            .unwrap_or(credential);

        write.commit().await?;
        Ok(stored)
    }

    async fn update_password(
        &self,
        principal: &Principal,
        password: String,
    ) -> Result<Option<DbCredential>, Self::Error> {
        let mut write = self.begin_write().await?;

        query(
            "
            UPDATE
                db_credentials_v1
            SET
                password = ?
            WHERE
                principal_type = ?
                AND principal_id = ?
            ",
        )
        .bind(&password)
        .bind(principal.principal_type().as_str())
        .bind(principal.id())
        .execute(&mut *write.tx)
        .await?;

        let updated = select_credential(&mut write.tx, principal).await?;
        write.commit().await?;
        Ok(updated)
    }

    async fn remove_credential(&self, principal: &Principal) -> Result<bool, Self::Error> {
        let mut write = self.begin_write().await?;
        let result = query(
            "
            DELETE FROM
                db_credentials_v1
            WHERE
                principal_type = ?
                AND principal_id = ?
            ",
        )
        .bind(principal.principal_type().as_str())
        .bind(principal.id())
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
