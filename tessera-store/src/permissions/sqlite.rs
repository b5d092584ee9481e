// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, query, query_as};
use tessera_core::{
    AceKey, AceValue, AclKey, Permissions, Principal, PrincipalType, SecurableObjectType,
    Timestamp,
};

use crate::permissions::{AcePredicate, AclStore};
use crate::sqlite::{DecodeError, SqliteError, SqliteStore, decode, decode_u64, encode_u64};

const SELECT_ACES: &str = "
    SELECT
        acl_key,
        principal_type,
        principal_id,
        object_type,
        permissions,
        expiration
    FROM
        aces_v1
";

/// A single access control entry row as it is stored in the database.
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
struct AceRow {
    acl_key: String,
    principal_type: String,
    principal_id: String,
    object_type: String,
    permissions: i64,
    expiration: i64,
}

impl AceRow {
    fn decode(self) -> Result<(AceKey, AceValue), SqliteError> {
        let acl_key: AclKey = decode("acl_key", &self.acl_key)?;
        let principal_type: PrincipalType = decode("principal_type", &self.principal_type)?;
        let object_type: SecurableObjectType = decode("object_type", &self.object_type)?;
        let permissions = u16::try_from(self.permissions)
            .ok()
            .and_then(Permissions::from_bits)
            .ok_or(SqliteError::Decode(
                "permissions".into(),
                DecodeError::InvalidBits(self.permissions),
            ))?;
        let expiration = decode_u64("expiration", self.expiration)?;

        Ok((
            AceKey::new(acl_key, Principal::new(principal_type, self.principal_id)),
            AceValue {
                permissions,
                object_type,
                expiration,
            },
        ))
    }
}

async fn select_ace(
    connection: &mut SqliteConnection,
    key: &AceKey,
) -> Result<Option<AceValue>, SqliteError> {
    let row: Option<AceRow> = query_as(&format!(
        "{SELECT_ACES} WHERE acl_key = ? AND principal_type = ? AND principal_id = ?"
    ))
    .bind(key.acl_key.to_string())
    .bind(key.principal.principal_type().as_str())
    .bind(key.principal.id())
    .fetch_optional(&mut *connection)
    .await?;

    row.map(|row| row.decode().map(|(_, value)| value))
        .transpose()
}

async fn upsert_ace(
    connection: &mut SqliteConnection,
    key: &AceKey,
    value: &AceValue,
) -> Result<(), SqliteError> {
    query(
        "
        INSERT INTO
            aces_v1 (
                acl_key,
                principal_type,
                principal_id,
                object_type,
                permissions,
                expiration
            )
        VALUES
            (?, ?, ?, ?, ?, ?)
        ON CONFLICT (acl_key, principal_type, principal_id) DO UPDATE SET
            object_type = excluded.object_type,
            permissions = excluded.permissions,
            expiration = excluded.expiration
        ",
    )
    .bind(key.acl_key.to_string())
    .bind(key.principal.principal_type().as_str())
    .bind(key.principal.id())
    .bind(value.object_type.as_str())
    .bind(value.permissions.bits() as i64)
    .bind(encode_u64(value.expiration))
    .execute(&mut *connection)
    .await?;

    Ok(())
}

async fn delete_ace(connection: &mut SqliteConnection, key: &AceKey) -> Result<bool, SqliteError> {
    let result = query(
        "
        DELETE FROM
            aces_v1
        WHERE
            acl_key = ?
            AND principal_type = ?
            AND principal_id = ?
        ",
    )
    .bind(key.acl_key.to_string())
    .bind(key.principal.principal_type().as_str())
    .bind(key.principal.id())
    .execute(&mut *connection)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Translate the predicate into a `WHERE` clause, conditions map to the indexed columns.
///
/// Returns `false` if the predicate can't match anything (an empty set of keys or principals).
fn push_predicate(builder: &mut QueryBuilder<'_, Sqlite>, predicate: &AcePredicate) -> bool {
    builder.push(" WHERE 1 = 1");

    if let Some(acl_keys) = &predicate.acl_keys {
        if acl_keys.is_empty() {
            return false;
        }
        builder.push(" AND acl_key IN (");
        let mut separated = builder.separated(", ");
        for acl_key in acl_keys {
            separated.push_bind(acl_key.to_string());
        }
        separated.push_unseparated(")");
    }

    if let Some(prefix) = &predicate.acl_key_prefix {
        builder
            .push(" AND (acl_key = ")
            .push_bind(prefix.to_string())
            .push(" OR acl_key LIKE ")
            .push_bind(format!("{prefix}/%"))
            .push(")");
    }

    if let Some(principals) = &predicate.principals {
        if principals.is_empty() {
            return false;
        }
        builder.push(" AND (");
        for (index, principal) in principals.iter().enumerate() {
            if index > 0 {
                builder.push(" OR ");
            }
            builder
                .push("(principal_type = ")
                .push_bind(principal.principal_type().as_str())
                .push(" AND principal_id = ")
                .push_bind(principal.id().to_string())
                .push(")");
        }
        builder.push(")");
    }

    if let Some(principal_type) = predicate.principal_type {
        builder
            .push(" AND principal_type = ")
            .push_bind(principal_type.as_str());
    }

    if let Some(object_type) = predicate.object_type {
        builder
            .push(" AND object_type = ")
            .push_bind(object_type.as_str());
    }

    if let Some(permissions) = predicate.permissions_exact {
        builder
            .push(" AND permissions = ")
            .push_bind(permissions.bits() as i64);
    }

    if let Some(permissions) = predicate.permissions_contain {
        builder
            .push(" AND (permissions & ")
            .push_bind(permissions.bits() as i64)
            .push(") = ")
            .push_bind(permissions.bits() as i64);
    }

    if let Some(now) = predicate.not_expired_at {
        builder.push(" AND expiration > ").push_bind(encode_u64(now));
    }

    true
}

impl AclStore for SqliteStore {
    type Error = SqliteError;

    async fn get_ace(&self, key: &AceKey) -> Result<Option<AceValue>, Self::Error> {
        let mut connection = self.pool.acquire().await?;
        select_ace(&mut connection, key).await
    }

    async fn get_aces(&self, keys: &[AceKey]) -> Result<HashMap<AceKey, AceValue>, Self::Error> {
        let mut connection = self.pool.acquire().await?;
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = select_ace(&mut connection, key).await? {
                result.insert(key.clone(), value);
            }
        }
        Ok(result)
    }

    async fn put_ace(&self, key: AceKey, value: AceValue) -> Result<(), Self::Error> {
        let mut write = self.begin_write().await?;
        upsert_ace(&mut write.tx, &key, &value).await?;
        write.commit().await
    }

    async fn put_aces(&self, entries: Vec<(AceKey, AceValue)>) -> Result<(), Self::Error> {
        let mut write = self.begin_write().await?;
        for (key, value) in &entries {
            upsert_ace(&mut write.tx, key, value).await?;
        }
        write.commit().await
    }

    async fn update_ace<F>(&self, key: &AceKey, f: F) -> Result<Option<AceValue>, Self::Error>
    where
        F: FnOnce(Option<AceValue>) -> Option<AceValue> + Send,
    {
        let mut write = self.begin_write().await?;

        let current = select_ace(&mut write.tx, key).await?;
        let next = f(current);

        match &next {
            Some(value) => upsert_ace(&mut write.tx, key, value).await?,
            None => {
                delete_ace(&mut write.tx, key).await?;
            }
        }

        write.commit().await?;
        Ok(next)
    }

    async fn remove_ace(&self, key: &AceKey) -> Result<bool, Self::Error> {
        let mut write = self.begin_write().await?;
        let removed = delete_ace(&mut write.tx, key).await?;
        write.commit().await?;
        Ok(removed)
    }

    async fn remove_acl_key(&self, acl_key: &AclKey) -> Result<usize, Self::Error> {
        let mut write = self.begin_write().await?;
        let result = query("DELETE FROM aces_v1 WHERE acl_key = ?")
            .bind(acl_key.to_string())
            .execute(&mut *write.tx)
            .await?;
        write.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn remove_expired(&self, now: Timestamp) -> Result<usize, Self::Error> {
        let mut write = self.begin_write().await?;
        let result = query("DELETE FROM aces_v1 WHERE expiration <= ?")
            .bind(encode_u64(now))
            .execute(&mut *write.tx)
            .await?;
        write.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn query_aces(
        &self,
        predicate: &AcePredicate,
    ) -> Result<Vec<(AceKey, AceValue)>, Self::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_ACES);
        if !push_predicate(&mut builder, predicate) {
            return Ok(Vec::new());
        }
        builder.push(" ORDER BY acl_key, principal_type, principal_id");

        let rows: Vec<AceRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(AceRow::decode).collect()
    }
}
