// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::time::Duration;

use sqlx::{FromRow, SqliteConnection, query, query_as};
use tessera_core::{
    EntitySetAssemblyKey, MaterializedEntitySet, OrganizationAssembly, SyncFlags, Timestamp,
};
use uuid::Uuid;

use crate::assemblies::AssemblyStore;
use crate::sqlite::{DecodeError, SqliteError, SqliteStore, decode, decode_u64, encode_u64};

const SELECT_ENTRIES: &str = "
    SELECT
        entity_set_id,
        organization_id,
        view_name,
        columns,
        refresh_rate,
        flags,
        last_refresh
    FROM
        materialized_entity_sets_v1
";

#[derive(FromRow, Debug)]
struct EntryRow {
    entity_set_id: String,
    organization_id: String,
    view_name: String,
    columns: String,
    refresh_rate: Option<i64>,
    flags: i64,
    last_refresh: i64,
}

fn decode_flags(value: i64) -> Result<SyncFlags, SqliteError> {
    u8::try_from(value)
        .ok()
        .and_then(SyncFlags::from_bits)
        .ok_or(SqliteError::Decode(
            "flags".into(),
            DecodeError::InvalidBits(value),
        ))
}

fn encode_columns(columns: &BTreeSet<Uuid>) -> String {
    columns
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<String>>()
        .join(",")
}

impl EntryRow {
    fn decode(self) -> Result<MaterializedEntitySet, SqliteError> {
        let key = EntitySetAssemblyKey::new(
            decode("entity_set_id", &self.entity_set_id)?,
            decode("organization_id", &self.organization_id)?,
        );

        let columns = self
            .columns
            .split(',')
            .filter(|column| !column.is_empty())
            .map(|column| decode::<Uuid>("columns", column))
            .collect::<Result<BTreeSet<Uuid>, SqliteError>>()?;

        let refresh_rate = self
            .refresh_rate
            .map(|millis| decode_u64("refresh_rate", millis).map(Duration::from_millis))
            .transpose()?;

        Ok(MaterializedEntitySet {
            key,
            view_name: self.view_name,
            columns,
            refresh_rate,
            flags: decode_flags(self.flags)?,
            last_refresh: decode_u64("last_refresh", self.last_refresh)?,
        })
    }
}

async fn select_entry(
    connection: &mut SqliteConnection,
    key: &EntitySetAssemblyKey,
) -> Result<Option<MaterializedEntitySet>, SqliteError> {
    let row: Option<EntryRow> = query_as(&format!(
        "{SELECT_ENTRIES} WHERE entity_set_id = ? AND organization_id = ?"
    ))
    .bind(key.entity_set_id.to_string())
    .bind(key.organization_id.to_string())
    .fetch_optional(&mut *connection)
    .await?;

    row.map(EntryRow::decode).transpose()
}

async fn upsert_entry(
    connection: &mut SqliteConnection,
    entry: &MaterializedEntitySet,
) -> Result<(), SqliteError> {
    // The organization assembly exists as long as it has entries.
    query(
        "
        INSERT OR IGNORE
        INTO
            organization_assemblies_v1 (
                organization_id,
                initialized
            )
        VALUES
            (?, FALSE)
        ",
    )
    .bind(entry.key.organization_id.to_string())
    .execute(&mut *connection)
    .await?;

    query(
        "
        INSERT INTO
            materialized_entity_sets_v1 (
                entity_set_id,
                organization_id,
                view_name,
                columns,
                refresh_rate,
                flags,
                last_refresh
            )
        VALUES
            (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (entity_set_id, organization_id) DO UPDATE SET
            view_name = excluded.view_name,
            columns = excluded.columns,
            refresh_rate = excluded.refresh_rate,
            flags = excluded.flags,
            last_refresh = excluded.last_refresh
        ",
    )
    .bind(entry.key.entity_set_id.to_string())
    .bind(entry.key.organization_id.to_string())
    .bind(&entry.view_name)
    .bind(encode_columns(&entry.columns))
    .bind(entry.refresh_rate.map(|rate| rate.as_millis() as i64))
    .bind(entry.flags.bits() as i64)
    .bind(encode_u64(entry.last_refresh))
    .execute(&mut *connection)
    .await?;

    Ok(())
}

async fn select_entries(
    store: &SqliteStore,
    condition: &str,
    bind: Option<String>,
) -> Result<Vec<MaterializedEntitySet>, SqliteError> {
    let sql = format!("{SELECT_ENTRIES} WHERE {condition} ORDER BY entity_set_id, organization_id");
    let mut select = query_as::<_, EntryRow>(&sql);
    if let Some(value) = bind {
        select = select.bind(value);
    }
    let rows = select.fetch_all(&store.pool).await?;
    rows.into_iter().map(EntryRow::decode).collect()
}

impl SqliteStore {
    async fn modify_entry(
        &self,
        key: &EntitySetAssemblyKey,
        f: impl FnOnce(&mut MaterializedEntitySet) + Send,
    ) -> Result<Option<MaterializedEntitySet>, SqliteError> {
        let mut write = self.begin_write().await?;

        let Some(mut entry) = select_entry(&mut write.tx, key).await? else {
            return Ok(None);
        };
        f(&mut entry);
        entry.key = *key;
        upsert_entry(&mut write.tx, &entry).await?;

        write.commit().await?;
        Ok(Some(entry))
    }
}

impl AssemblyStore for SqliteStore {
    type Error = SqliteError;

    async fn get_organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> Result<Option<OrganizationAssembly>, Self::Error> {
        let mut connection = self.pool.acquire().await?;

        let row: Option<(bool,)> = query_as(
            "
            SELECT
                initialized
            FROM
                organization_assemblies_v1
            WHERE
                organization_id = ?
            ",
        )
        .bind(organization_id.to_string())
        .fetch_optional(&mut *connection)
        .await?;

        let Some((initialized,)) = row else {
            return Ok(None);
        };

        // The flag mirror is derived from the entries, it can never diverge from them.
        let flags: Vec<(String, i64)> = query_as(
            "
            SELECT
                entity_set_id,
                flags
            FROM
                materialized_entity_sets_v1
            WHERE
                organization_id = ?
            ",
        )
        .bind(organization_id.to_string())
        .fetch_all(&mut *connection)
        .await?;

        let mut assembly = OrganizationAssembly::new(*organization_id);
        assembly.initialized = initialized;
        for (entity_set_id, value) in flags {
            assembly
                .materialized_entity_sets
                .insert(decode("entity_set_id", &entity_set_id)?, decode_flags(value)?);
        }

        Ok(Some(assembly))
    }

    async fn organization_assemblies(&self) -> Result<Vec<OrganizationAssembly>, Self::Error> {
        let organization_ids: Vec<(String,)> = query_as(
            "
            SELECT
                organization_id
            FROM
                organization_assemblies_v1
            ORDER BY
                organization_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut assemblies = Vec::with_capacity(organization_ids.len());
        for (organization_id,) in organization_ids {
            let organization_id: Uuid = decode("organization_id", &organization_id)?;
            // Concurrently removed organizations are skipped.
            if let Some(assembly) = self.get_organization_assembly(&organization_id).await? {
                assemblies.push(assembly);
            }
        }
        Ok(assemblies)
    }

    async fn set_organization_initialized(
        &self,
        organization_id: Uuid,
        initialized: bool,
    ) -> Result<(), Self::Error> {
        let mut write = self.begin_write().await?;
        query(
            "
            INSERT INTO
                organization_assemblies_v1 (
                    organization_id,
                    initialized
                )
            VALUES
                (?, ?)
            ON CONFLICT (organization_id) DO UPDATE SET
                initialized = excluded.initialized
            ",
        )
        .bind(organization_id.to_string())
        .bind(initialized)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await
    }

    async fn remove_organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> Result<bool, Self::Error> {
        let mut write = self.begin_write().await?;

        query("DELETE FROM materialized_entity_sets_v1 WHERE organization_id = ?")
            .bind(organization_id.to_string())
            .execute(&mut *write.tx)
            .await?;

        let result = query("DELETE FROM organization_assemblies_v1 WHERE organization_id = ?")
            .bind(organization_id.to_string())
            .execute(&mut *write.tx)
            .await?;

        write.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> Result<Option<MaterializedEntitySet>, Self::Error> {
        let mut connection = self.pool.acquire().await?;
        select_entry(&mut connection, key).await
    }

    async fn insert_materialized_entity_set(
        &self,
        entry: MaterializedEntitySet,
    ) -> Result<(), Self::Error> {
        let mut write = self.begin_write().await?;
        upsert_entry(&mut write.tx, &entry).await?;
        write.commit().await
    }

    async fn update_materialized_entity_set<F>(
        &self,
        key: &EntitySetAssemblyKey,
        f: F,
    ) -> Result<Option<MaterializedEntitySet>, Self::Error>
    where
        F: FnOnce(&mut MaterializedEntitySet) + Send,
    {
        self.modify_entry(key, f).await
    }

    async fn remove_materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> Result<bool, Self::Error> {
        let mut write = self.begin_write().await?;
        let result = query(
            "
            DELETE FROM
                materialized_entity_sets_v1
            WHERE
                entity_set_id = ?
                AND organization_id = ?
            ",
        )
        .bind(key.entity_set_id.to_string())
        .bind(key.organization_id.to_string())
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_flags(
        &self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
    ) -> Result<Option<SyncFlags>, Self::Error> {
        let entry = self
            .modify_entry(key, move |entry| entry.flags.insert(flags))
            .await?;
        Ok(entry.map(|entry| entry.flags))
    }

    async fn remove_flags(
        &self,
        key: &EntitySetAssemblyKey,
        flags: SyncFlags,
    ) -> Result<Option<SyncFlags>, Self::Error> {
        let entry = self
            .modify_entry(key, move |entry| entry.flags.remove(flags))
            .await?;
        Ok(entry.map(|entry| entry.flags))
    }

    async fn materialized_entity_sets_by_entity_set(
        &self,
        entity_set_id: &Uuid,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        select_entries(self, "entity_set_id = ?", Some(entity_set_id.to_string())).await
    }

    async fn materialized_entity_sets_by_organization(
        &self,
        organization_id: &Uuid,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        select_entries(
            self,
            "organization_id = ?",
            Some(organization_id.to_string()),
        )
        .await
    }

    async fn flagged_materialized_entity_sets(
        &self,
        flags: SyncFlags,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        select_entries(self, &format!("(flags & {}) != 0", flags.bits()), None).await
    }

    async fn refreshable_materialized_entity_sets(
        &self,
        now: Timestamp,
    ) -> Result<Vec<MaterializedEntitySet>, Self::Error> {
        let condition = format!(
            "refresh_rate IS NOT NULL AND (flags & {data}) != 0 AND (flags & {edm}) = 0",
            data = SyncFlags::DATA_UNSYNCHRONIZED.bits(),
            edm = SyncFlags::EDM_UNSYNCHRONIZED.bits(),
        );
        let entries = select_entries(self, &condition, None).await?;

        // Elapsed time is compared outside of SQL to keep the unsigned arithmetic of the model.
        Ok(entries
            .into_iter()
            .filter(|entry| entry.is_refreshable(now))
            .collect())
    }
}
