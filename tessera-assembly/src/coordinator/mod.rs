// SPDX-License-Identifier: MIT OR Apache-2.0

//! Materialization of entity sets into organization databases.
mod events;
mod grants;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tessera_auth::AuthorizationManager;
use tessera_core::{
    AclKey, DbCredential, EntitySetAssemblyKey, MaterializedEntitySet, OrganizationAssembly,
    Permissions, Principal, SyncFlags, Timestamp, now,
};
use tessera_store::{AclStore, AssemblyStore, CredentialStore};
use tokio::time;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub use grants::AuthorizedPropertyTypes;

use crate::config::AssemblyConfiguration;
use crate::credentials::CredentialManager;
use crate::directory::{EntitySet, EntitySetCatalog, OrganizationDirectory};
use crate::error::{AssemblyError, TenantError};
use crate::offload::Offloader;
use crate::sql;
use crate::tenant::{ConnectionManager, TenantConnection, TenantConnector};

/// Keeps the materialized views and grants in organization databases in line with the
/// permission store and the materialized-set registry.
///
/// Domain events only set flags on registry entries. The reconciliation tasks pick flagged
/// entries up and call the operations of this coordinator, which talk to organization databases
/// and clear the flags again on success. Every operation against an organization database runs
/// on a bounded offload pool and is cut off after the configured statement timeout, a failed or
/// timed out operation leaves the flags untouched.
pub struct MaterializationCoordinator<S, C, D>
where
    C: TenantConnector,
{
    inner: Arc<CoordinatorInner<S, C, D>>,
}

struct CoordinatorInner<S, C, D>
where
    C: TenantConnector,
{
    config: AssemblyConfiguration,
    store: S,
    authorization: AuthorizationManager<S>,
    credentials: CredentialManager<S>,
    connections: ConnectionManager<C>,
    directory: D,
    offloader: Offloader,
}

impl<S, C, D> Clone for MaterializationCoordinator<S, C, D>
where
    C: TenantConnector,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, C, D> MaterializationCoordinator<S, C, D>
where
    S: AclStore + AssemblyStore + CredentialStore + Clone + Send + Sync + 'static,
    C: TenantConnector,
    D: EntitySetCatalog + OrganizationDirectory + Send + Sync + 'static,
{
    pub fn new(
        config: AssemblyConfiguration,
        authorization: AuthorizationManager<S>,
        connections: ConnectionManager<C>,
        directory: D,
    ) -> Self {
        let store = authorization.store().clone();
        let credentials = CredentialManager::new(store.clone(), config.password_length);
        let offloader = Offloader::new(config.max_concurrent_tenant_operations);
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                store,
                authorization,
                credentials,
                connections,
                directory,
                offloader,
            }),
        }
    }

    pub fn config(&self) -> &AssemblyConfiguration {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn authorization(&self) -> &AuthorizationManager<S> {
        &self.inner.authorization
    }

    pub fn credentials(&self) -> &CredentialManager<S> {
        &self.inner.credentials
    }

    pub fn connections(&self) -> &ConnectionManager<C> {
        &self.inner.connections
    }

    pub(crate) fn offloader(&self) -> &Offloader {
        &self.inner.offloader
    }

    /// Creates the database of an organization with the view schema and the organization role.
    ///
    /// Current members receive login roles which are members of the organization role. Does
    /// nothing if the organization was initialized before.
    pub async fn initialize_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<OrganizationAssembly, AssemblyError> {
        if let Some(assembly) = self.organization_assembly(&organization_id).await? {
            if assembly.initialized {
                trace!(%organization_id, "organization initialized already");
                return Ok(assembly);
            }
        }

        let database = self.inner.connections.database_name(&organization_id);
        let timeout = self.inner.config.statement_timeout;
        time::timeout(
            timeout,
            self.inner
                .connections
                .connector()
                .create_database(&database),
        )
        .await
        .map_err(|_| TenantError::Timeout(timeout))??;

        let schema = &self.inner.config.schema;
        let organization_role = organization_role(&organization_id);
        let mut statements = vec![
            sql::create_schema(schema),
            sql::create_group_role(&organization_role),
            sql::revoke_public_connect(&database),
            sql::grant_connect(&database, &organization_role),
            sql::grant_schema_usage(schema, &organization_role),
        ];

        let members = self
            .inner
            .directory
            .members(&organization_id)
            .await
            .map_err(AssemblyError::directory)?;
        for member in &members {
            statements.extend(self.member_statements(&organization_role, member).await?);
        }

        self.execute(&organization_id, statements).await?;
        self.inner
            .store
            .set_organization_initialized(organization_id, true)
            .await
            .map_err(AssemblyError::store)?;

        info!(%organization_id, members = members.len(), "initialized organization");
        self.organization_assembly(&organization_id)
            .await?
            .ok_or_else(|| AssemblyError::Fatal(format!("assembly of {organization_id} vanished")))
    }

    /// Drops the database of an organization and forgets all its materialized entity sets.
    ///
    /// Returns `false` if the organization was not known.
    pub async fn destroy_organization(&self, organization_id: Uuid) -> Result<bool, AssemblyError> {
        self.inner.connections.evict(&organization_id);

        let database = self.inner.connections.database_name(&organization_id);
        let timeout = self.inner.config.statement_timeout;
        time::timeout(
            timeout,
            self.inner.connections.connector().drop_database(&database),
        )
        .await
        .map_err(|_| TenantError::Timeout(timeout))??;

        let removed = self
            .inner
            .store
            .remove_organization_assembly(&organization_id)
            .await
            .map_err(AssemblyError::store)?;
        info!(%organization_id, "destroyed organization");
        Ok(removed)
    }

    /// Materializes entity sets into the database of an organization.
    ///
    /// The organization needs to hold MATERIALIZE on every entity set, otherwise nothing is
    /// materialized. Entity sets which are materialized already stay as they are.
    pub async fn materialize_entity_sets(
        &self,
        organization_id: Uuid,
        entity_set_ids: &BTreeSet<Uuid>,
        refresh_rate: Option<Duration>,
    ) -> Result<Vec<MaterializedEntitySet>, AssemblyError> {
        self.require_initialized(&organization_id).await?;

        let principal = Principal::organization(organization_id);
        let mut entity_sets = Vec::with_capacity(entity_set_ids.len());
        for entity_set_id in entity_set_ids {
            let permitted = self
                .inner
                .authorization
                .check_if_has_permissions(
                    &AclKey::entity_set(*entity_set_id),
                    std::slice::from_ref(&principal),
                    Permissions::MATERIALIZE,
                )
                .await?;
            if !permitted {
                return Err(AssemblyError::PreconditionFailed(format!(
                    "organization {organization_id} may not materialize entity set {entity_set_id}"
                )));
            }
            entity_sets.push(self.entity_set(entity_set_id).await?);
        }

        let jobs = entity_sets.into_iter().map(|entity_set| {
            let coordinator = self.clone();
            let key = EntitySetAssemblyKey::new(entity_set.id, organization_id);
            (key, async move {
                coordinator
                    .materialize_entity_set(organization_id, entity_set, refresh_rate)
                    .await
            })
        });
        let results = self.inner.offloader.run(jobs).await;
        collect_results(results)
    }

    async fn materialize_entity_set(
        &self,
        organization_id: Uuid,
        entity_set: EntitySet,
        refresh_rate: Option<Duration>,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = EntitySetAssemblyKey::new(entity_set.id, organization_id);
        if let Some(entry) = self.materialized_entity_set(&key).await? {
            debug!(%key, "entity set materialized already");
            return Ok(entry);
        }

        let authorized = self
            .authorized_property_types(organization_id, entity_set.id)
            .await?;
        let mut statements = vec![sql::create_materialized_view(
            &self.inner.config.schema,
            &entity_set.name,
            &self.inner.config.source_schema,
            &entity_set.id,
            &authorized.view_columns(),
        )];
        statements.extend(self.grant_statements(&entity_set.name, &authorized).await?);
        self.execute(&organization_id, statements).await?;

        let entry = MaterializedEntitySet::new(
            key,
            entity_set.name,
            authorized.column_ids(),
            refresh_rate,
            now(),
        );
        self.inner
            .store
            .insert_materialized_entity_set(entry.clone())
            .await
            .map_err(AssemblyError::store)?;
        info!(
            %key,
            view = %entry.view_name,
            columns = entry.columns.len(),
            "materialized entity set"
        );
        Ok(entry)
    }

    /// Refreshes the view of a materialized entity set and re-applies its column grants.
    ///
    /// Fails fast while the entity set waits for a schema rebuild or its removal. Clears the data
    /// and permission flags and sets the time of the last refresh.
    pub async fn refresh_materialized_entity_set(
        &self,
        organization_id: Uuid,
        entity_set_id: Uuid,
        now: Timestamp,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
        let entry = self.require_entry(&key).await?;

        let blocking = entry.flags
            & (SyncFlags::EDM_UNSYNCHRONIZED | SyncFlags::MATERIALIZE_PERMISSION_REMOVED);
        if !blocking.is_empty() {
            return Err(AssemblyError::PreconditionFailed(format!(
                "{key} can not be refreshed while flagged {blocking:?}"
            )));
        }

        let authorized = self
            .authorized_property_types(organization_id, entity_set_id)
            .await?;
        let columns = authorized.column_ids();
        let schema = &self.inner.config.schema;

        let mut statements = if columns == entry.columns {
            vec![sql::refresh_materialized_view(schema, &entry.view_name)]
        } else {
            debug!(%key, "authorized columns changed, rebuild view");
            vec![
                sql::drop_materialized_view(schema, &entry.view_name),
                sql::create_materialized_view(
                    schema,
                    &entry.view_name,
                    &self.inner.config.source_schema,
                    &entity_set_id,
                    &authorized.view_columns(),
                ),
            ]
        };
        statements.extend(self.grant_statements(&entry.view_name, &authorized).await?);
        self.execute(&organization_id, statements).await?;

        let entry = self
            .update_entry(&key, move |entry| {
                entry.flags.remove(
                    SyncFlags::DATA_UNSYNCHRONIZED
                        | SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED,
                );
                entry.columns = columns;
                entry.last_refresh = now;
            })
            .await?;
        debug!(%key, "refreshed materialized entity set");
        Ok(entry)
    }

    /// Recomputes and re-applies the column grants of materialized entity sets of an
    /// organization.
    ///
    /// Views are rebuilt if their columns changed or they wait for a schema rebuild. Clears the
    /// permission flag of every entry which succeeded.
    pub async fn update_materialized_entity_sets(
        &self,
        organization_id: Uuid,
        authorized: BTreeMap<Uuid, AuthorizedPropertyTypes>,
    ) -> Vec<(EntitySetAssemblyKey, Result<MaterializedEntitySet, AssemblyError>)> {
        let jobs = authorized.into_iter().map(|(entity_set_id, authorized)| {
            let coordinator = self.clone();
            let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
            (key, async move {
                coordinator
                    .update_materialized_entity_set(organization_id, entity_set_id, &authorized)
                    .await
            })
        });
        self.inner.offloader.run(jobs).await
    }

    pub async fn update_materialized_entity_set(
        &self,
        organization_id: Uuid,
        entity_set_id: Uuid,
        authorized: &AuthorizedPropertyTypes,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
        let entry = self.require_entry(&key).await?;
        let rebuild = entry.columns != authorized.column_ids()
            || entry.flags.contains(SyncFlags::EDM_UNSYNCHRONIZED);
        self.rematerialize(
            entry,
            authorized,
            rebuild,
            SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED,
        )
        .await
    }

    /// Rebuilds the view of a materialized entity set with the current name and columns of the
    /// entity set, the full rematerialization after schema changes.
    pub async fn synchronize_edm_changes(
        &self,
        organization_id: Uuid,
        entity_set_id: Uuid,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
        let entry = self.require_entry(&key).await?;
        let authorized = self
            .authorized_property_types(organization_id, entity_set_id)
            .await?;
        self.rematerialize(
            entry,
            &authorized,
            true,
            SyncFlags::EDM_UNSYNCHRONIZED | SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED,
        )
        .await
    }

    /// Re-applies grants and, if asked to, rebuilds the view, then clears the given flags.
    ///
    /// A rebuild always clears the schema flag as well.
    async fn rematerialize(
        &self,
        entry: MaterializedEntitySet,
        authorized: &AuthorizedPropertyTypes,
        rebuild: bool,
        mut cleared: SyncFlags,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = entry.key;
        if entry
            .flags
            .contains(SyncFlags::MATERIALIZE_PERMISSION_REMOVED)
        {
            return Err(AssemblyError::PreconditionFailed(format!(
                "{key} is about to be removed"
            )));
        }

        let schema = &self.inner.config.schema;
        let columns = authorized.column_ids();
        let (view_name, mut statements) = if rebuild {
            let entity_set = self.entity_set(&key.entity_set_id).await?;
            let statements = vec![
                sql::drop_materialized_view(schema, &entry.view_name),
                sql::create_materialized_view(
                    schema,
                    &entity_set.name,
                    &self.inner.config.source_schema,
                    &key.entity_set_id,
                    &authorized.view_columns(),
                ),
            ];
            cleared |= SyncFlags::EDM_UNSYNCHRONIZED;
            (entity_set.name, statements)
        } else {
            (entry.view_name, Vec::new())
        };
        statements.extend(self.grant_statements(&view_name, authorized).await?);
        self.execute(&key.organization_id, statements).await?;

        let entry = self
            .update_entry(&key, move |entry| {
                entry.flags.remove(cleared);
                entry.columns = columns;
                entry.view_name = view_name;
            })
            .await?;
        debug!(%key, rebuild, flags = ?entry.flags, "updated materialized entity set");
        Ok(entry)
    }

    pub async fn update_refresh_rate(
        &self,
        organization_id: Uuid,
        entity_set_id: Uuid,
        refresh_rate: Option<Duration>,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
        self.update_entry(&key, move |entry| entry.refresh_rate = refresh_rate)
            .await
    }

    /// Renames the view of a materialized entity set.
    ///
    /// The registry follows only after the database renamed the view. If the database fails,
    /// the entry is flagged for a schema rebuild, which recreates the view under its current
    /// name.
    pub async fn rename_materialized_entity_set(
        &self,
        organization_id: Uuid,
        entity_set_id: Uuid,
        name: String,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        let key = EntitySetAssemblyKey::new(entity_set_id, organization_id);
        let entry = self.require_entry(&key).await?;
        if entry.view_name == name {
            return Ok(entry);
        }

        let statement =
            sql::rename_materialized_view(&self.inner.config.schema, &entry.view_name, &name);
        if let Err(err) = self.execute(&organization_id, vec![statement]).await {
            warn!(%key, %err, "renaming view failed, flag for rebuild");
            self.inner
                .store
                .add_flags(&key, SyncFlags::EDM_UNSYNCHRONIZED)
                .await
                .map_err(AssemblyError::store)?;
            return Err(err);
        }

        self.update_entry(&key, move |entry| entry.view_name = name)
            .await
    }

    /// Drops the view of a materialized entity set with all its grants and removes the entry.
    ///
    /// Returns `false` if the entity set was not materialized.
    pub async fn delete_entity_set_assembly(
        &self,
        key: EntitySetAssemblyKey,
    ) -> Result<bool, AssemblyError> {
        let Some(entry) = self.materialized_entity_set(&key).await? else {
            return Ok(false);
        };

        let statement = sql::drop_materialized_view(&self.inner.config.schema, &entry.view_name);
        self.execute(&key.organization_id, vec![statement]).await?;

        let removed = self
            .inner
            .store
            .remove_materialized_entity_set(&key)
            .await
            .map_err(AssemblyError::store)?;
        info!(%key, "deleted materialized entity set");
        Ok(removed)
    }

    pub async fn delete_entity_set_assemblies(
        &self,
        keys: impl IntoIterator<Item = EntitySetAssemblyKey>,
    ) -> Vec<(EntitySetAssemblyKey, Result<bool, AssemblyError>)> {
        let jobs = keys.into_iter().map(|key| {
            let coordinator = self.clone();
            (key, async move { coordinator.delete_entity_set_assembly(key).await })
        });
        self.inner.offloader.run(jobs).await
    }

    /// Removes entity sets from the database of an organization.
    ///
    /// Returns the number of removed entries. Every entity set is attempted, the first failure is
    /// returned after all finished.
    pub async fn dematerialize_entity_sets(
        &self,
        organization_id: Uuid,
        entity_set_ids: &BTreeSet<Uuid>,
    ) -> Result<usize, AssemblyError> {
        let keys = entity_set_ids
            .iter()
            .map(|entity_set_id| EntitySetAssemblyKey::new(*entity_set_id, organization_id));
        let results = self.delete_entity_set_assemblies(keys).await;
        let removed = collect_results(results)?;
        Ok(removed.into_iter().filter(|removed| *removed).count())
    }

    /// Issues a new password to a principal and applies it in every initialized organization
    /// database the principal is a member of.
    ///
    /// The new password is stored before it is applied. If an organization database fails, the
    /// error is returned and that database keeps the previous password until
    /// [`Self::sync_credential`] succeeds for the principal.
    pub async fn roll_credential(
        &self,
        principal: &Principal,
    ) -> Result<DbCredential, AssemblyError> {
        let credential = self.inner.credentials.roll_credential(principal).await?;
        self.apply_credential(principal, &credential).await?;
        info!(%principal, "rolled database credential");
        Ok(credential)
    }

    /// Applies the stored password of a principal in every initialized organization database the
    /// principal is a member of.
    pub async fn sync_credential(
        &self,
        principal: &Principal,
    ) -> Result<DbCredential, AssemblyError> {
        let credential = self
            .inner
            .credentials
            .get_or_create_credential(principal)
            .await?;
        self.apply_credential(principal, &credential).await?;
        debug!(%principal, "synchronized database credential");
        Ok(credential)
    }

    /// Cached pools of the affected organizations are evicted.
    async fn apply_credential(
        &self,
        principal: &Principal,
        credential: &DbCredential,
    ) -> Result<(), AssemblyError> {
        let organization_ids = self
            .inner
            .directory
            .organizations_of(principal)
            .await
            .map_err(AssemblyError::directory)?;

        let mut jobs = Vec::new();
        for organization_id in organization_ids {
            let initialized = self
                .organization_assembly(&organization_id)
                .await?
                .is_some_and(|assembly| assembly.initialized);
            if !initialized {
                continue;
            }

            let coordinator = self.clone();
            let statement = sql::alter_role_password(&credential.username, &credential.password);
            jobs.push((organization_id, async move {
                let result = coordinator.execute(&organization_id, vec![statement]).await;
                coordinator.inner.connections.evict(&organization_id);
                result
            }));
        }

        let results = self.inner.offloader.run(jobs).await;
        collect_results(results)?;
        Ok(())
    }

    /// Property types an organization may materialize from an entity set and, per member, the
    /// ones the member may read.
    pub async fn authorized_property_types(
        &self,
        organization_id: Uuid,
        entity_set_id: Uuid,
    ) -> Result<AuthorizedPropertyTypes, AssemblyError> {
        let entity_set_key = AclKey::entity_set(entity_set_id);
        let property_types = self
            .inner
            .directory
            .property_types(&entity_set_id)
            .await
            .map_err(AssemblyError::directory)?;

        let materializable = self
            .inner
            .authorization
            .get_authorized_objects_within(
                &entity_set_key,
                &[Principal::organization(organization_id)],
                Permissions::MATERIALIZE,
            )
            .await?;
        let mut authorized = AuthorizedPropertyTypes::new(property_types, &materializable);

        let members = self
            .inner
            .directory
            .members(&organization_id)
            .await
            .map_err(AssemblyError::directory)?;
        for member in members {
            let readable = self
                .inner
                .authorization
                .get_authorized_objects_within(
                    &entity_set_key,
                    std::slice::from_ref(&member),
                    Permissions::READ,
                )
                .await?;
            authorized.grant(member, &readable);
        }

        Ok(authorized)
    }

    /// Revokes and re-grants SELECT on the authorized columns of a view to every member.
    async fn grant_statements(
        &self,
        view_name: &str,
        authorized: &AuthorizedPropertyTypes,
    ) -> Result<Vec<String>, AssemblyError> {
        let schema = &self.inner.config.schema;
        let mut statements = Vec::new();
        for (principal, columns) in authorized.column_names_by_principal() {
            let credential = self
                .inner
                .credentials
                .get_or_create_credential(principal)
                .await?;
            statements.push(sql::create_login_role(
                &credential.username,
                &credential.password,
            ));
            statements.push(sql::revoke_view(schema, view_name, &credential.username));
            statements.extend(sql::grant_select(
                schema,
                view_name,
                &columns,
                &credential.username,
            ));
        }
        Ok(statements)
    }

    /// Login role of a member which belongs to the organization role.
    async fn member_statements(
        &self,
        organization_role: &str,
        member: &Principal,
    ) -> Result<[String; 2], AssemblyError> {
        let credential = self
            .inner
            .credentials
            .get_or_create_credential(member)
            .await?;
        Ok([
            sql::create_login_role(&credential.username, &credential.password),
            sql::grant_role(organization_role, &credential.username),
        ])
    }

    /// Executes statements in one transaction against the database of an organization.
    async fn execute(
        &self,
        organization_id: &Uuid,
        statements: Vec<String>,
    ) -> Result<(), AssemblyError> {
        let timeout = self.inner.config.statement_timeout;
        trace!(%organization_id, statements = statements.len(), "execute on organization database");

        let connection = time::timeout(
            timeout,
            self.inner.connections.connect_to_organization(organization_id),
        )
        .await
        .map_err(|_| TenantError::Timeout(timeout))??;

        time::timeout(timeout, connection.execute(statements, timeout))
            .await
            .map_err(|_| TenantError::Timeout(timeout))??;
        Ok(())
    }

    async fn entity_set(&self, entity_set_id: &Uuid) -> Result<EntitySet, AssemblyError> {
        self.inner
            .directory
            .entity_set(entity_set_id)
            .await
            .map_err(AssemblyError::directory)?
            .ok_or_else(|| AssemblyError::NotFound(format!("entity set {entity_set_id}")))
    }

    async fn organization_assembly(
        &self,
        organization_id: &Uuid,
    ) -> Result<Option<OrganizationAssembly>, AssemblyError> {
        self.inner
            .store
            .get_organization_assembly(organization_id)
            .await
            .map_err(AssemblyError::store)
    }

    async fn require_initialized(
        &self,
        organization_id: &Uuid,
    ) -> Result<OrganizationAssembly, AssemblyError> {
        match self.organization_assembly(organization_id).await? {
            Some(assembly) if assembly.initialized => Ok(assembly),
            Some(_) => Err(AssemblyError::PreconditionFailed(format!(
                "organization {organization_id} is not initialized"
            ))),
            None => Err(AssemblyError::NotFound(format!(
                "organization {organization_id}"
            ))),
        }
    }

    async fn materialized_entity_set(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> Result<Option<MaterializedEntitySet>, AssemblyError> {
        self.inner
            .store
            .get_materialized_entity_set(key)
            .await
            .map_err(AssemblyError::store)
    }

    async fn require_entry(
        &self,
        key: &EntitySetAssemblyKey,
    ) -> Result<MaterializedEntitySet, AssemblyError> {
        self.materialized_entity_set(key)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("materialized entity set {key}")))
    }

    async fn update_entry<F>(
        &self,
        key: &EntitySetAssemblyKey,
        f: F,
    ) -> Result<MaterializedEntitySet, AssemblyError>
    where
        F: FnOnce(&mut MaterializedEntitySet) + Send,
    {
        self.inner
            .store
            .update_materialized_entity_set(key, f)
            .await
            .map_err(AssemblyError::store)?
            .ok_or_else(|| AssemblyError::NotFound(format!("materialized entity set {key}")))
    }
}

/// Group role of an organization, members' login roles belong to it.
pub(crate) fn organization_role(organization_id: &Uuid) -> String {
    sql::role_name(&Principal::organization(*organization_id))
}

/// Returns all successful results or the first failure, logging the other failures.
fn collect_results<K, T>(
    results: Vec<(K, Result<T, AssemblyError>)>,
) -> Result<Vec<T>, AssemblyError>
where
    K: std::fmt::Display,
{
    let mut values = Vec::with_capacity(results.len());
    let mut first_err = None;
    for (key, result) in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) if first_err.is_none() => first_err = Some(err),
            Err(err) => warn!(%key, %err, "operation failed"),
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
