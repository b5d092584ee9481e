// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use tessera_core::{
    AssemblyEvent, EntitySetAssemblyKey, MaterializedEntitySet, Principal, SecurableObjectType,
    SyncFlags,
};
use tessera_store::{AclStore, AssemblyStore, CredentialStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::coordinator::{MaterializationCoordinator, organization_role};
use crate::directory::{EntitySetCatalog, OrganizationDirectory};
use crate::error::AssemblyError;
use crate::sql;
use crate::tenant::TenantConnector;

impl<S, C, D> MaterializationCoordinator<S, C, D>
where
    S: AclStore + AssemblyStore + CredentialStore + Clone + Send + Sync + 'static,
    C: TenantConnector,
    D: EntitySetCatalog + OrganizationDirectory + Send + Sync + 'static,
{
    /// Event loop dispatching domain events to their handlers until cancelled or all senders
    /// are gone.
    ///
    /// A failing handler is logged and does not stop the loop. Flags which could not be set are
    /// set again when the event is delivered again.
    pub async fn run_events(
        self,
        mut receiver: mpsc::Receiver<AssemblyEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("assembly event loop received shutdown signal");
                    break;
                }
                event = receiver.recv() => {
                    let Some(event) = event else {
                        debug!("all assembly event senders dropped");
                        break;
                    };

                    if let Err(err) = self.handle_event(event.clone()).await {
                        if err.is_transient() {
                            warn!(?event, %err, "failed handling assembly event");
                        } else {
                            error!(?event, %err, "failed handling assembly event");
                        }
                    }
                }
            }
        }
    }

    pub async fn handle_event(&self, event: AssemblyEvent) -> Result<(), AssemblyError> {
        match event {
            AssemblyEvent::EntitySetDataChanged { entity_set_id } => {
                self.on_entity_set_data_changed(entity_set_id).await?;
            }
            AssemblyEvent::EntitySetSchemaChanged { entity_set_id } => {
                self.on_entity_set_schema_changed(entity_set_id).await?;
            }
            AssemblyEvent::EntitySetRenamed {
                entity_set_id,
                name,
            } => {
                self.on_entity_set_renamed(entity_set_id, name).await?;
            }
            AssemblyEvent::EntitySetDeleted { entity_set_id } => {
                self.on_entity_set_deleted(entity_set_id).await?;
            }
            AssemblyEvent::MaterializationPermissionChanged {
                principal,
                entity_set_ids,
                object_type,
            } => {
                self.on_materialization_permission_changed(
                    &principal,
                    &entity_set_ids,
                    object_type,
                )
                .await?;
            }
            AssemblyEvent::MembersAdded {
                organization_id,
                principals,
            } => {
                self.on_members_added(organization_id, &principals).await?;
            }
            AssemblyEvent::MembersRemoved {
                organization_id,
                principals,
            } => {
                self.on_members_removed(organization_id, &principals)
                    .await?;
            }
        }
        Ok(())
    }

    /// Flags every organization's projection of the entity set as holding stale data.
    ///
    /// Returns the number of flagged entries.
    pub async fn on_entity_set_data_changed(
        &self,
        entity_set_id: Uuid,
    ) -> Result<usize, AssemblyError> {
        let entries = self.entries_of_entity_set(&entity_set_id).await?;
        self.flag_entries(entries, SyncFlags::DATA_UNSYNCHRONIZED)
            .await
    }

    /// Flags every organization's projection of the entity set for a schema rebuild.
    pub async fn on_entity_set_schema_changed(
        &self,
        entity_set_id: Uuid,
    ) -> Result<usize, AssemblyError> {
        let entries = self.entries_of_entity_set(&entity_set_id).await?;
        self.flag_entries(entries, SyncFlags::EDM_UNSYNCHRONIZED)
            .await
    }

    /// Flags the organization's projections of the entity sets.
    ///
    /// A change on an entity set itself means the organization lost MATERIALIZE on it and the
    /// projection is removed. A change on a property only needs the grants recomputed.
    pub async fn on_materialization_permission_changed(
        &self,
        principal: &Principal,
        entity_set_ids: &BTreeSet<Uuid>,
        object_type: SecurableObjectType,
    ) -> Result<usize, AssemblyError> {
        let Some(organization_id) = principal.organization_id() else {
            debug!(%principal, "ignore materialization change of non-organization principal");
            return Ok(0);
        };

        let flag = match object_type {
            SecurableObjectType::EntitySet => SyncFlags::MATERIALIZE_PERMISSION_REMOVED,
            _ => SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED,
        };

        let mut flagged = 0;
        for entity_set_id in entity_set_ids {
            let key = EntitySetAssemblyKey::new(*entity_set_id, organization_id);
            let flags = self
                .store()
                .add_flags(&key, flag)
                .await
                .map_err(AssemblyError::store)?;
            if flags.is_some() {
                debug!(%key, ?flag, "flagged materialized entity set");
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    /// Renames the views of the entity set in every organization.
    ///
    /// Organizations whose database failed are flagged for a schema rebuild. Returns the number
    /// of renamed views.
    pub async fn on_entity_set_renamed(
        &self,
        entity_set_id: Uuid,
        name: String,
    ) -> Result<usize, AssemblyError> {
        let entries = self.entries_of_entity_set(&entity_set_id).await?;
        let jobs = entries.into_iter().map(|entry| {
            let coordinator = self.clone();
            let name = name.clone();
            (entry.key, async move {
                coordinator
                    .rename_materialized_entity_set(
                        entry.key.organization_id,
                        entry.key.entity_set_id,
                        name,
                    )
                    .await
            })
        });

        let mut renamed = 0;
        for (key, result) in self.offloader().run(jobs).await {
            match result {
                Ok(_) => renamed += 1,
                Err(err) => warn!(%key, %err, "view keeps its old name until rebuilt"),
            }
        }
        Ok(renamed)
    }

    /// Removes the projections of a deleted entity set from every organization.
    pub async fn on_entity_set_deleted(&self, entity_set_id: Uuid) -> Result<usize, AssemblyError> {
        let keys: Vec<_> = self
            .entries_of_entity_set(&entity_set_id)
            .await?
            .into_iter()
            .map(|entry| entry.key)
            .collect();

        let mut removed = 0;
        let mut first_err = None;
        for (key, result) in self.delete_entity_set_assemblies(keys).await {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => (),
                Err(err) => {
                    warn!(%key, %err, "failed removing projection of deleted entity set");
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    /// Creates login roles for new members and adds them to the organization role.
    ///
    /// Column grants of the organization's entity sets are recomputed by the next permission
    /// sync.
    pub async fn on_members_added(
        &self,
        organization_id: Uuid,
        principals: &BTreeSet<Principal>,
    ) -> Result<(), AssemblyError> {
        if !self.is_initialized(&organization_id).await? {
            debug!(%organization_id, "ignore new members of uninitialized organization");
            return Ok(());
        }

        let organization_role = organization_role(&organization_id);
        let mut statements = Vec::new();
        for principal in principals {
            statements.extend(self.member_statements(&organization_role, principal).await?);
        }
        self.execute(&organization_id, statements).await?;

        self.flag_organization(&organization_id).await?;
        Ok(())
    }

    /// Revokes all access of removed members to the organization database right away.
    ///
    /// Column grants of the remaining members are recomputed by the next permission sync, also
    /// when revoking failed.
    pub async fn on_members_removed(
        &self,
        organization_id: Uuid,
        principals: &BTreeSet<Principal>,
    ) -> Result<(), AssemblyError> {
        if !self.is_initialized(&organization_id).await? {
            debug!(%organization_id, "ignore removed members of uninitialized organization");
            return Ok(());
        }

        let entries = self
            .store()
            .materialized_entity_sets_by_organization(&organization_id)
            .await
            .map_err(AssemblyError::store)?;

        let schema = &self.config().schema;
        let organization_role = organization_role(&organization_id);
        let mut statements = Vec::new();
        for principal in principals {
            let credential = self.credentials().get_or_create_credential(principal).await?;
            // REVOKE fails for unknown roles.
            statements.push(sql::create_login_role(
                &credential.username,
                &credential.password,
            ));
            for entry in &entries {
                statements.push(sql::revoke_view(
                    schema,
                    &entry.view_name,
                    &credential.username,
                ));
            }
            statements.push(sql::revoke_role(&organization_role, &credential.username));
        }

        let revoked = self.execute(&organization_id, statements).await;
        self.flag_entries(entries, SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED)
            .await?;
        revoked
    }

    async fn is_initialized(&self, organization_id: &Uuid) -> Result<bool, AssemblyError> {
        Ok(self
            .organization_assembly(organization_id)
            .await?
            .is_some_and(|assembly| assembly.initialized))
    }

    async fn entries_of_entity_set(
        &self,
        entity_set_id: &Uuid,
    ) -> Result<Vec<MaterializedEntitySet>, AssemblyError> {
        self.store()
            .materialized_entity_sets_by_entity_set(entity_set_id)
            .await
            .map_err(AssemblyError::store)
    }

    async fn flag_organization(&self, organization_id: &Uuid) -> Result<usize, AssemblyError> {
        let entries = self
            .store()
            .materialized_entity_sets_by_organization(organization_id)
            .await
            .map_err(AssemblyError::store)?;
        self.flag_entries(entries, SyncFlags::MATERIALIZE_PERMISSION_UNSYNCHRONIZED)
            .await
    }

    async fn flag_entries(
        &self,
        entries: Vec<MaterializedEntitySet>,
        flag: SyncFlags,
    ) -> Result<usize, AssemblyError> {
        let mut flagged = 0;
        for entry in entries {
            // Entries removed in the meantime are skipped.
            if self
                .store()
                .add_flags(&entry.key, flag)
                .await
                .map_err(AssemblyError::store)?
                .is_some()
            {
                debug!(key = %entry.key, ?flag, "flagged materialized entity set");
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}
