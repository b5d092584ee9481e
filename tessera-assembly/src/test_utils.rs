// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stand-ins for organization databases and the directory services.
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tessera_auth::AuthorizationManager;
use tessera_core::{AssemblyEvent, Principal};
use tessera_store::MemoryStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AssemblyConfiguration;
use crate::coordinator::MaterializationCoordinator;
use crate::directory::{EntitySet, EntitySetCatalog, OrganizationDirectory, PropertyType};
use crate::error::TenantError;
use crate::tenant::{ConnectionManager, TenantConnection, TenantConnector};

pub const DATABASE_PREFIX: &str = "org_";

pub type TestCoordinator =
    MaterializationCoordinator<MemoryStore, RecordingConnector, StaticDirectory>;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Coordinator over an in-memory store, recorded organization databases and a static directory.
///
/// Permission changes of the authorization manager are announced to the coordinator once its
/// event loop was spawned.
pub struct TestAssembly {
    pub coordinator: TestCoordinator,
    pub store: MemoryStore,
    pub connector: RecordingConnector,
    pub directory: StaticDirectory,
    events: Option<mpsc::Receiver<AssemblyEvent>>,
}

impl TestAssembly {
    pub fn new(config: AssemblyConfiguration) -> Self {
        let store = MemoryStore::default();
        let connector = RecordingConnector::new();
        let directory = StaticDirectory::new();
        let (sender, events) = config.event_channel();

        let coordinator = MaterializationCoordinator::new(
            config,
            AuthorizationManager::new(store.clone()).with_events(sender),
            ConnectionManager::new(connector.clone(), DATABASE_PREFIX),
            directory.clone(),
        );

        Self {
            coordinator,
            store,
            connector,
            directory,
            events: Some(events),
        }
    }

    pub fn spawn_event_loop(&mut self, token: CancellationToken) -> JoinHandle<()> {
        let events = self.events.take().expect("event loop spawned only once");
        tokio::spawn(self.coordinator.clone().run_events(events, token))
    }

    /// Name of the database of an organization.
    pub fn database(&self, organization_id: &Uuid) -> String {
        crate::sql::database_name(DATABASE_PREFIX, organization_id)
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    databases: BTreeSet<String>,
    statements: BTreeMap<String, Vec<String>>,
    failing: HashSet<String>,
    stalled: HashSet<String>,
}

/// Organization databases which record every committed statement instead of executing it.
///
/// Single databases can be told to fail or to never answer.
#[derive(Clone, Debug, Default)]
pub struct RecordingConnector {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().expect("acquire lock on recording connector")
    }

    pub fn databases(&self) -> BTreeSet<String> {
        self.lock().databases.clone()
    }

    /// All statements committed in a database, in order.
    pub fn statements(&self, database: &str) -> Vec<String> {
        self.lock()
            .statements
            .get(database)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed statements of a database containing the given text.
    pub fn statements_containing(&self, database: &str, text: &str) -> Vec<String> {
        self.statements(database)
            .into_iter()
            .filter(|statement| statement.contains(text))
            .collect()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    /// Lets every operation on the database fail as unreachable.
    pub fn fail(&self, database: &str, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(database.to_string());
        } else {
            state.failing.remove(database);
        }
    }

    /// Lets every operation on the database hang.
    pub fn stall(&self, database: &str, stalled: bool) {
        let mut state = self.lock();
        if stalled {
            state.stalled.insert(database.to_string());
        } else {
            state.stalled.remove(database);
        }
    }

    async fn check(&self, database: &str) -> Result<(), TenantError> {
        let (failing, stalled) = {
            let state = self.lock();
            (
                state.failing.contains(database),
                state.stalled.contains(database),
            )
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        if failing {
            return Err(TenantError::Unreachable(
                database.to_string(),
                "connection refused".to_string(),
            ));
        }

        Ok(())
    }
}

impl TenantConnector for RecordingConnector {
    type Connection = RecordingConnection;

    async fn create_database(&self, database: &str) -> Result<(), TenantError> {
        self.check(database).await?;
        self.lock().databases.insert(database.to_string());
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), TenantError> {
        self.check(database).await?;
        let mut state = self.lock();
        state.databases.remove(database);
        state.statements.remove(database);
        Ok(())
    }

    async fn connect(&self, database: &str) -> Result<RecordingConnection, TenantError> {
        self.check(database).await?;
        Ok(RecordingConnection {
            connector: self.clone(),
            database: database.to_string(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct RecordingConnection {
    connector: RecordingConnector,
    database: String,
}

impl TenantConnection for RecordingConnection {
    async fn execute(
        &self,
        statements: Vec<String>,
        _timeout: Duration,
    ) -> Result<(), TenantError> {
        self.connector.check(&self.database).await?;

        let mut state = self.connector.lock();
        if !state.databases.contains(&self.database) {
            return Err(TenantError::Statement(format!(
                "database \"{}\" does not exist",
                self.database
            )));
        }
        state
            .statements
            .entry(self.database.clone())
            .or_default()
            .extend(statements);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    entity_sets: BTreeMap<Uuid, EntitySet>,
    property_types: BTreeMap<Uuid, BTreeMap<Uuid, PropertyType>>,
    members: BTreeMap<Uuid, BTreeSet<Principal>>,
}

/// In-memory entity set catalog and organization directory.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().expect("acquire lock on static directory")
    }

    /// Adds an entity set with property types of the given names. Returns the property type ids
    /// in the same order.
    pub fn add_entity_set(
        &self,
        entity_set_id: Uuid,
        name: &str,
        properties: &[&str],
    ) -> Vec<Uuid> {
        let mut state = self.lock();
        state.entity_sets.insert(
            entity_set_id,
            EntitySet {
                id: entity_set_id,
                name: name.to_string(),
            },
        );

        let mut ids = Vec::with_capacity(properties.len());
        let property_types = state.property_types.entry(entity_set_id).or_default();
        for property in properties {
            let id = Uuid::new_v4();
            property_types.insert(
                id,
                PropertyType {
                    id,
                    name: property.to_string(),
                },
            );
            ids.push(id);
        }
        ids
    }

    pub fn rename_entity_set(&self, entity_set_id: Uuid, name: &str) {
        if let Some(entity_set) = self.lock().entity_sets.get_mut(&entity_set_id) {
            entity_set.name = name.to_string();
        }
    }

    pub fn remove_property_type(&self, entity_set_id: Uuid, property_type_id: Uuid) {
        if let Some(property_types) = self.lock().property_types.get_mut(&entity_set_id) {
            property_types.remove(&property_type_id);
        }
    }

    pub fn add_member(&self, organization_id: Uuid, principal: Principal) {
        self.lock()
            .members
            .entry(organization_id)
            .or_default()
            .insert(principal);
    }

    pub fn remove_member(&self, organization_id: Uuid, principal: &Principal) {
        if let Some(members) = self.lock().members.get_mut(&organization_id) {
            members.remove(principal);
        }
    }
}

impl EntitySetCatalog for StaticDirectory {
    type Error = Infallible;

    async fn entity_set(&self, entity_set_id: &Uuid) -> Result<Option<EntitySet>, Self::Error> {
        Ok(self.lock().entity_sets.get(entity_set_id).cloned())
    }

    async fn property_types(
        &self,
        entity_set_id: &Uuid,
    ) -> Result<BTreeMap<Uuid, PropertyType>, Self::Error> {
        Ok(self
            .lock()
            .property_types
            .get(entity_set_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl OrganizationDirectory for StaticDirectory {
    type Error = Infallible;

    async fn members(&self, organization_id: &Uuid) -> Result<BTreeSet<Principal>, Self::Error> {
        Ok(self
            .lock()
            .members
            .get(organization_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn organizations_of(
        &self,
        principal: &Principal,
    ) -> Result<BTreeSet<Uuid>, Self::Error> {
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|(_, members)| members.contains(principal))
            .map(|(organization_id, _)| *organization_id)
            .collect())
    }
}
