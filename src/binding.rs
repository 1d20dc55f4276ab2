//! Binding-state resolution.
//!
//! A binding links a local project (and optionally individual modules) to a
//! remote project key on a named server connection. The [`BindingManager`]
//! owns that state and decides, for every operation, whether the project runs
//! in standalone or connected mode.

use crate::connection::ServerConnection;
use crate::engine::{
    AnalysisFacade, ConnectedEngine, ConnectedFacade, EngineRegistry, StandaloneFacade,
};
use crate::notifications::{BindingNotifications, Notifier};
use crate::settings::{GlobalSettings, ModuleSettings, ProjectSettings};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum InvalidBindingError {
    #[error("Project is not bound to a CodeScan project")]
    NotBound,

    #[error("Project has an invalid binding: no connection configured")]
    MissingConnectionName,

    #[error("Project has an invalid binding: no project key configured")]
    MissingProjectKey,

    #[error("Unable to find a connection with name: {0}")]
    UnknownConnection(String),

    #[error("No engine registered for connection '{0}'")]
    EngineNotRegistered(String),

    #[error("No standalone engine registered")]
    NoStandaloneEngine,
}

/// Identifies one module of the local project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub String);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        ModuleId(value.to_string())
    }
}

/// Association between a module and a remote project, including the path
/// prefix pair the engine uses to map IDE-relative paths onto server-side
/// paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBinding {
    pub project_key: String,
    pub server_path_prefix: String,
    pub ide_path_prefix: String,
}

impl ProjectBinding {
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            server_path_prefix: String::new(),
            ide_path_prefix: String::new(),
        }
    }
}

pub struct BindingManager {
    global: Arc<RwLock<GlobalSettings>>,
    project: Arc<RwLock<ProjectSettings>>,
    modules: DashMap<ModuleId, ModuleSettings>,
    registry: Arc<EngineRegistry>,
    notifications: BindingNotifications<Arc<dyn Notifier>>,
}

impl BindingManager {
    pub fn new(
        global: Arc<RwLock<GlobalSettings>>,
        project: Arc<RwLock<ProjectSettings>>,
        registry: Arc<EngineRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            global,
            project,
            modules: DashMap::new(),
            registry,
            notifications: BindingNotifications::new(notifier),
        }
    }

    pub fn project_settings(&self) -> ProjectSettings {
        self.project.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// The project key a module analyzes against: the module override when
    /// set, the project-level key otherwise.
    pub fn resolve_project_key(&self, module: &ModuleId) -> Option<String> {
        if let Some(settings) = self.modules.get(module) {
            if settings.is_binding_overridden() {
                return settings.project_key.clone();
            }
        }
        self.project
            .read()
            .ok()
            .and_then(|s| s.project_key.clone())
    }

    pub fn binding_for(&self, module: &ModuleId) -> Option<ProjectBinding> {
        self.resolve_project_key(module).map(ProjectBinding::new)
    }

    /// `None` when binding is disabled or the connection name does not match
    /// any configured connection.
    pub fn try_server_connection(&self) -> Option<ServerConnection> {
        let project = self.project.read().ok()?;
        if !project.binding_enabled {
            return None;
        }
        let name = project.connection_name.clone()?;
        drop(project);
        self.global
            .read()
            .ok()
            .and_then(|g| g.connection(&name).cloned())
    }

    pub fn server_connection(&self) -> Result<ServerConnection, InvalidBindingError> {
        self.try_server_connection().ok_or_else(|| {
            let name = self
                .project_settings()
                .connection_name
                .unwrap_or_default();
            InvalidBindingError::UnknownConnection(name)
        })
    }

    pub fn is_binding_valid(&self) -> bool {
        self.project_settings().is_bound() && self.try_server_connection().is_some()
    }

    pub fn connected_engine(&self) -> Result<Arc<dyn ConnectedEngine>, InvalidBindingError> {
        let settings = self.project_settings();
        if !settings.binding_enabled {
            return Err(InvalidBindingError::NotBound);
        }
        let connection_name = self.checked_connection_name(&settings)?;
        self.checked_project_key(&settings)?;
        self.registry
            .connected_engine(&connection_name)
            .ok_or(InvalidBindingError::EngineNotRegistered(connection_name))
    }

    /// Pick the facade matching the current configuration: connected when the
    /// project is bound, standalone otherwise.
    pub fn facade(&self, module: &ModuleId) -> Result<Box<dyn AnalysisFacade>, InvalidBindingError> {
        let settings = self.project_settings();
        if settings.binding_enabled {
            let connection_name = self.checked_connection_name(&settings)?;
            let project_key = self
                .resolve_project_key(module)
                .ok_or_else(|| self.notify_project_key_invalid())?;
            let engine = self
                .registry
                .connected_engine(&connection_name)
                .ok_or(InvalidBindingError::EngineNotRegistered(connection_name))?;
            return Ok(Box::new(ConnectedFacade::new(
                engine,
                project_key,
                settings.additional_properties,
            )));
        }

        let engine = self
            .registry
            .standalone_engine()
            .ok_or(InvalidBindingError::NoStandaloneEngine)?;
        Ok(Box::new(StandaloneFacade::new(
            engine,
            settings.additional_properties,
        )))
    }

    /// Bind the project to `project_key` on `connection`, with optional
    /// per-module overrides. Overrides for modules not listed are cleared.
    pub fn bind_to(
        &self,
        connection: &ServerConnection,
        project_key: &str,
        module_overrides: HashMap<ModuleId, String>,
    ) {
        if let Ok(mut project) = self.project.write() {
            project.bind_to(connection, project_key);
        }
        self.modules.retain(|id, _| module_overrides.contains_key(id));
        for (module, key) in module_overrides {
            self.modules.insert(
                module,
                ModuleSettings {
                    project_key: Some(key),
                },
            );
        }
        self.notifications.reset();
        info!(
            "Bound project to '{}' on connection '{}'",
            project_key,
            connection.name()
        );
    }

    pub fn unbind(&self) {
        if let Ok(mut project) = self.project.write() {
            project.unbind();
        }
        self.modules.clear();
        self.notifications.reset();
        info!("Project unbound, switching to standalone mode");
    }

    pub fn set_module_override(&self, module: ModuleId, project_key: String) {
        self.modules.insert(
            module,
            ModuleSettings {
                project_key: Some(project_key),
            },
        );
    }

    pub fn module_overrides(&self) -> HashMap<ModuleId, String> {
        self.modules
            .iter()
            .filter(|entry| entry.value().is_binding_overridden())
            .filter_map(|entry| {
                entry
                    .value()
                    .project_key
                    .clone()
                    .map(|key| (entry.key().clone(), key))
            })
            .collect()
    }

    /// Distinct non-blank project keys resolved across `modules`. Empty when
    /// the project is not bound.
    pub fn unique_project_keys<'a>(
        &self,
        modules: impl IntoIterator<Item = &'a ModuleId>,
    ) -> BTreeSet<String> {
        if !self.project_settings().is_bound() {
            return BTreeSet::new();
        }
        modules
            .into_iter()
            .filter_map(|m| self.resolve_project_key(m))
            .filter(|k| !k.trim().is_empty())
            .collect()
    }

    fn checked_connection_name(
        &self,
        settings: &ProjectSettings,
    ) -> Result<String, InvalidBindingError> {
        match &settings.connection_name {
            Some(name) => Ok(name.clone()),
            None => {
                self.notifications.notify_connection_invalid();
                Err(InvalidBindingError::MissingConnectionName)
            }
        }
    }

    fn checked_project_key(
        &self,
        settings: &ProjectSettings,
    ) -> Result<String, InvalidBindingError> {
        match &settings.project_key {
            Some(key) => Ok(key.clone()),
            None => Err(self.notify_project_key_invalid()),
        }
    }

    fn notify_project_key_invalid(&self) -> InvalidBindingError {
        self.notifications.notify_project_key_invalid();
        InvalidBindingError::MissingProjectKey
    }
}
