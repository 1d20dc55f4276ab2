//! Settings persistence.
//!
//! Global settings (the list of server connections) are shared by every
//! project and stored under the user config directory. Project settings hold
//! the binding state for one local project; module settings can override the
//! project key for a single module of that project.

use crate::connection::ServerConnection;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub connections: Vec<ServerConnection>,
}

impl GlobalSettings {
    /// Default location: `<config-dir>/codescan/settings.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join("codescan").join("settings.toml"))
    }

    /// Load settings from `path`. A missing file yields empty settings so a
    /// fresh install starts in standalone mode.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: GlobalSettings = toml::from_str(&content)?;
        debug!(
            "Loaded {} server connection(s) from {}",
            settings.connections.len(),
            path.display()
        );
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&ServerConnection> {
        self.connections.iter().find(|c| c.name() == name)
    }

    /// Replace or add a connection, keyed by name.
    pub fn put_connection(&mut self, connection: ServerConnection) {
        if let Some(existing) = self
            .connections
            .iter_mut()
            .find(|c| c.name() == connection.name())
        {
            *existing = connection;
        } else {
            self.connections.push(connection);
        }
    }
}

/// Binding state of one local project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub binding_enabled: bool,
    #[serde(default)]
    pub connection_name: Option<String>,
    #[serde(default)]
    pub project_key: Option<String>,
    /// Extra analysis properties passed to the engine on every run.
    #[serde(default)]
    pub additional_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub verbose_enabled: bool,
}

impl ProjectSettings {
    /// Bound means connected mode is enabled and a project key is set.
    pub fn is_bound(&self) -> bool {
        self.binding_enabled && self.project_key.is_some()
    }

    pub fn bind_to(&mut self, connection: &ServerConnection, project_key: impl Into<String>) {
        self.binding_enabled = true;
        self.connection_name = Some(connection.name().to_string());
        self.project_key = Some(project_key.into());
    }

    pub fn unbind(&mut self) {
        self.binding_enabled = false;
        self.connection_name = None;
        self.project_key = None;
    }
}

/// Per-module settings. Only an override of the project key, for projects
/// whose modules map to different server-side projects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSettings {
    #[serde(default)]
    pub project_key: Option<String>,
}

impl ModuleSettings {
    pub fn is_binding_overridden(&self) -> bool {
        self.project_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServerConnection;

    fn connection(name: &str) -> ServerConnection {
        ServerConnection::builder()
            .name(name)
            .host_url("https://sonar.internal")
            .token("tok")
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_settings_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GlobalSettings::load(&dir.path().join("settings.toml")).unwrap();
        assert!(settings.connections.is_empty());
    }

    #[test]
    fn test_global_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = GlobalSettings::default();
        settings.put_connection(connection("primary"));
        settings.put_connection(connection("backup"));
        settings.save(&path).unwrap();

        let loaded = GlobalSettings::load(&path).unwrap();
        assert_eq!(loaded.connections.len(), 2);
        assert!(loaded.connection("primary").is_some());
        assert!(loaded.connection("missing").is_none());
    }

    #[test]
    fn test_put_connection_replaces_by_name() {
        let mut settings = GlobalSettings::default();
        settings.put_connection(connection("dup"));
        settings.put_connection(connection("dup"));
        assert_eq!(settings.connections.len(), 1);
    }

    #[test]
    fn test_bind_and_unbind() {
        let mut project = ProjectSettings::default();
        assert!(!project.is_bound());

        project.bind_to(&connection("primary"), "org:service");
        assert!(project.is_bound());
        assert_eq!(project.connection_name.as_deref(), Some("primary"));
        assert_eq!(project.project_key.as_deref(), Some("org:service"));

        project.unbind();
        assert!(!project.is_bound());
        assert!(project.connection_name.is_none());
    }

    #[test]
    fn test_binding_enabled_without_key_is_not_bound() {
        let project = ProjectSettings {
            binding_enabled: true,
            ..Default::default()
        };
        assert!(!project.is_bound());
    }

    #[test]
    fn test_module_override_ignores_blank_keys() {
        assert!(!ModuleSettings::default().is_binding_overridden());
        assert!(!ModuleSettings {
            project_key: Some("  ".to_string())
        }
        .is_binding_overridden());
        assert!(ModuleSettings {
            project_key: Some("other:key".to_string())
        }
        .is_binding_overridden());
    }
}
