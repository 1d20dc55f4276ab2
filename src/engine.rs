//! Seams around the opaque analysis engine.
//!
//! The actual rule execution, issue tracking heuristics and issue storage
//! live in the vendor engine; this crate only coordinates it. Hosts register
//! engine implementations in the [`EngineRegistry`] and everything else talks
//! to them through the [`ConnectedEngine`] / [`StandaloneEngine`] traits.

use crate::binding::ProjectBinding;
use crate::connection::ServerConnection;
use crate::trackable::{Severity, ServerIssue};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Failure while talking to the remote server.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to download issues for project '{project_key}': {message}")]
    Fetch {
        project_key: String,
        message: String,
    },

    #[error("server '{0}' is not reachable")]
    Unreachable(String),
}

/// One issue reported by an analysis run.
#[derive(Debug, Clone)]
pub struct RawIssue {
    pub rule_key: String,
    pub message: String,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub severity: Severity,
}

/// Receives issues as the engine finds them. Must be thread-safe: engines
/// report from their own worker threads.
pub trait IssueListener: Send + Sync {
    fn on_issue(&self, issue: RawIssue);
}

/// Input of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub base_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub extra_properties: BTreeMap<String, String>,
    /// Set in connected mode only.
    pub project_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisSummary {
    pub indexed_files: usize,
    pub failed_files: Vec<PathBuf>,
}

#[async_trait]
pub trait StandaloneEngine: Send + Sync {
    async fn analyze(
        &self,
        config: AnalysisConfig,
        listener: Arc<dyn IssueListener>,
    ) -> Result<AnalysisSummary>;

    fn rule_description(&self, rule_key: &str) -> Option<String>;
}

#[async_trait]
pub trait ConnectedEngine: Send + Sync {
    async fn analyze(
        &self,
        config: AnalysisConfig,
        listener: Arc<dyn IssueListener>,
    ) -> Result<AnalysisSummary>;

    /// Download the full server issue set for a project into the engine's
    /// local store.
    async fn download_all_server_issues(
        &self,
        connection: &ServerConnection,
        project_key: &str,
    ) -> Result<(), DownloadError>;

    /// Download the server issues of a single file into the engine's local
    /// store and return them.
    async fn download_server_issues(
        &self,
        connection: &ServerConnection,
        binding: &ProjectBinding,
        relative_path: &str,
    ) -> Result<Vec<ServerIssue>, DownloadError>;

    /// Read previously downloaded issues from the engine's local store.
    /// Never hits the network, so it can serve stale data after a failed
    /// download.
    fn server_issues(&self, binding: &ProjectBinding, relative_path: &str) -> Vec<ServerIssue>;

    fn rule_description(&self, rule_key: &str, project_key: &str) -> Option<String>;
}

/// One contract over both analysis modes. The binding manager picks the
/// implementation; callers never branch on the mode themselves.
#[async_trait]
pub trait AnalysisFacade: Send + Sync {
    async fn start_analysis(
        &self,
        base_dir: PathBuf,
        files: Vec<PathBuf>,
        additional_properties: BTreeMap<String, String>,
        listener: Arc<dyn IssueListener>,
    ) -> Result<AnalysisSummary>;

    fn rule_description(&self, rule_key: &str) -> Option<String>;
}

pub struct StandaloneFacade {
    engine: Arc<dyn StandaloneEngine>,
    project_properties: BTreeMap<String, String>,
}

impl StandaloneFacade {
    pub fn new(
        engine: Arc<dyn StandaloneEngine>,
        project_properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            engine,
            project_properties,
        }
    }
}

#[async_trait]
impl AnalysisFacade for StandaloneFacade {
    async fn start_analysis(
        &self,
        base_dir: PathBuf,
        files: Vec<PathBuf>,
        additional_properties: BTreeMap<String, String>,
        listener: Arc<dyn IssueListener>,
    ) -> Result<AnalysisSummary> {
        let mut extra_properties = additional_properties;
        // Project-level properties win over per-run ones.
        extra_properties.extend(self.project_properties.clone());
        let config = AnalysisConfig {
            base_dir,
            files,
            extra_properties,
            project_key: None,
        };
        debug!("Starting standalone analysis of {} file(s)", config.files.len());
        self.engine.analyze(config, listener).await
    }

    fn rule_description(&self, rule_key: &str) -> Option<String> {
        self.engine.rule_description(rule_key)
    }
}

pub struct ConnectedFacade {
    engine: Arc<dyn ConnectedEngine>,
    project_key: String,
    project_properties: BTreeMap<String, String>,
}

impl ConnectedFacade {
    pub fn new(
        engine: Arc<dyn ConnectedEngine>,
        project_key: String,
        project_properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            engine,
            project_key,
            project_properties,
        }
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }
}

#[async_trait]
impl AnalysisFacade for ConnectedFacade {
    async fn start_analysis(
        &self,
        base_dir: PathBuf,
        files: Vec<PathBuf>,
        additional_properties: BTreeMap<String, String>,
        listener: Arc<dyn IssueListener>,
    ) -> Result<AnalysisSummary> {
        let mut extra_properties = additional_properties;
        extra_properties.extend(self.project_properties.clone());
        let config = AnalysisConfig {
            base_dir,
            files,
            extra_properties,
            project_key: Some(self.project_key.clone()),
        };
        debug!(
            "Starting connected analysis of {} file(s) for project '{}'",
            config.files.len(),
            self.project_key
        );
        self.engine.analyze(config, listener).await
    }

    fn rule_description(&self, rule_key: &str) -> Option<String> {
        self.engine.rule_description(rule_key, &self.project_key)
    }
}

/// Hands out shared engine handles, one connected engine per connection name
/// plus a single standalone engine. Engines are started lazily by the host
/// and reused until shutdown.
#[derive(Default)]
pub struct EngineRegistry {
    connected: DashMap<String, Arc<dyn ConnectedEngine>>,
    standalone: RwLock<Option<Arc<dyn StandaloneEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connected(&self, connection_name: &str, engine: Arc<dyn ConnectedEngine>) {
        self.connected.insert(connection_name.to_string(), engine);
    }

    pub fn register_standalone(&self, engine: Arc<dyn StandaloneEngine>) {
        if let Ok(mut guard) = self.standalone.write() {
            *guard = Some(engine);
        }
    }

    pub fn connected_engine(&self, connection_name: &str) -> Option<Arc<dyn ConnectedEngine>> {
        self.connected.get(connection_name).map(|e| e.clone())
    }

    pub fn standalone_engine(&self) -> Option<Arc<dyn StandaloneEngine>> {
        self.standalone.read().ok().and_then(|g| g.clone())
    }

    /// Drop the engine of a removed connection.
    pub fn remove_connected(&self, connection_name: &str) {
        self.connected.remove(connection_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct NoopListener;

    impl IssueListener for NoopListener {
        fn on_issue(&self, _issue: RawIssue) {}
    }

    #[derive(Default)]
    struct CapturingEngine {
        configs: Mutex<Vec<AnalysisConfig>>,
    }

    #[async_trait]
    impl StandaloneEngine for CapturingEngine {
        async fn analyze(
            &self,
            config: AnalysisConfig,
            _listener: Arc<dyn IssueListener>,
        ) -> Result<AnalysisSummary> {
            let indexed_files = config.files.len();
            self.configs.lock().unwrap().push(config);
            Ok(AnalysisSummary {
                indexed_files,
                failed_files: Vec::new(),
            })
        }

        fn rule_description(&self, rule_key: &str) -> Option<String> {
            Some(format!("description of {rule_key}"))
        }
    }

    #[async_trait]
    impl ConnectedEngine for CapturingEngine {
        async fn analyze(
            &self,
            config: AnalysisConfig,
            _listener: Arc<dyn IssueListener>,
        ) -> Result<AnalysisSummary> {
            self.configs.lock().unwrap().push(config);
            Ok(AnalysisSummary::default())
        }

        async fn download_all_server_issues(
            &self,
            _connection: &ServerConnection,
            _project_key: &str,
        ) -> Result<(), DownloadError> {
            Ok(())
        }

        async fn download_server_issues(
            &self,
            _connection: &ServerConnection,
            _binding: &ProjectBinding,
            _relative_path: &str,
        ) -> Result<Vec<ServerIssue>, DownloadError> {
            Ok(Vec::new())
        }

        fn server_issues(&self, _binding: &ProjectBinding, _relative_path: &str) -> Vec<ServerIssue> {
            Vec::new()
        }

        fn rule_description(&self, rule_key: &str, project_key: &str) -> Option<String> {
            Some(format!("{rule_key}@{project_key}"))
        }
    }

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_project_properties_win_over_run_properties() {
        let engine = Arc::new(CapturingEngine::default());
        let facade = StandaloneFacade::new(
            engine.clone(),
            props(&[("sonar.scm.disabled", "true")]),
        );

        facade
            .start_analysis(
                PathBuf::from("/project"),
                vec![PathBuf::from("src/main.rs")],
                props(&[("sonar.scm.disabled", "false"), ("sonar.log.level", "DEBUG")]),
                Arc::new(NoopListener),
            )
            .await
            .unwrap();

        let configs = engine.configs.lock().unwrap();
        assert_eq!(
            configs[0].extra_properties.get("sonar.scm.disabled"),
            Some(&"true".to_string())
        );
        assert_eq!(
            configs[0].extra_properties.get("sonar.log.level"),
            Some(&"DEBUG".to_string())
        );
        assert!(configs[0].project_key.is_none());
    }

    #[tokio::test]
    async fn test_connected_facade_pins_project_key() {
        let engine = Arc::new(CapturingEngine::default());
        let facade = ConnectedFacade::new(
            engine.clone() as Arc<dyn ConnectedEngine>,
            "org:service".to_string(),
            BTreeMap::new(),
        );

        facade
            .start_analysis(
                PathBuf::from("/project"),
                vec![],
                BTreeMap::new(),
                Arc::new(NoopListener),
            )
            .await
            .unwrap();

        let configs = engine.configs.lock().unwrap();
        assert_eq!(configs[0].project_key.as_deref(), Some("org:service"));
        assert_eq!(facade.rule_description("java:S100").as_deref(), Some("java:S100@org:service"));
    }
}
