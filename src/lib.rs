// CodeScan daemon library
// Connected-mode coordination core for editor integrations: binding state,
// engine facades, and the bounded server-issue sync dispatcher.

// Core modules
pub mod binding;
pub mod engine;
pub mod trackable;
pub mod updater;

// Configuration and host plumbing
pub mod connection;
pub mod issue_store;
pub mod logging;
pub mod notifications;
pub mod server;
pub mod settings;

// Re-export commonly used types
pub use binding::{BindingManager, InvalidBindingError, ModuleId, ProjectBinding};
pub use connection::{Credentials, ServerConnection, ServerConnectionBuilder};
pub use engine::{
    AnalysisConfig, AnalysisFacade, AnalysisSummary, ConnectedEngine, DownloadError,
    EngineRegistry, IssueListener, RawIssue, StandaloneEngine,
};
pub use issue_store::{IssueMatcher, MatchedIssue, MatchedIssueStore};
pub use logging::{init_logging, Console};
pub use settings::{GlobalSettings, ModuleSettings, ProjectSettings};
pub use trackable::{Severity, ServerIssue, ServerIssueTrackable, Trackable};
pub use updater::{NoopProgress, ProgressMonitor, ServerIssueUpdater, SyncFile, UpdaterConfig};
