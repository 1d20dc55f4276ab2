//! Downstream sink for matched server issues.
//!
//! The dispatcher feeds freshly fetched server issues into an
//! [`IssueMatcher`]; hosts usually plug the engine's own matcher in here.
//! [`MatchedIssueStore`] is the in-crate implementation used by tests and by
//! hosts that only need the latest matched state per file.

use crate::trackable::{ServerIssueTrackable, Severity, Trackable};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Matches server-side trackables against the local issues of a file.
/// Implementations are called from dispatcher worker tasks concurrently.
pub trait IssueMatcher: Send + Sync {
    fn match_server_issues(&self, file: &Path, server_issues: Vec<ServerIssueTrackable>);
}

/// A server issue accepted for a file.
#[derive(Debug, Clone)]
pub struct MatchedIssue {
    pub uid: Uuid,
    pub server_issue_key: String,
    pub rule_key: String,
    pub message: String,
    pub line: Option<u32>,
    pub severity: Severity,
}

/// Thread-safe store keeping the latest matched issues per file.
#[derive(Default)]
pub struct MatchedIssueStore {
    issues: DashMap<PathBuf, Vec<MatchedIssue>>,
    match_calls: AtomicUsize,
}

impl MatchedIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issues_for(&self, file: &Path) -> Vec<MatchedIssue> {
        self.issues
            .get(file)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn file_count(&self) -> usize {
        self.issues.len()
    }

    /// Number of match calls seen, including ones with no open issues.
    pub fn match_calls(&self) -> usize {
        self.match_calls.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.issues.clear();
    }
}

impl IssueMatcher for MatchedIssueStore {
    fn match_server_issues(&self, file: &Path, server_issues: Vec<ServerIssueTrackable>) {
        self.match_calls.fetch_add(1, Ordering::Relaxed);

        // Resolved issues no longer apply to the local state.
        let matched: Vec<MatchedIssue> = server_issues
            .into_iter()
            .filter(|t| !t.is_resolved())
            .map(|t| MatchedIssue {
                uid: Uuid::new_v4(),
                server_issue_key: t.issue().key.clone(),
                rule_key: t.rule_key().to_string(),
                message: t.message().to_string(),
                line: t.line(),
                severity: t.severity(),
            })
            .collect();

        debug!(
            "Matched {} server issue(s) for {}",
            matched.len(),
            file.display()
        );
        // Replace semantics: the newest fetch wins for the whole file.
        self.issues.insert(file.to_path_buf(), matched);
    }
}
