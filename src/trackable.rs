//! Normalized issue view used to match freshly detected issues against
//! previously known ones (local or server-side).
//!
//! The matching heuristics themselves (line/hash/text proximity) live in the
//! analysis engine; this module only defines the shape every party agrees on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity reported by the analysis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Blocker => "BLOCKER",
            Severity::Critical => "CRITICAL",
            Severity::Major => "MAJOR",
            Severity::Minor => "MINOR",
            Severity::Info => "INFO",
        }
    }

    /// Parse a server-provided severity string. Unknown values map to
    /// `Major` so a server-side vocabulary change never drops issues.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "BLOCKER" => Severity::Blocker,
            "CRITICAL" => Severity::Critical,
            "MINOR" => Severity::Minor,
            "INFO" => Severity::Info,
            _ => Severity::Major,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized view of an issue, used for identity-matching across
/// analysis runs.
pub trait Trackable: Send + Sync {
    /// The line index, starting with 1. `None` means the issue does not
    /// relate to a line (a file-level issue for example).
    fn line(&self) -> Option<u32>;

    fn message(&self) -> &str;

    fn text_range_hash(&self) -> Option<u64>;

    fn line_hash(&self) -> Option<u64>;

    fn rule_key(&self) -> &str;

    /// Key assigned by the server, when the issue is already known there.
    fn server_issue_key(&self) -> Option<&str>;

    fn creation_date(&self) -> Option<DateTime<Utc>>;

    fn is_resolved(&self) -> bool;

    fn assignee(&self) -> &str;

    fn severity(&self) -> Severity;

    fn issue_type(&self) -> Option<&str>;
}

/// An issue already known to the remote analysis backend, as returned by the
/// engine's issue download and cached-read operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIssue {
    pub key: String,
    pub rule_key: String,
    pub message: String,
    pub line: Option<u32>,
    pub line_hash: Option<u64>,
    pub text_range_hash: Option<u64>,
    pub creation_date: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub assignee: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub issue_type: Option<String>,
}

/// `Trackable` adapter over a [`ServerIssue`].
#[derive(Debug, Clone)]
pub struct ServerIssueTrackable {
    issue: ServerIssue,
}

impl ServerIssueTrackable {
    pub fn new(issue: ServerIssue) -> Self {
        Self { issue }
    }

    pub fn issue(&self) -> &ServerIssue {
        &self.issue
    }
}

impl Trackable for ServerIssueTrackable {
    fn line(&self) -> Option<u32> {
        self.issue.line
    }

    fn message(&self) -> &str {
        &self.issue.message
    }

    fn text_range_hash(&self) -> Option<u64> {
        self.issue.text_range_hash
    }

    fn line_hash(&self) -> Option<u64> {
        self.issue.line_hash
    }

    fn rule_key(&self) -> &str {
        &self.issue.rule_key
    }

    fn server_issue_key(&self) -> Option<&str> {
        Some(&self.issue.key)
    }

    fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.issue.creation_date
    }

    fn is_resolved(&self) -> bool {
        // A non-empty resolution ("FIXED", "WONTFIX", ...) means the issue
        // was closed on the server side.
        self.issue
            .resolution
            .as_deref()
            .map(|r| !r.is_empty())
            .unwrap_or(false)
    }

    fn assignee(&self) -> &str {
        &self.issue.assignee
    }

    fn severity(&self) -> Severity {
        self.issue.severity
    }

    fn issue_type(&self) -> Option<&str> {
        self.issue.issue_type.as_deref()
    }
}

#[cfg(test)]
pub(crate) fn test_issue(key: &str, rule_key: &str, line: Option<u32>) -> ServerIssue {
    ServerIssue {
        key: key.to_string(),
        rule_key: rule_key.to_string(),
        message: format!("message for {key}"),
        line,
        line_hash: line.map(|l| l as u64 * 31),
        text_range_hash: None,
        creation_date: None,
        resolution: None,
        assignee: String::new(),
        severity: Severity::Major,
        issue_type: Some("BUG".to_string()),
    }
}
