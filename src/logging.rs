//! Console log collection.
//!
//! The host shows a "CodeScan log" view fed from an in-memory ring buffer.
//! [`Console`] is the handle analysis code writes to; debug entries are kept
//! only when verbose output is enabled for the project.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Maximum number of entries kept in the console buffer.
const MAX_CONSOLE_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConsoleEntry {
    pub timestamp: String,
    pub level: ConsoleLevel,
    pub message: String,
}

/// Thread-safe ring buffer of console entries with verbose gating.
#[derive(Clone)]
pub struct Console {
    entries: Arc<Mutex<VecDeque<ConsoleEntry>>>,
    verbose: Arc<AtomicBool>,
}

impl Console {
    pub fn new(verbose: bool) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            verbose: Arc::new(AtomicBool::new(verbose)),
        }
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Sync verbosity with the per-project setting.
    pub fn apply_settings(&self, settings: &crate::settings::ProjectSettings) {
        self.set_verbose(settings.verbose_enabled);
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Recorded only when verbose output is enabled.
    pub fn debug(&self, message: impl AsRef<str>) {
        if self.is_verbose() {
            self.push(ConsoleLevel::Debug, message.as_ref());
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.push(ConsoleLevel::Info, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.push(ConsoleLevel::Error, message.as_ref());
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        // try_lock to stay safe when called from a log handler itself.
        match self.entries.try_lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.try_lock() {
            Ok(entries) => entries.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, level: ConsoleLevel, message: &str) {
        let entry = ConsoleEntry {
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
            level,
            message: message.to_string(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(entry);
            while entries.len() > MAX_CONSOLE_ENTRIES {
                entries.pop_front();
            }
        }
    }
}

/// Tracing layer mirroring events into a [`Console`], so `tracing` output
/// from this crate shows up in the host's log view as well.
pub struct MemoryConsoleLayer {
    console: Console,
}

impl MemoryConsoleLayer {
    pub fn new(console: Console) -> Self {
        Self { console }
    }

    fn level_of(level: &tracing::Level) -> ConsoleLevel {
        match *level {
            tracing::Level::ERROR | tracing::Level::WARN => ConsoleLevel::Error,
            tracing::Level::INFO => ConsoleLevel::Info,
            _ => ConsoleLevel::Debug,
        }
    }

    fn message_of(event: &Event<'_>) -> String {
        struct MessageVisitor(String);

        impl tracing::field::Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                    if self.0.starts_with('"') && self.0.ends_with('"') {
                        self.0 = self.0[1..self.0.len() - 1].to_string();
                    }
                }
            }
        }

        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if visitor.0.is_empty() {
            event.metadata().target().to_string()
        } else {
            visitor.0
        }
    }
}

impl<S> Layer<S> for MemoryConsoleLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = Self::level_of(event.metadata().level());
        let message = Self::message_of(event);
        match level {
            ConsoleLevel::Debug => self.console.debug(message),
            ConsoleLevel::Info => self.console.info(message),
            ConsoleLevel::Error => self.console.error(message),
        }
    }
}

/// Install the global subscriber: env-filtered stderr output plus the console
/// buffer. Returns the console handle. Safe to call more than once; only the
/// first call installs the subscriber.
pub fn init_logging(verbose: bool) -> Console {
    let console = Console::new(verbose);
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(MemoryConsoleLayer::new(console.clone()))
        .try_init();

    console
}
