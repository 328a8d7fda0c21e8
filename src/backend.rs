use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Dispatch;

use crate::error::FlushError;
use crate::field::{EntryFields, Field};
use crate::layer::{LayerStats, Pipeline};
use crate::level::Severity;

/// What happens after a `fatal` entry has been emitted and flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "action", content = "code")]
pub enum FatalAction {
    /// Terminate the process with the given exit code.
    Exit(i32),
    /// Unwind the calling thread instead. Mostly useful in tests.
    Panic,
}

impl Default for FatalAction {
    fn default() -> Self {
        FatalAction::Exit(1)
    }
}

/// Structured logging backend the key/value [`Logger`](crate::logger::Logger)
/// translates into.
///
/// A backend only records entries. Terminal control flow for `panic`,
/// `dpanic` and `fatal` is driven by the logger using [`Backend::development`]
/// and [`Backend::fatal_action`].
pub trait Backend: Send + Sync {
    /// Emit one entry. `fields` are attached on top of the backend's own
    /// context fields.
    fn emit(&self, severity: Severity, message: &str, fields: &[Field]);

    /// Derive a backend that attaches `fields` to every entry it emits.
    fn with_fields(&self, fields: Vec<Field>) -> Arc<dyn Backend>;

    /// Block until everything emitted so far reached the destination.
    fn flush(&self) -> Result<(), FlushError>;

    /// Whether developer-panic entries should panic.
    fn development(&self) -> bool {
        false
    }

    fn fatal_action(&self) -> FatalAction {
        FatalAction::default()
    }
}

pub(crate) struct TracingCore {
    // Declared before `pipeline` so the layer goes away first on drop.
    pub(crate) dispatch: Dispatch,
    pub(crate) pipeline: Pipeline,
    pub(crate) development: bool,
    pub(crate) fatal_action: FatalAction,
}

/// [`Backend`] built on `tracing`.
///
/// Entries become events under a private [`Dispatch`]: the process-wide
/// default subscriber is never touched. The dispatch carries a
/// [`CloudLoggingLayer`](crate::layer::CloudLoggingLayer) and, optionally,
/// a `fmt` layer mirroring entries to the console.
#[derive(Clone)]
pub struct TracingBackend {
    core: Arc<TracingCore>,
    context: Arc<Vec<Field>>,
}

impl TracingBackend {
    pub(crate) fn from_core(core: TracingCore) -> Self {
        Self {
            core: Arc::new(core),
            context: Arc::new(Vec::new()),
        }
    }

    /// Counters of the underlying layer.
    pub fn stats(&self) -> &LayerStats {
        self.core.pipeline.stats()
    }
}

impl Backend for TracingBackend {
    fn emit(&self, severity: Severity, message: &str, fields: &[Field]) {
        let mut entry = EntryFields::default();
        entry.merge(self.context.iter());
        entry.merge(fields);

        let labels = if entry.labels.is_empty() {
            None
        } else {
            serde_json::to_string(&entry.labels).ok()
        };
        let labels = labels.as_deref();
        let file = entry.source_location.as_ref().map(|l| l.file.as_str());
        let line = entry.source_location.as_ref().map(|l| l.line);
        let service = entry.service_context.as_ref().map(|c| c.service.as_str());
        let version = entry.service_context.as_ref().map(|c| c.version.as_str());
        let sev = severity.cloud_severity();

        // Every entry goes out at ERROR: lower tracing levels can be compiled
        // out by `max_level_*` features anywhere in the dependency graph.
        // The `severity` field carries the real level and the layer filters on it.
        tracing::dispatcher::with_default(&self.core.dispatch, || {
            tracing::event!(
                target: "kv_log_driver",
                tracing::Level::ERROR,
                severity = sev,
                labels,
                source_file = file,
                source_line = line,
                service,
                service_version = version,
                "{}",
                message
            )
        });
    }

    fn with_fields(&self, fields: Vec<Field>) -> Arc<dyn Backend> {
        let mut context = (*self.context).clone();
        context.extend(fields);
        Arc::new(Self {
            core: Arc::clone(&self.core),
            context: Arc::new(context),
        })
    }

    fn flush(&self) -> Result<(), FlushError> {
        self.core.pipeline.flush()
    }

    fn development(&self) -> bool {
        self.core.development
    }

    fn fatal_action(&self) -> FatalAction {
        self.core.fatal_action
    }
}
