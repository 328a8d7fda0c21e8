use crate::backend::{FatalAction, TracingBackend, TracingCore};
use crate::error::BuildError;
use crate::field::Field;
use crate::layer::{CloudLoggingLayer, WorkerSettings};
use crate::level::Severity;
use crate::sink::{Encoding, LogSink, OutputTarget, WriterSink};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the tracing backend behind a [`Logger`](crate::logger::Logger).
///
/// Start from [`LoggerConfig::production`] or [`LoggerConfig::development`]
/// and adjust. The struct deserializes with serde so host applications can
/// embed it in their own config files; missing fields take production
/// defaults.
///
/// **Fields**
/// - `level`: entries below this severity are discarded.
/// - `encoding`: compact JSON lines or pretty JSON.
/// - `output`: `stdout`, `stderr` or a file path (appended to).
/// - `timestamp_key`: name of the timestamp field in each record.
/// - `development`: when `true`, `dpanic` entries panic after emission.
/// - `console_mirror`: also print entries through `tracing_subscriber::fmt`
///   to stderr.
/// - `on_fatal`: what a `fatal` entry does once flushed.
/// - `channel_buffer`, `batch_size`, `flush_interval_ms`, `max_retries`:
///   worker tuning, see [`WorkerSettings`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: Severity,
    pub encoding: Encoding,
    pub output: OutputTarget,
    pub timestamp_key: String,
    pub development: bool,
    pub console_mirror: bool,
    pub on_fatal: FatalAction,
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggerConfig {
    /// Production-oriented defaults: info and above, compact JSON to stdout.
    pub fn production() -> Self {
        let worker = WorkerSettings::default();
        Self {
            level: Severity::Info,
            encoding: Encoding::Json,
            output: OutputTarget::Stdout,
            timestamp_key: "timestamp".to_string(),
            development: false,
            console_mirror: false,
            on_fatal: FatalAction::default(),
            channel_buffer: worker.channel_buffer,
            batch_size: worker.batch_size,
            flush_interval_ms: worker.flush_interval.as_millis() as u64,
            max_retries: worker.max_retries,
        }
    }

    /// Development defaults: debug and above, pretty JSON to stderr, and
    /// `dpanic` panics.
    pub fn development() -> Self {
        Self {
            level: Severity::Debug,
            encoding: Encoding::Pretty,
            output: OutputTarget::Stderr,
            development: true,
            ..Self::production()
        }
    }

    pub fn apply(&mut self, option: LoggerOption) -> Option<BuildExtras> {
        match option {
            LoggerOption::Level(level) => self.level = level,
            LoggerOption::Encoding(encoding) => self.encoding = encoding,
            LoggerOption::Output(output) => self.output = output,
            LoggerOption::TimestampKey(key) => self.timestamp_key = key,
            LoggerOption::Development(on) => self.development = on,
            LoggerOption::ConsoleMirror(on) => self.console_mirror = on,
            LoggerOption::OnFatal(action) => self.on_fatal = action,
            LoggerOption::ChannelBuffer(n) => self.channel_buffer = n,
            LoggerOption::BatchSize(n) => self.batch_size = n,
            LoggerOption::FlushInterval(d) => self.flush_interval_ms = d.as_millis() as u64,
            LoggerOption::MaxRetries(n) => self.max_retries = n,
            LoggerOption::Sink(sink) => return Some(BuildExtras::Sink(sink)),
            LoggerOption::Fields(fields) => return Some(BuildExtras::Fields(fields)),
        }
        None
    }

    fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            channel_buffer: self.channel_buffer,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            max_retries: self.max_retries,
        }
    }

    /// Build the backend.
    ///
    /// **Parameters**
    /// - `sink`: overrides `output`/`encoding` when present.
    ///
    /// **Returns**
    /// - `Err(BuildError::InvalidConfig)` for an empty `timestamp_key`.
    /// - `Err(BuildError::Output)` if `output` cannot be opened.
    /// - `Err(BuildError::Worker)` if the worker cannot be started.
    pub fn build(&self, sink: Option<Arc<dyn LogSink>>) -> Result<TracingBackend, BuildError> {
        if self.timestamp_key.trim().is_empty() {
            return Err(BuildError::InvalidConfig("timestamp_key must not be empty".to_string()));
        }

        let sink = match sink {
            Some(sink) => sink,
            None => Arc::new(WriterSink::open(
                &self.output,
                self.encoding,
                self.timestamp_key.clone(),
            )?) as Arc<dyn LogSink>,
        };

        let (layer, pipeline) = CloudLoggingLayer::new(sink, self.level, self.worker_settings())?;

        // `Option<Layer>` is itself a layer, so the mirror can be switched
        // off without changing the subscriber's type.
        let mirror = self.console_mirror.then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
        });
        let dispatch = Dispatch::new(Registry::default().with(layer).with(mirror));

        Ok(TracingBackend::from_core(TracingCore {
            dispatch,
            pipeline,
            development: self.development,
            fatal_action: self.on_fatal,
        }))
    }
}

/// Options passed through the logger constructors to the backend.
#[derive(Clone)]
pub enum LoggerOption {
    Level(Severity),
    Encoding(Encoding),
    Output(OutputTarget),
    /// Send records to this sink instead of `Output`.
    Sink(Arc<dyn LogSink>),
    TimestampKey(String),
    /// Fields attached to every entry.
    Fields(Vec<Field>),
    Development(bool),
    ConsoleMirror(bool),
    OnFatal(FatalAction),
    ChannelBuffer(usize),
    BatchSize(usize),
    FlushInterval(Duration),
    MaxRetries(u32),
}

impl fmt::Debug for LoggerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggerOption::Sink(_) => f.write_str("Sink(..)"),
            LoggerOption::Level(v) => write!(f, "Level({v:?})"),
            LoggerOption::Encoding(v) => write!(f, "Encoding({v:?})"),
            LoggerOption::Output(v) => write!(f, "Output({v:?})"),
            LoggerOption::TimestampKey(v) => write!(f, "TimestampKey({v:?})"),
            LoggerOption::Fields(v) => write!(f, "Fields({v:?})"),
            LoggerOption::Development(v) => write!(f, "Development({v:?})"),
            LoggerOption::ConsoleMirror(v) => write!(f, "ConsoleMirror({v:?})"),
            LoggerOption::OnFatal(v) => write!(f, "OnFatal({v:?})"),
            LoggerOption::ChannelBuffer(v) => write!(f, "ChannelBuffer({v:?})"),
            LoggerOption::BatchSize(v) => write!(f, "BatchSize({v:?})"),
            LoggerOption::FlushInterval(v) => write!(f, "FlushInterval({v:?})"),
            LoggerOption::MaxRetries(v) => write!(f, "MaxRetries({v:?})"),
        }
    }
}

/// Options that are not part of [`LoggerConfig`] and are consumed at build time.
pub enum BuildExtras {
    Sink(Arc<dyn LogSink>),
    Fields(Vec<Field>),
}
