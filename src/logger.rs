use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, FatalAction};
use crate::config::{BuildExtras, LoggerConfig, LoggerOption};
use crate::error::{BuildError, FlushError, LogError};
use crate::field::Field;
use crate::level::Severity;
use crate::value::KeyVal;

/// Generic "log key-value pairs" interface.
///
/// `keyvals` alternates `level, message, key, value, ...`.
pub trait KeyValLogger {
    fn log(&self, keyvals: &[KeyVal]) -> Result<(), LogError>;
}

/// Adapter from flat key/value calls to a structured [`Backend`].
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Logger {
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("development", &self.backend.development())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Wrap an arbitrary backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Build a logger with production defaults ([`LoggerConfig::production`]).
    ///
    /// **Parameters**
    /// - `service`, `version`: when `service` is set, every entry carries a
    ///   `serviceContext` with both (a missing version becomes `""`).
    /// - `options`: passthrough backend options, applied in order.
    ///
    /// **Returns**
    /// - `Err(BuildError)` if the backend cannot be built, e.g. the output
    ///   file cannot be opened.
    pub fn new_production(
        service: Option<&str>,
        version: Option<&str>,
        options: Vec<LoggerOption>,
    ) -> Result<Self, BuildError> {
        Self::from_config(LoggerConfig::production(), service, version, options)
    }

    /// Same as [`Logger::new_production`] with [`LoggerConfig::development`]
    /// defaults: verbose, human-readable, and `dpanic` panics.
    pub fn new_development(
        service: Option<&str>,
        version: Option<&str>,
        options: Vec<LoggerOption>,
    ) -> Result<Self, BuildError> {
        Self::from_config(LoggerConfig::development(), service, version, options)
    }

    /// Build a logger from an explicit config.
    pub fn from_config(
        mut config: LoggerConfig,
        service: Option<&str>,
        version: Option<&str>,
        options: Vec<LoggerOption>,
    ) -> Result<Self, BuildError> {
        let mut sink = None;
        let mut fields = Vec::new();
        for option in options {
            match config.apply(option) {
                Some(BuildExtras::Sink(s)) => sink = Some(s),
                Some(BuildExtras::Fields(f)) => fields.extend(f),
                None => {}
            }
        }
        if let Some(service) = service {
            fields.push(Field::service_context(service, version.unwrap_or_default()));
        }

        let backend = config.build(sink)?;
        let backend: Arc<dyn Backend> = if fields.is_empty() {
            Arc::new(backend)
        } else {
            backend.with_fields(fields)
        };
        Ok(Self { backend })
    }

    /// Derive a logger attaching `fields` to every entry.
    pub fn with(&self, fields: Vec<Field>) -> Self {
        Self {
            backend: self.backend.with_fields(fields),
        }
    }

    /// Emit one entry described by a flat key/value sequence.
    ///
    /// `keyvals[0]` is the severity token, `keyvals[1]` the message, then
    /// label key/value pairs. Keys and the token must be [`KeyVal::Str`].
    ///
    /// | token | effect |
    /// |---|---|
    /// | `info`, `warn` | plain entry |
    /// | `err`, `error` | backtrace appended to the message |
    /// | `debug` | caller source location attached |
    /// | `dpanic` | panics afterwards in development mode |
    /// | `panic` | panics afterwards |
    /// | `fatal` | backtrace appended, then the fatal action runs (exit by default) |
    ///
    /// Every validation failure is first emitted at `dpanic` severity and
    /// then returned, so in development mode it panics.
    ///
    /// **Returns**
    /// - `Err(LogError::PairMismatch)` if fewer than two items or an odd count.
    /// - `Err(LogError::KeyNotString)` if the token or a key is not a string.
    ///   Nothing is emitted for the call besides the dpanic entry.
    /// - `Err(LogError::LevelNotFound)` if the token is unknown.
    #[track_caller]
    pub fn log(&self, keyvals: &[KeyVal]) -> Result<(), LogError> {
        if keyvals.len() < 2 || keyvals.len() % 2 != 0 {
            return Err(self.reject(LogError::PairMismatch));
        }

        let mut fields = Vec::with_capacity(keyvals.len() / 2);
        for pair in keyvals[2..].chunks_exact(2) {
            let key = self.key(&pair[0])?;
            fields.push(Field::label(key, pair[1].stringify()));
        }

        let token = self.key(&keyvals[0])?;
        let severity = match Severity::from_token(token) {
            Some(severity) => severity,
            None => return Err(self.reject(LogError::LevelNotFound)),
        };

        let msg = keyvals[1].stringify();
        match severity {
            Severity::Info | Severity::Warn | Severity::DPanic | Severity::Panic => {
                self.backend.emit(severity, &msg, &fields);
            }
            Severity::Debug => {
                fields.push(Field::source_location());
                self.backend.emit(severity, &msg, &fields);
            }
            Severity::Error | Severity::Fatal => {
                let msg = format!("{}\n{}", msg, Backtrace::force_capture());
                self.backend.emit(severity, &msg, &fields);
            }
        }
        self.after_emit(severity, &msg);
        Ok(())
    }

    /// Flush the backend, blocking until prior entries reached the sink.
    pub fn sync(&self) -> Result<(), FlushError> {
        self.backend.flush()
    }

    fn key<'a>(&self, item: &'a KeyVal) -> Result<&'a str, LogError> {
        item.as_key().ok_or_else(|| self.reject(LogError::KeyNotString))
    }

    fn reject(&self, err: LogError) -> LogError {
        let msg = err.to_string();
        self.backend.emit(Severity::DPanic, &msg, &[]);
        self.after_emit(Severity::DPanic, &msg);
        err
    }

    /// Control flow that follows the terminal severities.
    fn after_emit(&self, severity: Severity, msg: &str) {
        match severity {
            Severity::DPanic if self.backend.development() => {
                self.flush_before_exit();
                panic!("{}", msg);
            }
            Severity::Panic => {
                self.flush_before_exit();
                panic!("{}", msg);
            }
            Severity::Fatal => {
                self.flush_before_exit();
                match self.backend.fatal_action() {
                    FatalAction::Exit(code) => std::process::exit(code),
                    FatalAction::Panic => panic!("{}", msg),
                }
            }
            _ => {}
        }
    }

    fn flush_before_exit(&self) {
        if let Err(e) = self.backend.flush() {
            eprintln!("failed to flush logs: {}", e);
        }
    }
}

impl KeyValLogger for Logger {
    #[track_caller]
    fn log(&self, keyvals: &[KeyVal]) -> Result<(), LogError> {
        Logger::log(self, keyvals)
    }
}

/// Log through a [`KeyValLogger`] with mixed-type arguments.
///
/// ```ignore
/// kvlog!(logger, "info", "user signed in", "user_id", 42, "plan", "pro")?;
/// ```
#[macro_export]
macro_rules! kvlog {
    ($logger:expr, $($item:expr),+ $(,)?) => {
        $crate::logger::KeyValLogger::log(
            &$logger,
            &[$($crate::value::KeyVal::from($item)),+],
        )
    };
}
