use crate::error::{BuildError, SinkError};
use crate::record::LogRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

/// Asynchronous destination for [`LogRecord`]s produced by the logging layer.
///
/// Implementations are responsible for transporting records to a concrete
/// destination (stdout, a file, memory, ...). The layer calls `send` from
/// its background worker and never awaits it on the application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Send a single log record to the underlying destination.
    ///
    /// **Parameters**
    /// - `record`: fully-populated [`LogRecord`] produced by the layer.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted.
    /// - `Err(..)` if the destination failed. The worker treats this as a
    ///   transient failure and retries the batch with backoff.
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError>;

    /// Flush any buffered records, if the destination implements buffering.
    ///
    /// Called by the worker when a logger is synced and before it exits.
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// How a [`WriterSink`] lays out each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One compact JSON object per line.
    #[default]
    Json,
    /// Indented JSON, one object per block. Meant for humans.
    Pretty,
}

/// Where a [`WriterSink`] writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl FromStr for OutputTarget {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(BuildError::InvalidConfig("empty output target".to_string())),
            "stdout" => Ok(OutputTarget::Stdout),
            "stderr" => Ok(OutputTarget::Stderr),
            path => Ok(OutputTarget::File(PathBuf::from(path))),
        }
    }
}

impl TryFrom<String> for OutputTarget {
    type Error = BuildError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<OutputTarget> for String {
    fn from(t: OutputTarget) -> Self {
        t.to_string()
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Stdout => f.write_str("stdout"),
            OutputTarget::Stderr => f.write_str("stderr"),
            OutputTarget::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Sink that encodes records as Cloud Logging JSON onto a byte stream.
pub struct WriterSink {
    writer: Mutex<Box<dyn Write + Send>>,
    encoding: Encoding,
    timestamp_key: String,
}

impl WriterSink {
    /// Wrap an arbitrary writer.
    pub fn new(
        writer: Box<dyn Write + Send>,
        encoding: Encoding,
        timestamp_key: impl Into<String>,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            encoding,
            timestamp_key: timestamp_key.into(),
        }
    }

    /// Open the given target. Files are created if missing and appended to.
    ///
    /// **Returns**
    /// - `Err(BuildError::Output { .. })` if the file cannot be opened.
    pub fn open(
        target: &OutputTarget,
        encoding: Encoding,
        timestamp_key: impl Into<String>,
    ) -> Result<Self, BuildError> {
        let writer: Box<dyn Write + Send> = match target {
            OutputTarget::Stdout => Box::new(io::stdout()),
            OutputTarget::Stderr => Box::new(io::stderr()),
            OutputTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| BuildError::Output {
                        target: target.to_string(),
                        source,
                    })?;
                Box::new(io::BufWriter::new(file))
            }
        };
        Ok(Self::new(writer, encoding, timestamp_key))
    }

    fn encode(&self, record: &LogRecord) -> Result<Vec<u8>, SinkError> {
        let value = record.to_cloud_json(&self.timestamp_key);
        let mut buf = match self.encoding {
            Encoding::Json => serde_json::to_vec(&value)?,
            Encoding::Pretty => serde_json::to_vec_pretty(&value)?,
        };
        buf.push(b'\n');
        Ok(buf)
    }
}

#[async_trait]
impl LogSink for WriterSink {
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
        let buf = self.encode(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| "log writer lock poisoned")?;
        writer.write_all(&buf)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| "log writer lock poisoned")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Severity;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            severity: Severity::Info,
            message: message.to_string(),
            labels: BTreeMap::new(),
            source_location: None,
            service_context: None,
        }
    }

    #[test]
    fn test_output_target_parse() {
        assert_eq!("stdout".parse::<OutputTarget>().unwrap(), OutputTarget::Stdout);
        assert_eq!("stderr".parse::<OutputTarget>().unwrap(), OutputTarget::Stderr);
        assert_eq!(
            "/var/log/app.log".parse::<OutputTarget>().unwrap(),
            OutputTarget::File(PathBuf::from("/var/log/app.log"))
        );
        assert!(matches!(
            "".parse::<OutputTarget>(),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let target = OutputTarget::File(PathBuf::from("/nonexistent-dir-for-log-test/x/app.log"));
        let err = WriterSink::open(&target, Encoding::Json, "timestamp").err().unwrap();
        assert!(matches!(err, BuildError::Output { .. }));
    }

    #[tokio::test]
    async fn test_json_lines() {
        let buf = SharedBuf::default();
        let sink = WriterSink::new(Box::new(buf.clone()), Encoding::Json, "timestamp");
        sink.send(&record("one")).await.unwrap();
        sink.send(&record("two")).await.unwrap();
        sink.flush().await.unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message"], "one");
        assert_eq!(first["severity"], "INFO");
    }

    #[tokio::test]
    async fn test_pretty_is_multiline() {
        let buf = SharedBuf::default();
        let sink = WriterSink::new(Box::new(buf.clone()), Encoding::Pretty, "ts");
        sink.send(&record("pretty")).await.unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.lines().count() > 1);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(parsed.get("ts").is_some());
    }
}
