use crate::error::{BuildError, FlushError, SinkError};
use crate::field::{ServiceContext, SourceLocation};
use crate::level::Severity;
use crate::record::LogRecord;
use crate::sink::LogSink;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

// Event field names shared between the backend (writer) and the layer (reader).
pub(crate) const SEVERITY_FIELD: &str = "severity";
pub(crate) const LABELS_FIELD: &str = "labels";
pub(crate) const SOURCE_FILE_FIELD: &str = "source_file";
pub(crate) const SOURCE_LINE_FIELD: &str = "source_line";
pub(crate) const SERVICE_FIELD: &str = "service";
pub(crate) const SERVICE_VERSION_FIELD: &str = "service_version";

/// Tuning knobs of the background worker.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Maximum number of queued records. Emitters block while it is full.
    pub channel_buffer: usize,
    /// Records handed to the sink per batch.
    pub batch_size: usize,
    /// Maximum time a partial batch waits before being sent.
    pub flush_interval: Duration,
    /// Retries of a failing batch before it is discarded.
    pub max_retries: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

impl WorkerSettings {
    // Enforce minimal thresholds to avoid degenerate configs.
    fn normalized(self) -> Self {
        Self {
            channel_buffer: self.channel_buffer.max(16),
            batch_size: self.batch_size.max(1),
            flush_interval: self.flush_interval.max(Duration::from_millis(10)),
            max_retries: self.max_retries,
        }
    }
}

/// Counters exposed by the layer.
#[derive(Debug, Default)]
pub struct LayerStats {
    /// Events seen by the layer, before filtering by severity.
    pub total_events: AtomicU64,
    /// Records successfully enqueued for the worker.
    pub enqueued_events: AtomicU64,
    /// Records dropped because the worker was gone.
    pub dropped_events: AtomicU64,
    /// Records discarded after exhausting retries.
    pub failed_events: AtomicU64,
}

enum Command {
    Record(LogRecord),
    Flush(mpsc::Sender<Result<(), SinkError>>),
    Shutdown,
}

/// `tracing_subscriber` layer that turns events into Cloud Logging
/// [`LogRecord`]s and forwards them to a [`LogSink`] through a bounded
/// channel and a background worker thread.
///
/// Events below `min_severity` are ignored. Sink I/O never happens on the
/// thread that emitted the event, but the emitter waits for room in the
/// channel when the worker falls behind.
pub struct CloudLoggingLayer {
    sender: SyncSender<Command>,
    min_severity: Severity,
    stats: Arc<LayerStats>,
}

/// Owning handle of the worker started by [`CloudLoggingLayer::new`].
///
/// Dropping it asks the worker to drain, flush the sink and exit, and waits
/// for that to happen. Records the layer emits afterwards are dropped.
pub struct Pipeline {
    sender: Option<SyncSender<Command>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<LayerStats>,
    // Dropped plus failed records already reported by `flush`.
    reported_losses: AtomicU64,
}

impl CloudLoggingLayer {
    /// Create a new layer and start a worker thread that pulls
    /// [`LogRecord`]s from a bounded channel and sends them to `sink`.
    ///
    /// **Parameters**
    /// - `sink`: destination of the records.
    /// - `min_severity`: records below this severity are discarded.
    /// - `settings`: buffering and batching behavior. Minimal thresholds
    ///   are enforced.
    ///
    /// **Returns**
    /// - the layer to install into a subscriber, and the [`Pipeline`] used
    ///   to flush it.
    /// - `Err(BuildError::Worker)` if the worker thread or its runtime
    ///   cannot be started.
    pub fn new(
        sink: Arc<dyn LogSink>,
        min_severity: Severity,
        settings: WorkerSettings,
    ) -> Result<(Self, Pipeline), BuildError> {
        let settings = settings.normalized();
        let (tx, rx) = mpsc::sync_channel::<Command>(settings.channel_buffer);
        let stats = Arc::new(LayerStats::default());

        // The worker owns a single-threaded runtime to drive the async sink.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(BuildError::Worker)?;

        let stats_bg = Arc::clone(&stats);
        let worker = std::thread::Builder::new()
            .name("kv-log-worker".to_string())
            .spawn(move || run_worker(rx, sink, settings, stats_bg, runtime))
            .map_err(BuildError::Worker)?;

        let layer = Self {
            sender: tx.clone(),
            min_severity,
            stats: Arc::clone(&stats),
        };
        let pipeline = Pipeline {
            sender: Some(tx),
            worker: Some(worker),
            stats,
            reported_losses: AtomicU64::new(0),
        };
        Ok((layer, pipeline))
    }
}

impl Pipeline {
    /// Block until every record enqueued before this call has been handed
    /// to the sink, then flush the sink.
    ///
    /// **Returns**
    /// - `Err(FlushError::Sink)` if the final batch or the sink flush failed.
    /// - `Err(FlushError::Lost)` if records were dropped or discarded after
    ///   failed retries since the previous flush.
    /// - `Err(FlushError::Closed)` if the worker is gone.
    pub fn flush(&self) -> Result<(), FlushError> {
        let sender = self.sender.as_ref().ok_or(FlushError::Closed)?;
        let (ack_tx, ack_rx) = mpsc::channel();
        sender
            .send(Command::Flush(ack_tx))
            .map_err(|_| FlushError::Closed)?;
        let res = ack_rx.recv().map_err(|_| FlushError::Closed)?;

        let losses = self.stats.dropped_events.load(Ordering::Relaxed)
            + self.stats.failed_events.load(Ordering::Relaxed);
        let lost = losses.saturating_sub(self.reported_losses.swap(losses, Ordering::Relaxed));

        res.map_err(FlushError::Sink)?;
        if lost > 0 {
            return Err(FlushError::Lost(lost));
        }
        Ok(())
    }

    pub fn stats(&self) -> &LayerStats {
        &self.stats
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Command::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                eprintln!("log worker panicked");
            }
        }
    }
}

fn run_worker(
    rx: mpsc::Receiver<Command>,
    sink: Arc<dyn LogSink>,
    settings: WorkerSettings,
    stats: Arc<LayerStats>,
    runtime: tokio::runtime::Runtime,
) {
    let mut batch = Vec::with_capacity(settings.batch_size);
    let retry = Retry {
        backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(10),
        max_retries: settings.max_retries,
    };

    loop {
        match rx.recv_timeout(settings.flush_interval) {
            Ok(Command::Record(record)) => {
                batch.push(record);
                if batch.len() >= settings.batch_size {
                    if let Err(e) = runtime.block_on(send_batch(&*sink, &mut batch, &retry, &stats)) {
                        eprintln!("error sending log batch: {}", e);
                    }
                }
            }
            Ok(Command::Flush(ack)) => {
                let res = runtime.block_on(drain(&*sink, &mut batch, &retry, &stats));
                // The caller may have given up waiting; nothing to do then.
                let _ = ack.send(res);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    if let Err(e) = runtime.block_on(send_batch(&*sink, &mut batch, &retry, &stats)) {
                        eprintln!("error flushing log batch: {}", e);
                    }
                }
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                if let Err(e) = runtime.block_on(drain(&*sink, &mut batch, &retry, &stats)) {
                    eprintln!("error flushing log batch on shutdown: {}", e);
                }
                return;
            }
        }
    }
}

struct Retry {
    backoff: Duration,
    max_backoff: Duration,
    max_retries: u32,
}

async fn drain(
    sink: &dyn LogSink,
    batch: &mut Vec<LogRecord>,
    retry: &Retry,
    stats: &LayerStats,
) -> Result<(), SinkError> {
    send_batch(sink, batch, retry, stats).await?;
    sink.flush().await
}

/// Deliver `batch` in order. Records already accepted by the sink are not
/// resent on retry. After `max_retries` failed attempts the rest of the
/// batch is discarded and the last error returned.
async fn send_batch(
    sink: &dyn LogSink,
    batch: &mut Vec<LogRecord>,
    retry: &Retry,
    stats: &LayerStats,
) -> Result<(), SinkError> {
    let mut backoff = retry.backoff;
    let mut attempt = 0;
    loop {
        let mut sent = 0;
        let mut last_err: Option<SinkError> = None;
        for record in batch.iter() {
            if let Err(e) = sink.send(record).await {
                last_err = Some(e);
                break;
            }
            sent += 1;
        }
        batch.drain(..sent);

        let Some(err) = last_err else {
            return Ok(());
        };

        attempt += 1;
        if attempt > retry.max_retries {
            stats
                .failed_events
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            batch.clear();
            return Err(err);
        }

        eprintln!("log sink send failed, retrying in {:?}: {}", backoff, err);
        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, retry.max_backoff);
    }
}

fn severity_of(level: &Level) -> Severity {
    if *level == Level::ERROR {
        Severity::Error
    } else if *level == Level::WARN {
        Severity::Warn
    } else if *level == Level::INFO {
        Severity::Info
    } else {
        Severity::Debug
    }
}

impl<S> Layer<S> for CloudLoggingLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.stats.total_events.fetch_add(1, Ordering::Relaxed);

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let severity = visitor
            .severity
            .as_deref()
            .and_then(Severity::from_cloud_severity)
            .unwrap_or_else(|| severity_of(event.metadata().level()));
        if severity < self.min_severity {
            return;
        }

        let record = LogRecord {
            timestamp: Utc::now(),
            severity,
            message: visitor.message.unwrap_or_default(),
            labels: visitor.labels,
            source_location: match (visitor.source_file, visitor.source_line) {
                (Some(file), Some(line)) => Some(SourceLocation::new(file, line)),
                _ => None,
            },
            service_context: visitor
                .service
                .map(|s| ServiceContext::new(s, visitor.service_version.unwrap_or_default())),
        };

        // Blocks while the channel is full. Fails only once the worker exited.
        match self.sender.send(Command::Record(record)) {
            Ok(()) => {
                self.stats.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("log worker stopped, dropping log record");
            }
        }
    }
}

/// Collects the fields written by [`TracingBackend`](crate::backend::TracingBackend).
///
/// Unknown fields from foreign events are folded into labels.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    severity: Option<String>,
    labels: BTreeMap<String, String>,
    source_file: Option<String>,
    source_line: Option<u32>,
    service: Option<String>,
    service_version: Option<String>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            SEVERITY_FIELD => self.severity = Some(value),
            LABELS_FIELD => match serde_json::from_str::<BTreeMap<String, String>>(&value) {
                Ok(labels) => self.labels.extend(labels),
                Err(_) => {
                    self.labels.insert(LABELS_FIELD.to_string(), value);
                }
            },
            SOURCE_FILE_FIELD => self.source_file = Some(value),
            SOURCE_LINE_FIELD => self.source_line = value.parse().ok(),
            SERVICE_FIELD => self.service = Some(value),
            SERVICE_VERSION_FIELD => self.service_version = Some(value),
            other => {
                self.labels.insert(other.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_sink::MemorySink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn dispatch_with(
        sink: Arc<dyn LogSink>,
        min: Severity,
        settings: WorkerSettings,
    ) -> (tracing::Dispatch, Pipeline) {
        let (layer, pipeline) = CloudLoggingLayer::new(sink, min, settings).unwrap();
        let dispatch = tracing::Dispatch::new(Registry::default().with(layer));
        (dispatch, pipeline)
    }

    #[test]
    fn test_foreign_events_are_captured() {
        let sink = MemorySink::new();
        let (dispatch, pipeline) =
            dispatch_with(Arc::new(sink.clone()), Severity::Debug, WorkerSettings::default());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::warn!(user_id = 42, "quota exceeded");
        });
        pipeline.flush().unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Warn);
        assert_eq!(records[0].message, "quota exceeded");
        assert_eq!(records[0].labels.get("user_id").map(String::as_str), Some("42"));
        assert!(sink.flush_count() >= 1);
    }

    #[test]
    fn test_min_severity_filters() {
        let sink = MemorySink::new();
        let (dispatch, pipeline) =
            dispatch_with(Arc::new(sink.clone()), Severity::Info, WorkerSettings::default());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::debug!("hidden");
            tracing::info!("shown");
        });
        pipeline.flush().unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "shown");
        assert_eq!(pipeline.stats().total_events.load(Ordering::Relaxed), 2);
        assert_eq!(pipeline.stats().enqueued_events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_backend_fields_are_decoded() {
        let sink = MemorySink::new();
        let (dispatch, pipeline) =
            dispatch_with(Arc::new(sink.clone()), Severity::Debug, WorkerSettings::default());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::error!(
                severity = "CRITICAL",
                labels = r#"{"k":"v"}"#,
                source_file = "src/a.rs",
                source_line = 7u32,
                service = "svc",
                service_version = "1.0",
                "{}",
                "boom"
            );
        });
        pipeline.flush().unwrap();

        let rec = &sink.records()[0];
        assert_eq!(rec.severity, Severity::DPanic);
        assert_eq!(rec.message, "boom");
        assert_eq!(rec.labels.get("k").map(String::as_str), Some("v"));
        assert_eq!(rec.source_location, Some(SourceLocation::new("src/a.rs", 7)));
        assert_eq!(rec.service_context, Some(ServiceContext::new("svc", "1.0")));
    }

    #[test]
    fn test_partial_batch_sent_on_interval() {
        let sink = MemorySink::new();
        let settings = WorkerSettings {
            batch_size: 100,
            flush_interval: Duration::from_millis(20),
            ..WorkerSettings::default()
        };
        let (dispatch, _pipeline) = dispatch_with(Arc::new(sink.clone()), Severity::Debug, settings);

        tracing::dispatcher::with_default(&dispatch, || tracing::info!("tick"));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_drop_drains_pending_records() {
        let sink = MemorySink::new();
        let settings = WorkerSettings {
            flush_interval: Duration::from_secs(60),
            ..WorkerSettings::default()
        };
        let (dispatch, pipeline) = dispatch_with(Arc::new(sink.clone()), Severity::Debug, settings);

        tracing::dispatcher::with_default(&dispatch, || tracing::info!("last words"));
        drop(dispatch);
        drop(pipeline);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.flush_count(), 1);
    }

    struct FlakySink {
        failures_left: Mutex<u32>,
        inner: MemorySink,
    }

    #[async_trait]
    impl LogSink for FlakySink {
        async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
            {
                let mut left = self.failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err("temporarily unavailable".into());
                }
            }
            self.inner.send(record).await
        }
    }

    #[test]
    fn test_retry_recovers_without_duplicates() {
        let inner = MemorySink::new();
        let sink = FlakySink { failures_left: Mutex::new(1), inner: inner.clone() };
        let (dispatch, pipeline) =
            dispatch_with(Arc::new(sink), Severity::Debug, WorkerSettings::default());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("first");
            tracing::info!("second");
        });
        pipeline.flush().unwrap();

        let messages: Vec<String> = inner.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_flush_reports_exhausted_retries() {
        let inner = MemorySink::new();
        let sink = FlakySink { failures_left: Mutex::new(u32::MAX), inner };
        let settings = WorkerSettings { max_retries: 0, ..WorkerSettings::default() };
        let (dispatch, pipeline) = dispatch_with(Arc::new(sink), Severity::Debug, settings);

        tracing::dispatcher::with_default(&dispatch, || tracing::info!("lost"));
        let err = pipeline.flush().unwrap_err();

        assert!(matches!(err, FlushError::Sink(_)));
        assert_eq!(pipeline.stats().failed_events.load(Ordering::Relaxed), 1);
        // Already reported through the sink error.
        pipeline.flush().unwrap();
    }

    #[test]
    fn test_flush_reports_records_lost_between_flushes() {
        let inner = MemorySink::new();
        let sink = FlakySink { failures_left: Mutex::new(1), inner: inner.clone() };
        let settings = WorkerSettings {
            batch_size: 1,
            max_retries: 0,
            ..WorkerSettings::default()
        };
        let (dispatch, pipeline) = dispatch_with(Arc::new(sink), Severity::Debug, settings);

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("discarded");
            tracing::info!("kept");
        });

        assert!(matches!(pipeline.flush(), Err(FlushError::Lost(1))));
        let messages: Vec<String> = inner.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["kept"]);
        pipeline.flush().unwrap();
    }

    struct SlowSink {
        inner: MemorySink,
    }

    #[async_trait]
    impl LogSink for SlowSink {
        async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.inner.send(record).await
        }
    }

    #[test]
    fn test_full_channel_applies_backpressure() {
        let inner = MemorySink::new();
        let settings = WorkerSettings {
            channel_buffer: 16,
            batch_size: 1,
            ..WorkerSettings::default()
        };
        let (dispatch, pipeline) =
            dispatch_with(Arc::new(SlowSink { inner: inner.clone() }), Severity::Debug, settings);

        tracing::dispatcher::with_default(&dispatch, || {
            for i in 0..200 {
                tracing::info!(i, "tick");
            }
        });
        pipeline.flush().unwrap();

        assert_eq!(inner.len(), 200);
        assert_eq!(pipeline.stats().dropped_events.load(Ordering::Relaxed), 0);
        assert_eq!(pipeline.stats().enqueued_events.load(Ordering::Relaxed), 200);
    }
}
