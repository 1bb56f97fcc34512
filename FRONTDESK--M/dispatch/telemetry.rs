use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};

/// Topic used for dispatch telemetry events.
pub const TELEMETRY_TOPIC: &str = "dispatch";

/// Builder for dispatch telemetry sinks.
pub struct DispatchTelemetryBuilder {
    component: String,
    log_path: Option<PathBuf>,
    log_level: LogLevel,
    sinks: Vec<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl DispatchTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            log_path: None,
            log_level: LogLevel::Info,
            sinks: Vec::new(),
            event_publisher: None,
        }
    }

    /// Sets the JSON log file.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Minimum level written to the log file.
    #[must_use]
    pub const fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Adds an extra log sink (receives every level).
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<DispatchTelemetry> {
        let mut sinks = self.sinks;
        if let Some(path) = self.log_path {
            let logger = JsonLogger::new(path)?.with_min_level(self.log_level);
            sinks.insert(0, Arc::new(logger));
        }
        Ok(DispatchTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                sinks,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by dispatch components.
#[derive(Clone)]
pub struct DispatchTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for DispatchTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTelemetry")
            .field("component", &self.inner.component)
            .field("sinks", &self.inner.sinks.len())
            .finish()
    }
}

struct TelemetryInner {
    component: String,
    sinks: Vec<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl DispatchTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> DispatchTelemetryBuilder {
        DispatchTelemetryBuilder::new(component)
    }

    /// Logs structured metadata to every sink. The first sink failure is returned
    /// after all sinks have been tried.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let mut record = LogRecord::new(&self.inner.component, level, message);
        if let Value::Object(fields) = metadata {
            record.metadata = fields;
        }
        let mut outcome = Ok(());
        for sink in &self.inner.sinks {
            if let Err(err) = sink.log(&record) {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    /// Publishes an event on the telemetry topic.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(EventRecord::new(
                    self.inner.component.clone(),
                    TELEMETRY_TOPIC,
                    event_type,
                    payload,
                ))
                .await?;
        }
        Ok(())
    }
}
