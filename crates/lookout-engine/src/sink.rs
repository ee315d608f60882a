use crate::config::ReportingConfig;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

/// Runtime classification fixed when a sink is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "prod", alias = "PROD")]
    Production,
    #[serde(alias = "dev", alias = "DEV")]
    Development,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub activity: Option<String>,
    pub error: EngineError,
    /// Document location when the failure was routed.
    pub location: Option<String>,
}

pub type ErrorHandler = Box<dyn FnOnce(ErrorReport) + Send>;

/// Destination for failures that have no caller-supplied handler.
pub trait ErrorSink: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Logs every report at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, report: &ErrorReport) {
        error!(
            activity = report.activity.as_deref().unwrap_or("-"),
            location = report.location.as_deref().unwrap_or("-"),
            "{}",
            report.error
        );
    }
}

/// Posts reports to a collection endpoint, only in [`Environment::Production`].
pub struct HttpSink {
    endpoint: Url,
    environment: Environment,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(endpoint: Url, environment: Environment) -> Self {
        Self {
            endpoint,
            environment,
            client: reqwest::Client::new(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    fn payload(report: &ErrorReport) -> serde_json::Value {
        json!({
            "message": report.error.to_string(),
            "location": report.location.clone().unwrap_or_default(),
            "activity": report.activity,
            "stack_trace": format!("{:?}", report.error),
        })
    }
}

impl ErrorSink for HttpSink {
    fn report(&self, report: &ErrorReport) {
        if self.environment != Environment::Production {
            debug!(
                environment = ?self.environment,
                error = %report.error,
                "Error report suppressed"
            );
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available to send error report");
            return;
        };
        let request = self
            .client
            .post(self.endpoint.clone())
            .json(&Self::payload(report));
        runtime.spawn(async move {
            if let Err(error) = request.send().await {
                debug!(%error, "Failed to deliver error report");
            }
        });
    }
}

/// `HttpSink` when an endpoint is configured, `LogSink` otherwise.
pub fn sink_from_config(config: &ReportingConfig) -> Arc<dyn ErrorSink> {
    match &config.endpoint {
        Some(endpoint) => Arc::new(HttpSink::new(endpoint.clone(), config.environment)),
        None => Arc::new(LogSink),
    }
}

/// Routes one failure to the caller's handler when present, else to the sink.
pub(crate) struct ErrorRoute {
    activity: Option<String>,
    handler: Option<ErrorHandler>,
    sink: Arc<dyn ErrorSink>,
}

impl ErrorRoute {
    pub(crate) fn new(
        activity: Option<String>,
        handler: Option<ErrorHandler>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            activity,
            handler,
            sink,
        }
    }

    pub(crate) fn deliver(self, error: impl Into<EngineError>, location: Option<String>) {
        let report = ErrorReport {
            activity: self.activity,
            error: error.into(),
            location,
        };
        match self.handler {
            Some(handler) => handler(report),
            None => self.sink.report(&report),
        }
    }
}
