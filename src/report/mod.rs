//! Error reports written when a model exchange fails.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StewardConfig;
use crate::error::StewardError;

/// A failure together with what was being sent at the time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    /// Where the failure happened, e.g. `turn-send-message-stream`.
    pub kind: String,
    pub message: String,
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
    /// Request/history snapshot.
    pub context: serde_json::Value,
}

impl ErrorReport {
    pub fn new(kind: impl Into<String>, error: &StewardError, context: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            message: error.to_string(),
            status: error.status(),
            timestamp: Utc::now(),
            context,
        }
    }
}

/// Collaborator receiving error reports. Reporting never fails the caller.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, report: ErrorReport);
}

/// Logs reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingErrorReporter;

#[async_trait]
impl ErrorReporter for TracingErrorReporter {
    async fn report(&self, report: ErrorReport) {
        tracing::error!(
            kind = %report.kind,
            status = ?report.status,
            message = %report.message,
            "Model exchange failed"
        );
    }
}

/// Writes each report as a JSON file into a directory.
#[derive(Debug, Clone)]
pub struct FileErrorReporter {
    dir: PathBuf,
}

impl FileErrorReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reporter writing into the configured error report directory.
    pub fn from_config(config: &StewardConfig) -> Self {
        Self::new(config.error_report_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(report: &ErrorReport) -> String {
        format!(
            "steward-client-error-{}-{}.json",
            report.kind,
            report.timestamp.format("%Y-%m-%dT%H-%M-%S%.3fZ")
        )
    }
}

#[async_trait]
impl ErrorReporter for FileErrorReporter {
    async fn report(&self, report: ErrorReport) {
        let path = self.dir.join(Self::file_name(&report));
        let body = match serde_json::to_vec_pretty(&report) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, kind = %report.kind, "Could not serialize error report");
                return;
            }
        };
        match tokio::fs::write(&path, body).await {
            Ok(()) => tracing::error!(
                kind = %report.kind,
                message = %report.message,
                path = %path.display(),
                "Model exchange failed, full report written"
            ),
            Err(err) => tracing::error!(
                kind = %report.kind,
                message = %report.message,
                error = %err,
                "Model exchange failed, and the report could not be written"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_reporter_writes_json_reports() {
        let dir = TempDir::new().unwrap();
        let reporter = FileErrorReporter::new(dir.path());
        let error = StewardError::api(500, "backend exploded");
        reporter
            .report(ErrorReport::new(
                "generate-json",
                &error,
                serde_json::json!({ "contents": [] }),
            ))
            .await;

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("steward-client-error-generate-json-"));

        let report: ErrorReport =
            serde_json::from_slice(&std::fs::read(&entries[0]).unwrap()).unwrap();
        assert_eq!(report.status, Some(500));
        assert_eq!(report.context, serde_json::json!({ "contents": [] }));
    }

    #[tokio::test]
    async fn reporter_from_config_uses_the_configured_directory() {
        let dir = TempDir::new().unwrap();
        let config = StewardConfig::new().with_error_report_dir(dir.path());
        let reporter = FileErrorReporter::from_config(&config);
        assert_eq!(reporter.dir(), dir.path());

        reporter
            .report(ErrorReport::new(
                "turn-send-message-stream",
                &StewardError::Cancelled,
                serde_json::Value::Null,
            ))
            .await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
