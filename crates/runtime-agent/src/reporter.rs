// Lifecycle reporting to the control endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use agent_common::{AgentSettings, HttpClientFactory};

use crate::error::AgentError;

/// Lifecycle state carried by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Started => write!(f, "STARTED"),
            ReportStatus::Completed => write!(f, "COMPLETED"),
            ReportStatus::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    pub message: String,
}

/// Body of one lifecycle PUT.
///
/// ```json
/// {"status": "STARTED"}
/// {"status": "COMPLETED", "data": {"sum": 5}}
/// {"status": "FAILED", "error": {"message": "..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

impl LifecycleReport {
    pub fn started() -> Self {
        Self {
            status: ReportStatus::Started,
            data: None,
            error: None,
        }
    }

    /// COMPLETED always carries `data`, `null` included.
    pub fn completed(data: Value) -> Self {
        Self {
            status: ReportStatus::Completed,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            data: None,
            error: Some(ReportError {
                message: message.into(),
            }),
        }
    }
}

/// Sends lifecycle reports to the control endpoint, if one is configured.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    endpoint: Option<Url>,
    client: reqwest::Client,
}

impl StatusReporter {
    pub fn new(endpoint: Option<Url>, client: reqwest::Client) -> Self {
        Self { endpoint, client }
    }

    /// A reporter that never touches the network.
    pub fn disabled() -> Self {
        Self::new(None, reqwest::Client::new())
    }

    pub fn from_settings(settings: &AgentSettings) -> anyhow::Result<Self> {
        let client = HttpClientFactory::create_client(settings)?;
        Ok(Self::new(settings.control_endpoint.clone(), client))
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub async fn report_started(&self) -> Result<(), AgentError> {
        self.send(&LifecycleReport::started()).await
    }

    pub async fn report_completed(&self, data: &Value) -> Result<(), AgentError> {
        self.send(&LifecycleReport::completed(data.clone())).await
    }

    pub async fn report_failed(&self, error: &AgentError) -> Result<(), AgentError> {
        self.send(&LifecycleReport::failed(error.report_message()))
            .await
    }

    /// Deliver one report with a single PUT. Without an endpoint this is a
    /// no-op; a non-2xx response is an error.
    pub async fn send(&self, report: &LifecycleReport) -> Result<(), AgentError> {
        let Some(endpoint) = &self.endpoint else {
            tracing::debug!("No control endpoint configured, skipping {} report", report.status);
            return Ok(());
        };

        tracing::info!("Reporting {} to '{endpoint}'", report.status);

        let response = self
            .client
            .put(endpoint.clone())
            .json(report)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| AgentError::Reporting {
                status: report.status,
                source,
            })?;

        tracing::debug!(
            "Control endpoint accepted {} report (HTTP {})",
            report.status,
            response.status()
        );
        Ok(())
    }
}
