// Error taxonomy of an action run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use agent_common::SettingsError;

use crate::reporter::ReportStatus;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stages that can be bounded by the per-stage timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Unpack,
    Invoke,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Unpack => write!(f, "unpack"),
            Stage::Invoke => write!(f, "invoke"),
        }
    }
}

/// Everything that can end an action run early.
///
/// `Display` renders only the outermost message; use
/// [`AgentError::report_message`] for the full cause chain.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The scratch area could not be reset. Fatal and never reported.
    #[error("failed to prepare workspace '{}'", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("invalid configuration")]
    Config(#[from] SettingsError),

    #[error("failed to fetch action package '{key}' from bucket '{bucket}'")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to unpack action package '{}'", archive.display())]
    Unpack {
        archive: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to load entry module from '{}'", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("action entry point failed")]
    Invocation {
        #[source]
        source: BoxError,
    },

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("failed to deliver {status} report to the control endpoint")]
    Reporting {
        status: ReportStatus,
        #[source]
        source: reqwest::Error,
    },
}

impl AgentError {
    pub fn invocation(source: impl Into<BoxError>) -> Self {
        AgentError::Invocation {
            source: source.into(),
        }
    }

    /// Short name of the error kind, for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Workspace { .. } => "WorkspaceError",
            AgentError::Config(_) => "ConfigError",
            AgentError::Fetch { .. } => "FetchError",
            AgentError::Unpack { .. } => "UnpackError",
            AgentError::Load { .. } => "LoadError",
            AgentError::Invocation { .. } => "InvocationError",
            AgentError::Timeout { .. } => "TimeoutError",
            AgentError::Reporting { .. } => "ReportingError",
        }
    }

    /// The message and every cause below it, joined with `": "`.
    ///
    /// This is what a FAILED report carries.
    pub fn report_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.is_empty() && !message.ends_with(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn report_message_walks_the_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("NoSuchKey: the key does not exist"));
        let err = AgentError::Fetch {
            bucket: "actions".into(),
            key: "hello.zip".into(),
            source: inner.context("GetObject request failed").unwrap_err().into(),
        };
        assert_eq!(
            err.report_message(),
            "failed to fetch action package 'hello.zip' from bucket 'actions': \
             GetObject request failed: NoSuchKey: the key does not exist"
        );
        assert_eq!(err.kind(), "FetchError");
    }

    #[test]
    fn invocation_carries_the_action_message() {
        let err = AgentError::invocation(anyhow::anyhow!("division by zero"));
        assert_eq!(
            err.report_message(),
            "action entry point failed: division by zero"
        );
    }

    #[test]
    fn config_errors_convert() {
        let err: AgentError = SettingsError::Missing("ACTION_BUCKET").into();
        assert_eq!(err.kind(), "ConfigError");
        assert_eq!(
            err.report_message(),
            "invalid configuration: required configuration 'ACTION_BUCKET' is not set"
        );
    }

    #[test]
    fn timeout_message() {
        let err = AgentError::Timeout {
            stage: Stage::Invoke,
            after: Duration::from_secs(2),
        };
        assert_eq!(err.report_message(), "invoke stage timed out after 2s");
    }
}
