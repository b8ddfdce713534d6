// Execution driver: one action run from workspace reset to terminal report.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use agent_common::{AgentSettings, ConfigSnapshot, RunResult};

use crate::error::{AgentError, Stage};
use crate::fetcher::{fetch_package, BlobCoordinate, BlobStore};
use crate::loader::{LoadToken, ModuleLoader};
use crate::parameters::collect_parameters;
use crate::reporter::StatusReporter;
use crate::unpacker::unpack;
use crate::workspace::Workspace;

/// How a run ended.
#[derive(Debug)]
pub enum RunReport {
    /// The entry point resolved with this value and COMPLETED was sent.
    Completed(Value),
    /// A stage failed after STARTED; FAILED was sent.
    Failed(AgentError),
    /// The workspace could not be prepared. Nothing was reported.
    Aborted(AgentError),
}

impl RunReport {
    pub fn result(&self) -> RunResult {
        match self {
            RunReport::Completed(_) => RunResult::Succeeded,
            RunReport::Failed(_) | RunReport::Aborted(_) => RunResult::Failed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.result().return_code()
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            RunReport::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AgentError> {
        match self {
            RunReport::Completed(_) => None,
            RunReport::Failed(e) | RunReport::Aborted(e) => Some(e),
        }
    }
}

/// Drives the acquire, unpack, load, invoke and report sequence.
///
/// The stages of one run are strictly sequential. A runner may be reused for
/// further runs; every run loads its entry module under a fresh token.
pub struct ActionRunner {
    settings: AgentSettings,
    store: Arc<dyn BlobStore>,
    reporter: StatusReporter,
    loader: ModuleLoader,
    stage_timeout: Option<Duration>,
}

impl ActionRunner {
    pub fn new(settings: AgentSettings, store: Arc<dyn BlobStore>, reporter: StatusReporter) -> Self {
        Self {
            settings,
            store,
            reporter,
            loader: ModuleLoader::new(),
            stage_timeout: None,
        }
    }

    /// Bound each of fetch, unpack and invoke by `timeout`.
    ///
    /// A timed-out unpack stops before its next archive entry. A timed-out
    /// native invocation cannot be interrupted: its blocking thread keeps
    /// running and may still touch the workspace while a reused runner
    /// prepares the next run. Executable entry points are killed.
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Run the configured action once in a workspace at `workspace_root`.
    ///
    /// Invocation parameters come from `snapshot`.
    pub async fn run(&self, workspace_root: &Path, snapshot: &ConfigSnapshot) -> RunReport {
        let token = LoadToken::next();
        let span = tracing::info_span!("action_run", run_id = %Uuid::new_v4(), load_token = %token);
        self.run_once(workspace_root, snapshot, token)
            .instrument(span)
            .await
    }

    async fn run_once(
        &self,
        workspace_root: &Path,
        snapshot: &ConfigSnapshot,
        token: LoadToken,
    ) -> RunReport {
        let workspace = match Workspace::prepare(workspace_root) {
            Ok(workspace) => workspace,
            Err(error) => {
                tracing::error!(kind = error.kind(), "{}", error.report_message());
                return RunReport::Aborted(error);
            }
        };

        if let Err(e) = self.reporter.report_started().await {
            tracing::warn!("{}", e.report_message());
        }

        match self.execute(&workspace, snapshot, token).await {
            Ok(value) => {
                tracing::info!("Action completed");
                if let Err(e) = self.reporter.report_completed(&value).await {
                    tracing::warn!("{}", e.report_message());
                }
                RunReport::Completed(value)
            }
            Err(error) => {
                tracing::error!(kind = error.kind(), "Action failed: {}", error.report_message());
                if let Err(e) = self.reporter.report_failed(&error).await {
                    tracing::warn!("{}", e.report_message());
                }
                RunReport::Failed(error)
            }
        }
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        snapshot: &ConfigSnapshot,
        token: LoadToken,
    ) -> Result<Value, AgentError> {
        let coordinate = BlobCoordinate::new(
            self.settings.action_bucket()?,
            self.settings.action_file()?,
        );

        self.bounded(
            Stage::Fetch,
            fetch_package(self.store.as_ref(), &coordinate, workspace),
        )
        .await?;

        self.bounded(
            Stage::Unpack,
            unpack(workspace.archive_path(), workspace.extract_dir()),
        )
        .await?;

        let parameters = collect_parameters(snapshot);
        let entry = self.loader.load(workspace, token)?;

        tracing::info!(
            kind = %entry.kind(),
            parameters = parameters.len(),
            "Invoking entry point"
        );
        self.bounded(Stage::Invoke, async {
            entry
                .invoke(&parameters)
                .await
                .map_err(AgentError::invocation)
        })
        .await
    }

    async fn bounded<T>(
        &self,
        stage: Stage,
        future: impl Future<Output = Result<T, AgentError>>,
    ) -> Result<T, AgentError> {
        match self.stage_timeout {
            None => future.await,
            Some(after) => tokio::time::timeout(after, future)
                .await
                .map_err(|_| AgentError::Timeout { stage, after })?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::LocalBlobStore;
    use async_trait::async_trait;

    struct StalledStore;

    #[async_trait]
    impl BlobStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch(&self, _: &BlobCoordinate, _: &Path) -> anyhow::Result<u64> {
            std::future::pending().await
        }
    }

    fn settings(bucket: Option<&str>, file: Option<&str>) -> AgentSettings {
        AgentSettings {
            action_bucket: bucket.map(str::to_string),
            action_file: file.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn report_exit_codes() {
        assert_eq!(RunReport::Completed(Value::Null).exit_code(), 0);
        let failed = RunReport::Failed(AgentError::invocation(anyhow::anyhow!("x")));
        assert_eq!(failed.exit_code(), 1);
        assert!(failed.output().is_none());
        assert!(failed.error().is_some());
    }

    #[tokio::test]
    async fn missing_coordinates_fail_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ActionRunner::new(
            settings(None, Some("a.zip")),
            Arc::new(LocalBlobStore::new(dir.path())),
            StatusReporter::disabled(),
        );

        let report = runner.run(&dir.path().join("temp"), &ConfigSnapshot::new()).await;

        match report {
            RunReport::Failed(AgentError::Config(e)) => {
                assert_eq!(e.to_string(), "required configuration 'ACTION_BUCKET' is not set")
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_fetch_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ActionRunner::new(
            settings(Some("actions"), Some("a.zip")),
            Arc::new(StalledStore),
            StatusReporter::disabled(),
        )
        .with_stage_timeout(Some(Duration::from_secs(30)));

        let report = runner.run(&dir.path().join("temp"), &ConfigSnapshot::new()).await;

        match report.error() {
            Some(AgentError::Timeout { stage, after }) => {
                assert_eq!(*stage, Stage::Fetch);
                assert_eq!(*after, Duration::from_secs(30));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(report.exit_code(), 1);
    }
}
