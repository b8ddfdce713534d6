// agent-common: Shared services and infrastructure for the runtime agent.
// Depends on nothing inside the workspace; the agent crate builds on it.

pub mod constants;
pub mod http_client_factory;
pub mod logging;
pub mod run_result;
pub mod settings;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use http_client_factory::HttpClientFactory;
pub use run_result::RunResult;
pub use settings::{AgentSettings, AwsSettings, ConfigSnapshot, SettingsError};
