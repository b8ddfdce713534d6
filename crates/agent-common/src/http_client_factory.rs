// Creates HTTP clients for talking to the control endpoint.

use anyhow::Result;
use reqwest::Client;

use crate::constants::{PACKAGE_NAME, VERSION};
use crate::settings::AgentSettings;

/// Creates properly configured HTTP clients for the agent.
pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Create a new `reqwest::Client` for the given settings.
    ///
    /// - Proxies come from the standard `HTTP_PROXY` / `HTTPS_PROXY` /
    ///   `NO_PROXY` variables, which reqwest honours by default.
    /// - If `ACTION_AGENT_TLS_NO_VERIFY` is set, TLS certificate
    ///   verification is disabled (dangerous!).
    pub fn create_client(settings: &AgentSettings) -> Result<Client> {
        let mut builder = Client::builder().user_agent(Self::user_agent());

        if settings.tls_no_verify {
            tracing::warn!("TLS certificate verification is disabled for the control endpoint");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;
        Ok(client)
    }

    /// User agent sent with every request.
    pub fn user_agent() -> String {
        format!("{PACKAGE_NAME}/{VERSION}")
    }
}
