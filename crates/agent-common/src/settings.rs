// Typed view over the agent's configuration surface.
//
// The binary snapshots the environment once at startup; everything below
// reads that snapshot, never the live environment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::constants::variables;

/// Immutable copy of the configuration surface (normally the environment).
pub type ConfigSnapshot = BTreeMap<String, String>;

/// Snapshot the current process environment.
///
/// Entries whose key or value is not valid UTF-8 cannot be configuration and
/// are skipped.
pub fn snapshot_environment() -> ConfigSnapshot {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("required configuration '{0}' is not set")]
    Missing(&'static str),

    #[error("configuration '{name}' is not a valid URL ('{value}'): {source}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Blob-store region and credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint_url: Option<String>,
}

impl AwsSettings {
    /// Whether an explicit key pair was configured. Without one the default
    /// credential chain applies.
    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

/// Settings for one agent run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSettings {
    pub aws: AwsSettings,
    pub action_bucket: Option<String>,
    pub action_file: Option<String>,
    /// Where lifecycle reports go. `None` disables transmission.
    pub control_endpoint: Option<Url>,
    /// Read packages from this directory instead of S3.
    pub local_store: Option<PathBuf>,
    pub tls_no_verify: bool,
}

impl AgentSettings {
    /// Build settings from a configuration snapshot.
    ///
    /// Blank values count as unset; other values are kept verbatim. Only a malformed control endpoint fails
    /// here: without it no failure could be reported anywhere. Missing package
    /// coordinates surface later through [`AgentSettings::action_bucket`] and
    /// [`AgentSettings::action_file`] so they can be reported.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self, SettingsError> {
        let get = |name: &str| {
            snapshot
                .get(name)
                .filter(|v| !v.trim().is_empty())
                .cloned()
        };

        let control_endpoint = match get(variables::agent::CONTROL_ENDPOINT) {
            Some(value) => Some(Url::parse(value.trim()).map_err(|source| {
                SettingsError::InvalidUrl {
                    name: variables::agent::CONTROL_ENDPOINT,
                    value,
                    source,
                }
            })?),
            None => None,
        };

        Ok(Self {
            aws: AwsSettings {
                region: get(variables::aws::REGION),
                access_key_id: get(variables::aws::ACCESS_KEY_ID),
                secret_access_key: get(variables::aws::SECRET_ACCESS_KEY),
                session_token: get(variables::aws::SESSION_TOKEN),
                endpoint_url: get(variables::aws::ENDPOINT_URL),
            },
            action_bucket: get(variables::action::BUCKET),
            action_file: get(variables::action::FILE),
            control_endpoint,
            local_store: get(variables::action::LOCAL_STORE).map(PathBuf::from),
            tls_no_verify: get(variables::agent::TLS_NO_VERIFY)
                .and_then(|v| convert_to_bool(&v))
                .unwrap_or(false),
        })
    }

    /// The bucket holding the action package.
    pub fn action_bucket(&self) -> Result<&str, SettingsError> {
        self.action_bucket
            .as_deref()
            .ok_or(SettingsError::Missing(variables::action::BUCKET))
    }

    /// The object key of the action package.
    pub fn action_file(&self) -> Result<&str, SettingsError> {
        self.action_file
            .as_deref()
            .ok_or(SettingsError::Missing(variables::action::FILE))
    }
}

/// Convert a string to a boolean.
///
/// Valid true values: `"1"`, `"true"`, `"yes"` (case-insensitive).
/// Valid false values: `"0"`, `"false"`, `"no"` (case-insensitive).
/// Returns `None` for unrecognized values.
pub fn convert_to_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
