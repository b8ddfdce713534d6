// Well-known names shared by the agent's crates: configuration keys, the
// scratch layout and process return codes.

// ---------------------------------------------------------------------------
// Top-level constants
// ---------------------------------------------------------------------------

/// Package name used in the HTTP user agent.
pub const PACKAGE_NAME: &str = "runtime-agent";

/// Agent version, taken from the workspace manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default scratch root, relative to the working directory.
pub const DEFAULT_SCRATCH_DIR: &str = "./temp";

// ---------------------------------------------------------------------------
// Configuration surface
// ---------------------------------------------------------------------------

/// Configuration keys read from the environment snapshot.
pub mod variables {
    pub mod aws {
        pub const REGION: &str = "AWS_REGION";
        pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
        pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
        pub const SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
        pub const ENDPOINT_URL: &str = "AWS_ENDPOINT_URL";
    }

    pub mod action {
        pub const BUCKET: &str = "ACTION_BUCKET";
        pub const FILE: &str = "ACTION_FILE";
        pub const LOCAL_STORE: &str = "ACTION_LOCAL_STORE";
        pub const SCRATCH_DIR: &str = "ACTION_SCRATCH_DIR";
        pub const STAGE_TIMEOUT_SECS: &str = "ACTION_STAGE_TIMEOUT_SECS";
        pub const LOG_JSON: &str = "ACTION_LOG_JSON";
    }

    pub mod agent {
        pub const CONTROL_ENDPOINT: &str = "CONTROL_ENDPOINT";
        pub const TLS_NO_VERIFY: &str = "ACTION_AGENT_TLS_NO_VERIFY";
    }

    /// Entries carrying this prefix become invocation parameters.
    pub const PARAM_PREFIX: &str = "CA_PARAM_";

    /// Prefix of the per-parameter environment variables given to
    /// executable entry points.
    pub const INPUT_PREFIX: &str = "INPUT_";
}

// ---------------------------------------------------------------------------
// Scratch layout
// ---------------------------------------------------------------------------

/// Names of the entries below the scratch root.
pub mod layout {
    /// The downloaded package archive.
    pub const ARCHIVE_FILE: &str = "action";
    /// Directory the archive is expanded into.
    pub const EXTRACT_DIR: &str = "extracted";
    /// Directory entry modules are staged into before loading.
    pub const MODULES_DIR: &str = "modules";
    /// File stem of the entry module inside the extracted tree.
    pub const ENTRY_MODULE: &str = "index";
}

// ---------------------------------------------------------------------------
// ReturnCode
// ---------------------------------------------------------------------------

/// Process return / exit codes.
pub mod return_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
}
