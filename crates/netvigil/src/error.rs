//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use netvigil_config::ConfigError;
use netvigil_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFIG: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {address}: {reason}")]
    #[diagnostic(
        code(netvigil::connection_failed),
        help("Check that the device is up and its management port is reachable from this host.")
    )]
    ConnectionFailed { address: String, reason: String },

    #[error("Timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(netvigil::timeout),
        help("Raise engine.probe_timeout or the device's probe_timeout in the config file.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("Device protocol error: {message}")]
    #[diagnostic(code(netvigil::protocol))]
    Protocol { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(netvigil::auth_failed),
        help("Verify the profile's credentials, or store them with: netvigil config set-secret")
    )]
    AuthFailed { message: String },

    #[error("No {secret} configured for '{owner}'")]
    #[diagnostic(
        code(netvigil::no_credentials),
        help(
            "Set it in the config file, point *_env at an environment variable,\n\
             or run: netvigil config set-secret {owner} <kind>"
        )
    )]
    NoCredentials { owner: String, secret: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(netvigil::not_found),
        help("Run: netvigil {list_command} to see what is configured")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("File already exists: {path}")]
    #[diagnostic(code(netvigil::conflict), help("Pass --force to overwrite it."))]
    AlreadyExists { path: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netvigil::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Could not load configuration")]
    #[diagnostic(
        code(netvigil::config),
        help("Check the file with: netvigil config check")
    )]
    Config(#[source] Box<ConfigError>),

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(netvigil::keyring),
        help("Set keyring = false and use *_env variables on hosts without a secret service.")
    )]
    Keyring { message: String },

    // ── Engine ───────────────────────────────────────────────────────
    #[error("Engine error: {message}")]
    #[diagnostic(code(netvigil::engine))]
    Engine { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(netvigil::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not render YAML: {0}")]
    #[diagnostic(code(netvigil::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::AlreadyExists { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(_) | Self::Keyring { .. } => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { owner, secret } => CliError::NoCredentials { owner, secret },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { address, reason } => {
                CliError::ConnectionFailed { address, reason }
            }

            CoreError::CoolingDown { address } => CliError::ConnectionFailed {
                address,
                reason: "cooling down after repeated failures".into(),
            },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::Timeout { timeout_ms } => CliError::Timeout { timeout_ms },

            CoreError::Protocol { message } => CliError::Protocol { message },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices list".into(),
            },

            CoreError::ConnectionNotFound { identifier } => CliError::NotFound {
                resource_type: "connection".into(),
                identifier,
                list_command: "devices links".into(),
            },

            CoreError::ProfileNotFound { name } => CliError::NotFound {
                resource_type: "profile".into(),
                identifier: name,
                list_command: "config show".into(),
            },

            CoreError::MissingCredentials { device, protocol } => CliError::NoCredentials {
                owner: device,
                secret: format!("{protocol} credentials"),
            },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            e @ (CoreError::Cancelled | CoreError::AlreadyRunning | CoreError::Internal(_)) => {
                CliError::Engine {
                    message: e.to_string(),
                }
            }
        }
    }
}
