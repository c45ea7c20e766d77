//! Server configuration: TOML file + environment + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use pgw_client::ClientConfig;
use pgw_core::{GatewayError, GatewayResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// `[auth]` section: the shared secret callers must present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    pub api_token: Option<String>,
}

/// `[upstream]` section: downstream portal client behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Accept invalid TLS certificates on the downstream connection.
    /// Defaults to true: the typical deployment talks to self-signed
    /// on-prem appliances. This is a trust-boundary decision; turn it off
    /// when the portal has a real certificate.
    #[serde(default = "default_true")]
    pub insecure: bool,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            insecure: default_true(),
        }
    }
}

/// `[store]` section: session snapshot location and cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_session_file")]
    pub session_file: String,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

fn default_port() -> u16 {
    5000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_redirects() -> usize {
    5
}
fn default_session_file() -> String {
    "~/.pgw/sessions.json".to_string()
}
fn default_snapshot_interval_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

/// Resolved gateway configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: String,
    /// Shared secret. `None` rejects every authenticated call.
    pub api_token: Option<String>,
    pub upstream: ClientConfig,
    pub session_file: PathBuf,
    pub snapshot_interval: Duration,
}

impl GatewayConfig {
    /// Load config from a TOML file, then apply `PGW_*` environment
    /// variables, then CLI overrides (strongest last).
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_api_token: Option<&str>,
        cli_session_file: Option<&str>,
    ) -> GatewayResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| GatewayError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let env_port = std::env::var("PGW_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok());
        let env_token = std::env::var("PGW_API_TOKEN").ok();

        let port = cli_port
            .or(env_port)
            .unwrap_or(file_config.server.port);
        let api_token = cli_api_token
            .map(|s| s.to_string())
            .or(env_token)
            .or(file_config.auth.api_token);
        let session_file = cli_session_file
            .map(|s| s.to_string())
            .unwrap_or(file_config.store.session_file);

        Ok(Self {
            port,
            bind: file_config.server.bind,
            api_token,
            upstream: ClientConfig {
                insecure: file_config.upstream.insecure,
                timeout_secs: file_config.upstream.timeout_secs,
                max_redirects: file_config.upstream.max_redirects,
            },
            session_file: expand_tilde_str(&session_file),
            snapshot_interval: Duration::from_secs(file_config.store.snapshot_interval_secs),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
