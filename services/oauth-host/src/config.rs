//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from the OAUTH_CLIENT_SECRET env var or
//! `oauth.client_secret_file`, never stored in the TOML directly.

use common::Secret;
use oauth_client::{Endpoints, StorageSelector};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Registered client and API endpoints
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub redirect_url: String,
    pub scope: String,
    pub auth_base: String,
    pub api_base: String,
    /// Overrides `<auth_base>/token/`
    #[serde(default)]
    pub token_url: Option<String>,
}

/// Token storage backend
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// "session" or "flat-file"
    pub backend: String,
    /// Working directory for the flat-file backend
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Timeout for token and data requests to the third-party API
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound on in-memory sessions (session backend only)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions unused for this long are dropped
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(oauth_client::DEFAULT_STORAGE_DIR)
}

fn default_timeout() -> u64 {
    oauth_client::DEFAULT_TIMEOUT.as_secs()
}

fn default_max_connections() -> usize {
    100
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_session_idle() -> u64 {
    3600
}

impl OAuthConfig {
    pub fn endpoints(&self) -> Endpoints {
        let endpoints = Endpoints::new(self.auth_base.clone(), self.api_base.clone());
        match &self.token_url {
            Some(url) => endpoints.with_token_url(url.clone()),
            None => endpoints,
        }
    }
}

impl StorageConfig {
    pub fn selector(&self) -> common::Result<StorageSelector> {
        self.backend
            .parse()
            .map_err(|e: oauth_client::Error| common::Error::Config(e.to_string()))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OAUTH_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("auth_base", Some(&config.oauth.auth_base)),
            ("api_base", Some(&config.oauth.api_base)),
            ("token_url", config.oauth.token_url.as_ref()),
        ] {
            if let Some(url) = url
                && !url.starts_with("http://")
                && !url.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        config.storage.selector()?;

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.server.max_sessions == 0 {
            return Err(common::Error::Config(
                "max_sessions must be greater than 0".into(),
            ));
        }

        if config.server.session_idle_secs == 0 {
            return Err(common::Error::Config(
                "session_idle_secs must be greater than 0".into(),
            ));
        }

        // Resolve client secret: env var takes precedence over file
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.oauth.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oauth.client_secret = Some(Secret::new(secret));
            }
        }

        if config
            .oauth
            .client_secret
            .as_ref()
            .is_none_or(|secret| secret.is_blank())
        {
            return Err(common::Error::Config(format!(
                "client secret missing: set {CLIENT_SECRET_ENV} or oauth.client_secret_file"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-host.toml")
    }
}
