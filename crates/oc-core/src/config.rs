use serde::Deserialize;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use oc_backend::ollama::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use oc_backend::OllamaClient;
use thiserror::Error;
use tracing::warn;

use crate::assembler::{
    AssemblerConfig, Markers, UnclosedPolicy, DEFAULT_CLOSE_MARKER, DEFAULT_OPEN_MARKER,
};
use crate::session::RequestOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub assembler: AssemblerSection,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the Ollama server.
    pub endpoint: String,
    /// Model every request is sent to.
    pub model: String,
    /// Request NDJSON streaming instead of a single JSON body.
    pub stream: bool,
    /// Optional system prompt sent with every request.
    pub system: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            stream: true,
            system: None,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    pub fn client(&self) -> OllamaClient {
        OllamaClient::with_model(&self.endpoint, &self.model)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblerSection {
    pub open_marker: String,
    pub close_marker: String,
    /// What to show while a thinking region is unclosed: "show" or "hide".
    pub unclosed: UnclosedPolicy,
    /// Seconds to wait for the next stream event. 0 disables the limit.
    /// Not applied when `backend.stream` is off, since the single response
    /// only arrives once generation has finished.
    pub idle_timeout_secs: u64,
}

impl Default for AssemblerSection {
    fn default() -> Self {
        Self {
            open_marker: DEFAULT_OPEN_MARKER.to_string(),
            close_marker: DEFAULT_CLOSE_MARKER.to_string(),
            unclosed: UnclosedPolicy::Show,
            idle_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Listen address. IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        match self.bind.trim().parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.bind, self.port),
        }
    }
}

impl Config {
    /// Load the default config file, falling back to defaults if it is
    /// missing or invalid.
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(&config_path())
    }

    fn load_or_default_from(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(e) => {
                warn!(error = %e, "using default config");
                Config::default()
            }
        }
    }

    /// Load an explicitly named config file. Errors are not masked.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `OLLAMA_HOST`, `OLLAMA_MODEL` and `PORT` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.trim().is_empty()) {
            self.backend.endpoint = normalize_host(host.trim());
        }
        if let Some(model) = lookup("OLLAMA_MODEL").filter(|v| !v.trim().is_empty()) {
            self.backend.model = model.trim().to_string();
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
            }
        }
        self
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            markers: Markers::new(&self.assembler.open_marker, &self.assembler.close_marker),
            unclosed: self.assembler.unclosed,
        }
    }

    /// Per-request settings derived from this config.
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            assembler: self.assembler_config(),
            idle_timeout: match self.assembler.idle_timeout_secs {
                _ if !self.backend.stream => None,
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// `OLLAMA_HOST` may be a bare `host:port`.
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("ollachat").join("config.toml")
}
