//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::policy::{Policy, PolicyAction};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Fallback action for requests no policy matches
    pub default_action: DefaultAction,
    /// Broker pass-through configuration
    pub broker: BrokerConfig,
    /// Per-run proxy pool tuning
    pub proxy_pool: ProxyPoolSettings,
    /// Sandbox path roots
    pub sandbox: SandboxPathsConfig,
    /// Activity channel tuning
    pub activity: ActivityConfig,
    /// Fallback policy source when no scoped storage is bound
    pub policies: Vec<Policy>,
}

/// Default action for non-matching requests. `approval` is not a valid
/// default, which is why this is narrower than [`PolicyAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    /// Permit non-matching requests.
    Allow,
    /// Refuse non-matching requests.
    #[default]
    Deny,
}

impl From<DefaultAction> for PolicyAction {
    fn from(action: DefaultAction) -> Self {
        match action {
            DefaultAction::Allow => PolicyAction::Allow,
            DefaultAction::Deny => PolicyAction::Deny,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4787,
        }
    }
}

/// Broker pass-through configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    /// Broker HTTP port, copied into every sandbox specification
    pub http_port: Option<u16>,
}

/// Per-run proxy pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyPoolSettings {
    /// Maximum simultaneously live per-run proxies
    pub max_concurrent: usize,
    /// Idle time after which a proxy is reclaimed
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for ProxyPoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Path roots consumed by the sandbox specification builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxPathsConfig {
    /// Agent home directory; falls back to the process user's home
    pub agent_home: Option<PathBuf>,
    /// Directory holding the shield binaries
    pub shield_bin_dir: Option<PathBuf>,
    /// Name of the agent-private metadata directory under the agent home
    pub metadata_dir_name: String,
}

impl Default for SandboxPathsConfig {
    fn default() -> Self {
        Self {
            agent_home: None,
            shield_bin_dir: None,
            metadata_dir_name: ".openclaw".to_string(),
        }
    }
}

impl SandboxPathsConfig {
    /// The effective agent home directory.
    #[must_use]
    pub fn agent_home(&self) -> Option<PathBuf> {
        self.agent_home.clone().or_else(dirs::home_dir)
    }
}

/// Activity channel tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityConfig {
    /// Per-subscriber event buffer; lagging subscribers drop oldest events
    pub buffer_size: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

impl Config {
    /// Load configuration from an optional YAML file with
    /// `AGENSHIELD_`-prefixed environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                figment = figment.merge(Yaml::file(path));
            }
            None => {
                figment = figment.merge(Yaml::file("agenshield.yaml"));
            }
        }
        let config: Self = figment
            .merge(Env::prefixed("AGENSHIELD_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.proxy_pool.max_concurrent == 0 {
            return Err(Error::Config(
                "proxyPool.maxConcurrent must be at least 1".to_string(),
            ));
        }
        for policy in &self.policies {
            if policy.id.trim().is_empty() {
                return Err(Error::Config("policy with empty id".to_string()));
            }
        }
        Ok(())
    }
}
