//! Configuration management
//!
//! This module handles loading and validating configuration from TOML files,
//! layered with `EUFY_LOGIN__SECTION__KEY` environment overrides. The login
//! target table and header profiles live here as data so they can follow the
//! upstream service without code changes.

use crate::cloud::ClassificationRules;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Cloud account service settings
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Local gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Maximum number of attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Cloud login settings: ordered target table plus header profiles
#[derive(Debug, Deserialize, Clone)]
pub struct CloudConfig {
    /// Targets in priority order
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetConfig>,

    /// Header profiles, referenced by name from targets
    #[serde(default = "default_profiles")]
    pub profiles: BTreeMap<String, ProfileConfig>,

    /// Status-code classification table
    #[serde(default)]
    pub rules: ClassificationRules,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            profiles: default_profiles(),
            rules: ClassificationRules::default(),
        }
    }
}

/// One (host, endpoint, profile) entry of the target table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub host: String,
    pub endpoint: String,
    pub profile: String,

    /// Body layout expected by this API generation
    #[serde(default)]
    pub generation: ProtocolGeneration,
}

/// Which request body layout an API generation expects
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolGeneration {
    /// `{email, password}`
    #[default]
    Current,
    /// `{email, password, passwd}`
    Legacy,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Fixed protocol-identifying headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Header that carries a fresh nonce on every request
    #[serde(default)]
    pub transaction_header: Option<String>,
}

/// What the gateway client reports when the observation window passes quietly
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuietWindowPolicy {
    /// No challenge means the gateway is already authenticated
    #[default]
    AssumeSuccess,
    /// No challenge is reported as an error
    Error,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway add-on
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Time allowed for the WebSocket handshake, in milliseconds
    #[serde(default = "default_gateway_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Observation window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Per-read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default)]
    pub on_quiet_window: QuietWindowPolicy,

    /// How long an unanswered command stays pending, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            connect_timeout_ms: default_gateway_connect_timeout_ms(),
            window_ms: default_window_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            on_quiet_window: QuietWindowPolicy::default(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Per-read timeout, always strictly shorter than the window
    pub fn read_timeout(&self) -> Duration {
        let read = self.read_timeout_ms.max(1);
        if read >= self.window_ms {
            Duration::from_millis((self.window_ms / 2).max(1))
        } else {
            Duration::from_millis(read)
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

// Default value functions
fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:3000".to_string()
}

fn default_gateway_connect_timeout_ms() -> u64 {
    5000
}

fn default_window_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_targets() -> Vec<TargetConfig> {
    let target = |host: &str, endpoint: &str, profile: &str, generation| TargetConfig {
        host: host.to_string(),
        endpoint: endpoint.to_string(),
        profile: profile.to_string(),
        generation,
    };

    vec![
        target(
            "https://mysecurity.eufylife.com",
            "/api/v1/passport/login",
            "web",
            ProtocolGeneration::Current,
        ),
        target(
            "https://security-app-eu.eufylife.com",
            "/v1/passport/login",
            "app",
            ProtocolGeneration::Current,
        ),
        target(
            "https://security-app.eufylife.com",
            "/v1/passport/login",
            "app",
            ProtocolGeneration::Current,
        ),
        target(
            "https://security-app.eufylife.com",
            "/v1/passport/login",
            "legacy",
            ProtocolGeneration::Legacy,
        ),
    ]
}

fn default_profiles() -> BTreeMap<String, ProfileConfig> {
    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    let web = ProfileConfig {
        headers: headers(&[
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
            ("Accept", "application/json, text/plain, */*"),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Origin", "https://mysecurity.eufylife.com"),
            ("Referer", "https://mysecurity.eufylife.com/"),
            ("Sec-Fetch-Dest", "empty"),
            ("Sec-Fetch-Mode", "cors"),
            ("Sec-Fetch-Site", "same-origin"),
            ("timezone", "Europe/Dublin"),
            ("country", "IE"),
        ]),
        transaction_header: None,
    };

    let app = ProfileConfig {
        headers: headers(&[
            ("User-Agent", "okhttp/3.12.1"),
            ("App_version", "v4.6.0_1630"),
            ("Os_type", "android"),
            ("Os_version", "31"),
            ("Phone_model", "ONEPLUS A3003"),
            ("Country", "IE"),
            ("Language", "en"),
            ("Openudid", "5e4621b0152c0d00"),
            ("Net_type", "wifi"),
            ("Model_type", "PHONE"),
            ("timezone", "GMT+00:00"),
        ]),
        transaction_header: Some("X-Transaction".to_string()),
    };

    let legacy = ProfileConfig {
        headers: headers(&[
            ("User-Agent", "okhttp/3.12.1"),
            ("App_version", "v2.2.2_676"),
            ("Os_type", "android"),
            ("Language", "en"),
            ("Country", "US"),
            ("Openudid", "5e4621b0152c0d00"),
            ("Model_type", "PHONE"),
        ]),
        transaction_header: None,
    };

    let mut profiles = BTreeMap::new();
    profiles.insert("web".to_string(), web);
    profiles.insert("app".to_string(), app);
    profiles.insert("legacy".to_string(), legacy);
    profiles
}

impl Config {
    /// Load configuration from file and environment, or use defaults if no file is found
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit)?;
        Self::load_from(path.as_deref())
    }

    /// Load `path` (if any) layered with environment overrides
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let mut config: Config = builder
            .add_source(
                config::Environment::with_prefix("EUFY_LOGIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document directly
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(contents).context("Failed to parse config file")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Profile names are case-insensitive; the `config` crate lowercases map keys
    fn normalize(&mut self) {
        let profiles = std::mem::take(&mut self.cloud.profiles);
        self.cloud.profiles = profiles
            .into_iter()
            .map(|(name, profile)| (name.to_lowercase(), profile))
            .collect();

        for target in &mut self.cloud.targets {
            target.profile = target.profile.to_lowercase();
        }
    }

    /// Config file to use: the explicit path, or the first existing default location
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }

        let config_paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/eufy-login/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/eufy-login/config.toml"))
                .unwrap_or_default(),
        ];

        Ok(config_paths.into_iter().find(|p| p.is_file()))
    }

    /// Check cross-references between targets and profiles
    pub fn validate(&self) -> Result<()> {
        for target in &self.cloud.targets {
            if !self.cloud.profiles.contains_key(&target.profile) {
                bail!(
                    "Login target {}{} references unknown header profile '{}'",
                    target.host,
                    target.endpoint,
                    target.profile
                );
            }
        }

        if self.gateway.window_ms == 0 {
            bail!("gateway.window_ms must be greater than zero");
        }

        Ok(())
    }
}
