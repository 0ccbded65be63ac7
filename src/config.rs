//! Configuration types for didimo-cli
//!
//! A [`Config`] value is built once (usually from a profile, see
//! [`crate::profile`]) and handed to every client and orchestrator
//! constructor. Nothing reads configuration from ambient state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Default API host used by `didimo init`
pub const DEFAULT_API_HOST: &str = "https://api.didimo.co";

/// How results are rendered by the command-line front end
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDisplay {
    /// One summary line per error plus a final tally
    #[default]
    Human,
    /// The full report as JSON on stdout
    Json,
}

impl OutputDisplay {
    /// Resolve the effective display mode, letting a per-command flag win
    /// over the profile setting.
    pub fn resolve(self, override_with: Option<OutputDisplay>) -> OutputDisplay {
        override_with.unwrap_or(self)
    }

    /// Whether JSON output is selected
    pub fn is_json(self) -> bool {
        self == OutputDisplay::Json
    }
}

/// Download behavior (output locations and worker concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory receiving `<job id>_<format>.zip` packages (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Scratch directory archives are extracted into (default: "./temp")
    ///
    /// Cleared completely before every extraction.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Maximum concurrent background downloads in batch mode (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            scratch_dir: default_scratch_dir(),
            max_concurrent_downloads: default_max_concurrent(),
        }
    }
}

/// Status polling behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between status checks for avatar jobs (default: 2 seconds)
    #[serde(default = "default_job_interval", with = "duration_serde")]
    pub job_interval: Duration,

    /// Interval between status checks for deformation assets (default: 10 seconds)
    #[serde(default = "default_asset_interval", with = "duration_serde")]
    pub asset_interval: Duration,

    /// Give up on a single job after this long (None = wait indefinitely)
    #[serde(default, with = "optional_duration_serde")]
    pub job_timeout: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            job_interval: default_job_interval(),
            asset_interval: default_asset_interval(),
            job_timeout: None,
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (None = no timeout)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// API host with protocol, e.g. `https://api.didimo.co`
    pub api_host: String,

    /// Access key sent in the `DIDIMO-API-KEY` header
    pub access_key: String,

    /// Secret key (stored with the profile, not sent by the current auth scheme)
    #[serde(default)]
    pub secret_key: String,

    /// Default output display mode
    #[serde(default)]
    pub output_display: OutputDisplay,

    /// Download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Polling settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            output_display: OutputDisplay::default(),
            download: DownloadConfig::default(),
            polling: PollingConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Create a configuration for a host and access key with all other settings defaulted
    pub fn new(api_host: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            api_host: api_host.into(),
            access_key: access_key.into(),
            ..Default::default()
        }
    }

    /// Check that the configuration can drive network calls
    pub fn validate(&self) -> Result<()> {
        validate_host(&self.api_host)?;

        if self.access_key.trim().is_empty() {
            return Err(Error::Config {
                message: "no access key configured".to_string(),
                key: Some("access_key".to_string()),
            });
        }

        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }

        Ok(())
    }

    /// Join an API path onto the configured host
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Validate an API host: http(s) scheme and a non-empty host
pub fn validate_host(host: &str) -> Result<()> {
    let parsed = url::Url::parse(host).map_err(|e| Error::Config {
        message: format!("invalid API host '{}': {}", host, e),
        key: Some("api_host".to_string()),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config {
            message: format!("invalid URL scheme '{}'", parsed.scheme()),
            key: Some("api_host".to_string()),
        });
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::Config {
            message: "host is empty".to_string(),
            key: Some("api_host".to_string()),
        });
    }

    Ok(())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_job_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_asset_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!(
        "didimo-cli/{} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
