//! Profile store
//!
//! Profiles live as JSON files in a config directory (default `~/.didimo`):
//! one `<name>.json` per profile holding host and credentials, plus
//! `cli.json` recording which profile is the default.

use crate::config::{Config, OutputDisplay, validate_host};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CLI_FILE: &str = "cli.json";

/// On-disk profile contents
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ProfileFile {
    host: String,
    access_key: String,
    secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_display_type: Option<OutputDisplay>,
}

/// `cli.json` contents
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CliFile {
    default: String,
}

/// One entry of [`ProfileStore::list`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
    /// Profile name
    pub name: String,
    /// Whether this is the default profile
    pub is_default: bool,
}

/// Reads and writes named profiles
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `$HOME/.didimo` (`%USERPROFILE%` on Windows)
    pub fn open_default() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .ok_or_else(|| Error::Config {
                message: "cannot locate home directory".to_string(),
                key: None,
            })?;
        Ok(Self::new(PathBuf::from(home).join(".didimo")))
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Write a profile and make it the default.
    ///
    /// Refuses to replace an existing profile unless `overwrite` is set.
    pub fn init(
        &self,
        name: &str,
        host: &str,
        access_key: &str,
        secret_key: &str,
        overwrite: bool,
    ) -> Result<PathBuf> {
        if name.is_empty() || name == "cli" {
            return Err(Error::Config {
                message: format!("'{}' is not a valid profile name", name),
                key: Some("profile".to_string()),
            });
        }
        validate_host(host)?;

        std::fs::create_dir_all(&self.root)?;
        let path = self.profile_path(name);
        if path.exists() && !overwrite {
            return Err(Error::Config {
                message: format!("a profile named '{}' already exists", name),
                key: Some("profile".to_string()),
            });
        }

        let profile = ProfileFile {
            host: host.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            output_display_type: None,
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&profile)?)?;
        info!(profile = name, path = ?path, "wrote profile");

        self.write_default(name)?;
        Ok(path)
    }

    /// Name of the default profile
    pub fn default_profile(&self) -> Result<String> {
        let path = self.root.join(CLI_FILE);
        let content = std::fs::read(&path).map_err(|e| Error::Config {
            message: format!(
                "CLI configuration file not found at {} ({}). Run `didimo init`",
                path.display(),
                e
            ),
            key: None,
        })?;
        let cli: CliFile = serde_json::from_slice(&content)?;
        Ok(cli.default)
    }

    /// Load profile `name` into a [`Config`] with default download and polling settings
    pub fn load(&self, name: &str) -> Result<Config> {
        let path = self.profile_path(name);
        if !path.exists() {
            return Err(Error::Config {
                message: format!("no configuration file for \"{}\"", name),
                key: Some("profile".to_string()),
            });
        }

        let profile: ProfileFile = serde_json::from_slice(&std::fs::read(&path)?)?;
        if profile.access_key.is_empty() || profile.secret_key.is_empty() {
            return Err(Error::Config {
                message: format!("no access key or secret key for \"{}\" configuration", name),
                key: Some("access_key".to_string()),
            });
        }
        if profile.host.is_empty() {
            return Err(Error::Config {
                message: format!("no API host for \"{}\" configuration", name),
                key: Some("api_host".to_string()),
            });
        }

        debug!(profile = name, host = %profile.host, "loaded profile");
        Ok(Config {
            api_host: profile.host,
            access_key: profile.access_key,
            secret_key: profile.secret_key,
            output_display: profile.output_display_type.unwrap_or_default(),
            ..Default::default()
        })
    }

    /// Load the default profile
    pub fn load_default(&self) -> Result<Config> {
        let name = self.default_profile()?;
        self.load(&name)
    }

    /// All profiles, sorted by name
    pub fn list(&self) -> Result<Vec<ProfileEntry>> {
        let default = self.default_profile().ok();
        let mut entries = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name == "cli" {
                continue;
            }
            entries.push(ProfileEntry {
                name: name.to_string(),
                is_default: default.as_deref() == Some(name),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Make an existing profile the default
    pub fn set_default(&self, name: &str) -> Result<()> {
        if !self.profile_path(name).exists() {
            return Err(Error::Config {
                message: format!("no configuration file for \"{}\"", name),
                key: Some("profile".to_string()),
            });
        }
        self.write_default(name)
    }

    fn write_default(&self, name: &str) -> Result<()> {
        let cli = CliFile {
            default: name.to_string(),
        };
        std::fs::write(self.root.join(CLI_FILE), serde_json::to_vec_pretty(&cli)?)?;
        info!(profile = name, "set default profile");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_then_load_default_round_trips_credentials() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());

        store
            .init("production", "https://api.didimo.co", "ak", "sk", false)
            .unwrap();
        let config = store.load_default().unwrap();

        assert_eq!(config.api_host, "https://api.didimo.co");
        assert_eq!(config.access_key, "ak");
        assert_eq!(config.secret_key, "sk");
        assert_eq!(config.download.max_concurrent_downloads, 5);
    }

    #[test]
    fn init_refuses_to_overwrite_without_flag() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        store.init("dev", "https://a.example", "k1", "s1", false).unwrap();

        assert!(matches!(
            store.init("dev", "https://b.example", "k2", "s2", false),
            Err(Error::Config { .. })
        ));

        store.init("dev", "https://b.example", "k2", "s2", true).unwrap();
        assert_eq!(store.load("dev").unwrap().api_host, "https://b.example");
    }

    #[test]
    fn init_rejects_invalid_host() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.init("dev", "api.didimo.co", "k", "s", false).is_err());
    }

    #[test]
    fn list_marks_default_and_hides_cli_file() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        store.init("staging", "https://s.example", "k", "s", false).unwrap();
        store.init("alpha", "https://a.example", "k", "s", false).unwrap();
        store.set_default("staging").unwrap();

        let entries = store.list().unwrap();
        assert_eq!(
            entries,
            vec![
                ProfileEntry {
                    name: "alpha".into(),
                    is_default: false
                },
                ProfileEntry {
                    name: "staging".into(),
                    is_default: true
                },
            ]
        );
    }

    #[test]
    fn load_rejects_missing_secret() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("broken.json"),
            r#"{"host": "https://a.example", "access_key": "k", "secret_key": ""}"#,
        )
        .unwrap();

        let store = ProfileStore::new(dir.path());
        assert!(matches!(
            store.load("broken"),
            Err(Error::Config { key: Some(ref k), .. }) if k == "access_key"
        ));
    }

    #[test]
    fn missing_cli_file_points_at_init() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        match store.default_profile() {
            Err(Error::Config { message, .. }) => assert!(message.contains("didimo init")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn set_default_requires_existing_profile() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.set_default("ghost").is_err());
    }
}
