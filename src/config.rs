//! Layered configuration.
//!
//! Values are resolved in order (later wins):
//! 1. built-in defaults
//! 2. `~/.config/storysnap/config.toml`
//! 3. the file given with `--config`
//! 4. environment variables (`STORYSNAP_HOME`, `STORYSNAP_DISCOVERY_URL`)
//!
//! # Example Config
//!
//! ```toml
//! [http]
//! request_timeout = "20s"
//! download_retries = 3
//!
//! [node]
//! home = "/srv/validator"
//! network = "odyssey"
//! services = ["story", "story-geth"]
//!
//! [providers.mirrored]
//! discovery_url = "https://snapshot-external-providers-api.krews.xyz/snapshots/itrocket"
//!
//! [providers.computed]
//! transfer = "http"
//! ```

use crate::error::SnapshotError;
use crate::transport::TransferKind;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_HOME: &str = "STORYSNAP_HOME";
pub const ENV_DISCOVERY_URL: &str = "STORYSNAP_DISCOVERY_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: HttpConfig,
    pub node: NodeConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
}

/// Timeouts and retry policy for every network call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Whole-request timeout for metadata and discovery calls.
    #[serde(deserialize_with = "duration_str")]
    pub request_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub connect_timeout: Duration,
    /// Longest gap between two body chunks of a download.
    #[serde(deserialize_with = "duration_str")]
    pub idle_timeout: Duration,
    /// Extra attempts for a failed single-stream download.
    pub download_retries: usize,
    #[serde(deserialize_with = "duration_str")]
    pub retry_interval: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            download_retries: 2,
            retry_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Directory holding `.story`; defaults to the user's home.
    pub home: Option<PathBuf>,
    /// Execution network directory name under `.story/geth`.
    pub network: String,
    /// Services stopped before and restarted after applying a snapshot.
    pub services: Vec<String>,
    /// Run `systemctl` through `sudo`.
    pub use_sudo: bool,
    pub paths: PathOverrides,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            home: None,
            network: "odyssey".to_string(),
            services: vec!["story".to_string(), "story-geth".to_string()],
            use_sudo: true,
            paths: PathOverrides::default(),
        }
    }
}

/// Explicit overrides for individual node paths.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathOverrides {
    pub node_home: Option<PathBuf>,
    pub consensus_dir: Option<PathBuf>,
    pub consensus_data_dir: Option<PathBuf>,
    pub signing_state: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub execution_root: Option<PathBuf>,
    pub execution_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersConfig {
    pub mirrored: MirroredConfig,
    pub catalog: CatalogConfig,
    pub computed: ComputedConfig,
}

/// Per-mode list of locators.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ModeUrls {
    pub pruned: Vec<String>,
    pub archive: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirroredConfig {
    pub enabled: bool,
    pub name: String,
    /// Endpoint listing the current mirror hosts per mode.
    pub discovery_url: Option<String>,
    /// Mirror URL built from each discovered host; `{host}` is substituted.
    pub mirror_url_template: String,
    /// Used when discovery is disabled or fails.
    pub fallback: ModeUrls,
    pub transfer: TransferKind,
}

impl Default for MirroredConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "Itrocket".to_string(),
            discovery_url: Some(
                "https://snapshot-external-providers-api.krews.xyz/snapshots/itrocket".to_string(),
            ),
            mirror_url_template: "https://{host}/testnet/story/.current_state.json".to_string(),
            fallback: ModeUrls {
                pruned: vec![
                    "https://server-1.itrocket.net/testnet/story/.current_state.json".to_string(),
                    "https://server-3.itrocket.net/testnet/story/.current_state.json".to_string(),
                ],
                archive: vec![
                    "https://server-5.itrocket.net/testnet/story/.current_state.json".to_string(),
                    "https://server-8.itrocket.net/testnet/story/.current_state.json".to_string(),
                ],
            },
            transfer: TransferKind::Http,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub enabled: bool,
    pub name: String,
    pub url: String,
    /// rclone remote name written into the generated client config.
    pub remote: String,
    pub bucket: String,
    /// Object prefix per snapshot; `{mode}` is substituted.
    pub prefix_template: String,
    pub object_store: ObjectStoreConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "Krews".to_string(),
            url: "https://snapshots-api.krews.xyz/api/snapshots/story".to_string(),
            remote: "krews-snapshot".to_string(),
            bucket: "krews-1-eu".to_string(),
            prefix_template: "story_testnet_{mode}_snapshot".to_string(),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

/// S3-compatible endpoint written into the bulk-copy client config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectStoreConfig {
    pub provider: String,
    pub region: String,
    pub endpoint: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            provider: "DigitalOcean".to_string(),
            region: "fra1".to_string(),
            endpoint: "https://fra1.cdn.digitaloceanspaces.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputedConfig {
    pub enabled: bool,
    pub name: String,
    pub url: String,
    pub transfer: TransferKind,
}

impl Default for ComputedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "Jnode".to_string(),
            url: "https://snapshot-external-providers-api.krews.xyz/snapshots/jnode".to_string(),
            transfer: TransferKind::Segmented,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub aria2: ToolConfig,
    pub rclone: ToolConfig,
    /// Connections per download for the segmented downloader.
    pub segments: u32,
    /// Parallel transfers and checkers for the bulk copy.
    pub transfers: u32,
    /// Where generated tool configs live; defaults to `~/.config/storysnap`.
    pub config_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            aria2: ToolConfig {
                program: "aria2c".to_string(),
                install: ["sudo", "apt-get", "install", "aria2", "-y"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            rclone: ToolConfig {
                program: "rclone".to_string(),
                install: vec![
                    "bash".to_string(),
                    "-c".to_string(),
                    "sudo -v; curl https://rclone.org/install.sh | sudo bash".to_string(),
                ],
            },
            segments: 16,
            transfers: 6,
            config_dir: None,
        }
    }
}

/// An external program and the command that installs it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub program: String,
    pub install: Vec<String>,
}

impl Config {
    /// Loads defaults, then the user file, then `cli_path`, then the environment.
    pub fn load(cli_path: Option<&Path>) -> Result<Self, SnapshotError> {
        let mut merged = toml::Table::new();

        if let Some(user) = user_config_path().filter(|p| p.exists()) {
            merge_tables(&mut merged, read_table(&user)?);
            info!("Loaded config from {}", user.display());
        }
        if let Some(path) = cli_path {
            merge_tables(&mut merged, read_table(path)?);
            info!("Loaded config from {}", path.display());
        }

        let mut config: Config = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| SnapshotError::Config(e.to_string()))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SnapshotError> {
        toml::from_str(contents).map_err(|e| SnapshotError::Config(e.to_string()))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(home) = lookup(ENV_HOME).filter(|v| !v.is_empty()) {
            debug!("{} overrides node home", ENV_HOME);
            self.node.home = Some(PathBuf::from(home));
        }
        if let Some(url) = lookup(ENV_DISCOVERY_URL) {
            debug!("{} overrides discovery url", ENV_DISCOVERY_URL);
            self.providers.mirrored.discovery_url = if url.is_empty() { None } else { Some(url) };
        }
    }

    /// Directory for generated tool configuration.
    pub fn tool_config_dir(&self) -> PathBuf {
        self.tools
            .config_dir
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join("storysnap")))
            .unwrap_or_else(|| PathBuf::from(".storysnap"))
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("storysnap").join("config.toml"))
}

fn read_table(path: &Path) -> Result<toml::Table, SnapshotError> {
    let contents = std::fs::read_to_string(path).map_err(|e| SnapshotError::fs(path, e))?;
    contents
        .parse::<toml::Table>()
        .map_err(|e| SnapshotError::Config(format!("{}: {}", path.display(), e)))
}

/// Deep-merges `overlay` into `base`; overlay scalars and arrays replace.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_known_providers() {
        let config = Config::default();
        assert_eq!(config.providers.mirrored.name, "Itrocket");
        assert_eq!(config.providers.catalog.name, "Krews");
        assert_eq!(config.providers.computed.name, "Jnode");
        assert_eq!(config.providers.computed.transfer, TransferKind::Segmented);
        assert_eq!(config.node.services, vec!["story", "story-geth"]);
        assert_eq!(config.providers.mirrored.fallback.archive.len(), 2);
    }

    #[test]
    fn parses_partial_file_with_durations() {
        let config = Config::from_toml_str(
            r#"
            [http]
            request_timeout = "5s"
            idle_timeout = "2m"

            [node]
            network = "iliad"

            [providers.computed]
            transfer = "http"
            "#,
        )
        .unwrap();
        assert_eq!(config.http.request_timeout, Duration::from_secs(5));
        assert_eq!(config.http.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.http.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.node.network, "iliad");
        assert_eq!(config.providers.computed.transfer, TransferKind::Http);
        assert_eq!(config.providers.computed.name, "Jnode");
    }

    #[test]
    fn rejects_bad_duration_and_unknown_keys() {
        assert!(Config::from_toml_str("[http]\nrequest_timeout = \"soon\"").is_err());
        assert!(Config::from_toml_str("[node]\nhomedir = \"/x\"").is_err());
    }

    #[test]
    fn later_files_win_but_keep_siblings() {
        let mut base: toml::Table = "[node]\nnetwork = \"iliad\"\nuse_sudo = false".parse().unwrap();
        let overlay: toml::Table = "[node]\nnetwork = \"odyssey\"".parse().unwrap();
        merge_tables(&mut base, overlay);
        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.node.network, "odyssey");
        assert!(!config.node.use_sudo);
    }

    #[test]
    fn environment_overrides_home_and_discovery() {
        let env: HashMap<&str, &str> =
            [(ENV_HOME, "/srv/node"), (ENV_DISCOVERY_URL, "")].into_iter().collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.node.home, Some(PathBuf::from("/srv/node")));
        assert_eq!(config.providers.mirrored.discovery_url, None);
    }
}
