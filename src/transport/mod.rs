//! Asset transfer strategies.
//!
//! * [`http`]: single-stream download with a progress bar
//! * [`segmented`]: multi-connection download through `aria2c`
//! * [`object`]: bulk copy from an S3-compatible bucket through `rclone`
//!
//! Partial files are never resumed; a retry starts from scratch.

pub mod http;
pub mod object;
pub mod segmented;
pub mod tools;

use crate::config::{Config, HttpConfig, ObjectStoreConfig, ToolsConfig};
use crate::error::SnapshotError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a provider's assets are moved onto local disk.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Http,
    Segmented,
    Object,
}

/// Shared transfer machinery handed to providers during install.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    http: HttpConfig,
    tools: ToolsConfig,
    tool_config_dir: PathBuf,
}

impl Transport {
    pub fn new(config: &Config) -> Result<Self, SnapshotError> {
        Self::from_parts(
            config.http.clone(),
            config.tools.clone(),
            config.tool_config_dir(),
        )
    }

    pub fn from_parts(
        http: HttpConfig,
        tools: ToolsConfig,
        tool_config_dir: PathBuf,
    ) -> Result<Self, SnapshotError> {
        Ok(Self {
            client: http::download_client(&http)?,
            http,
            tools,
            tool_config_dir,
        })
    }

    /// Downloads one archive to `dest` with the requested strategy.
    pub async fn download(
        &self,
        kind: TransferKind,
        url: &str,
        dest: &Path,
    ) -> Result<(), SnapshotError> {
        match kind {
            TransferKind::Http => {
                http::download_with_retry(&self.client, url, dest, &self.http).await?;
                Ok(())
            }
            TransferKind::Segmented => {
                segmented::download(&self.tools, &self.http, url, dest).await
            }
            TransferKind::Object => Err(SnapshotError::Integrity(format!(
                "{} is an HTTP asset but the provider is configured for object copy",
                url
            ))),
        }
    }

    /// Copies an object-storage prefix into `dest_dir`.
    pub async fn copy_object(
        &self,
        remote_name: &str,
        store: &ObjectStoreConfig,
        source: &str,
        dest_dir: &Path,
    ) -> Result<(), SnapshotError> {
        object::copy(
            &self.tools,
            &self.http,
            &self.tool_config_dir,
            remote_name,
            store,
            source,
            dest_dir,
        )
        .await
    }
}
