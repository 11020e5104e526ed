//! Computed-catalog provider.
//!
//! The endpoint answers with one object per mode, each listing the archive
//! files with their size in gigabytes and an absolute download URL. This
//! provider expects the old chain data to be removed before extraction.

use super::{file_name_from_url, height_from_value, ProviderAdapter, WipePolicy};
use crate::config::ComputedConfig;
use crate::display;
use crate::error::SnapshotError;
use crate::metadata::fetch_json;
use crate::transport::TransferKind;
use crate::types::{Asset, AssetRole, AssetSource, PruningMode, SnapshotDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Deserialize, Debug, Default)]
struct ComputedResponse {
    #[serde(default)]
    pruned: Option<ComputedMode>,
    #[serde(default)]
    archive: Option<ComputedMode>,
}

#[derive(Deserialize, Debug, Clone)]
struct ComputedMode {
    #[serde(default)]
    files: BTreeMap<String, ComputedFile>,
    #[serde(default)]
    snapshot_height: serde_json::Value,
    #[serde(default)]
    snapshot_time: Option<String>,
    #[serde(default)]
    time_ago: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
struct ComputedFile {
    size_gb: f64,
    url: String,
}

/// File keys in the response, in install order.
const FILE_KEYS: [(&str, AssetRole); 2] = [
    ("story", AssetRole::Consensus),
    ("geth", AssetRole::Execution),
];

pub struct ComputedCatalogProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    transfer: TransferKind,
}

impl ComputedCatalogProvider {
    pub fn new(config: &ComputedConfig, client: reqwest::Client) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
            transfer: config.transfer,
        }
    }

    fn describe(
        &self,
        entry: ComputedMode,
        mode: PruningMode,
        now: DateTime<Utc>,
    ) -> Result<SnapshotDescriptor, SnapshotError> {
        let mut assets = Vec::with_capacity(FILE_KEYS.len());
        let mut total_gb = 0.0;
        for (key, role) in FILE_KEYS {
            let file = entry.files.get(key).ok_or_else(|| {
                SnapshotError::Schema(format!("{} {} snapshot has no '{}' file", self.name, mode, key))
            })?;
            if file.url.trim().is_empty() {
                return Err(SnapshotError::Schema(format!(
                    "{} {} '{}' file has no url",
                    self.name, mode, key
                )));
            }
            total_gb += file.size_gb;
            assets.push(Asset {
                role,
                name: file_name_from_url(&file.url)
                    .unwrap_or_else(|| format!("{}.tar.lz4", role.as_str())),
                source: AssetSource::Http {
                    url: file.url.clone(),
                },
                size: Some(display::format_gb(file.size_gb)),
            });
        }

        let taken_at = entry
            .snapshot_time
            .as_deref()
            .and_then(display::parse_iso_timestamp);
        let age = match (taken_at, entry.time_ago) {
            (Some(t), _) => display::format_age(t, now),
            (None, Some(ago)) if !ago.trim().is_empty() => ago,
            _ => display::NOT_AVAILABLE.to_string(),
        };

        Ok(SnapshotDescriptor {
            provider: self.name.clone(),
            mode,
            assets,
            block_height: height_from_value(&entry.snapshot_height),
            taken_at,
            total_size: display::format_gb(total_gb),
            age,
        })
    }
}

#[async_trait]
impl ProviderAdapter for ComputedCatalogProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, mode: PruningMode) -> Result<SnapshotDescriptor, SnapshotError> {
        let response: ComputedResponse = fetch_json(&self.client, &self.url).await?;
        let entry = match mode {
            PruningMode::Pruned => response.pruned,
            PruningMode::Archive => response.archive,
        }
        .ok_or_else(|| SnapshotError::Schema(format!("{} has no {} snapshot", self.name, mode)))?;
        self.describe(entry, mode, Utc::now())
    }

    fn transfer(&self) -> TransferKind {
        self.transfer
    }

    fn wipe_policy(&self) -> WipePolicy {
        WipePolicy::WipeChainData
    }
}
