//! Aggregated-catalog provider.
//!
//! One endpoint lists every snapshot the provider keeps, pruned and archive
//! mixed. The chain data itself lives as plain directory trees in an
//! S3-compatible bucket and is copied with `rclone`.

use super::{height_from_value, ProviderAdapter};
use crate::config::{CatalogConfig, ObjectStoreConfig};
use crate::display;
use crate::error::SnapshotError;
use crate::layout::NodeLayout;
use crate::metadata::fetch_json;
use crate::transport::TransferKind;
use crate::types::{Asset, AssetRole, AssetSource, PruningMode, SnapshotDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Deserialize, Debug)]
struct CatalogResponse {
    details: Vec<CatalogEntry>,
}

#[derive(Deserialize, Debug, Clone)]
struct CatalogEntry {
    #[serde(default)]
    name: String,
    pruned: bool,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    block: serde_json::Value,
    #[serde(default)]
    snapshot_date: Option<String>,
}

impl CatalogEntry {
    fn mode(&self) -> PruningMode {
        if self.pruned {
            PruningMode::Pruned
        } else {
            PruningMode::Archive
        }
    }

    fn taken_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.snapshot_date.as_deref()?;
        let parsed = display::parse_catalog_date(raw);
        if parsed.is_none() {
            warn!("Could not parse catalog snapshot_date '{}'", raw);
        }
        parsed
    }
}

/// Bucket sub-directory holding each role's tree.
fn role_dir(role: AssetRole) -> &'static str {
    match role {
        AssetRole::Consensus => "story",
        AssetRole::Execution => "geth",
    }
}

pub struct AggregatedCatalogProvider {
    name: String,
    url: String,
    remote: String,
    bucket: String,
    prefix_template: String,
    object_store: ObjectStoreConfig,
    client: reqwest::Client,
}

impl AggregatedCatalogProvider {
    pub fn new(config: &CatalogConfig, client: reqwest::Client) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            remote: config.remote.clone(),
            bucket: config.bucket.clone(),
            prefix_template: config.prefix_template.clone(),
            object_store: config.object_store.clone(),
            client,
        }
    }

    fn prefix(&self, mode: PruningMode) -> String {
        self.prefix_template.replace("{mode}", mode.as_str())
    }

    /// Picks the entry for `mode`: freshest parsable date, else the last one.
    fn select(entries: Vec<CatalogEntry>, mode: PruningMode) -> Option<CatalogEntry> {
        let mut best: Option<(CatalogEntry, Option<DateTime<Utc>>)> = None;
        for entry in entries.into_iter().filter(|e| e.mode() == mode) {
            let taken_at = entry.taken_at();
            let replace = match (&best, taken_at) {
                (None, _) => true,
                (Some((_, Some(best_at))), Some(at)) => at > *best_at,
                (Some((_, Some(_))), None) => false,
                (Some((_, None)), _) => true,
            };
            if replace {
                best = Some((entry, taken_at));
            }
        }
        best.map(|(entry, _)| entry)
    }

    fn describe(&self, entry: CatalogEntry, mode: PruningMode, now: DateTime<Utc>) -> SnapshotDescriptor {
        debug!("{} catalog entry '{}' selected for {}", self.name, entry.name, mode);
        let prefix = self.prefix(mode);
        let assets = [AssetRole::Consensus, AssetRole::Execution]
            .into_iter()
            .map(|role| Asset {
                role,
                name: role_dir(role).to_string(),
                source: AssetSource::Object {
                    remote: format!(
                        "{}:{}/{}/{}",
                        self.remote,
                        self.bucket,
                        prefix,
                        role_dir(role)
                    ),
                },
                size: None,
            })
            .collect();
        let taken_at = entry.taken_at();

        SnapshotDescriptor {
            provider: self.name.clone(),
            mode,
            assets,
            block_height: height_from_value(&entry.block),
            taken_at,
            // the catalog reports one size for the whole snapshot
            total_size: display::sum_sizes(entry.size.as_deref()),
            age: display::age_or_na(taken_at, now),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AggregatedCatalogProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, mode: PruningMode) -> Result<SnapshotDescriptor, SnapshotError> {
        let response: CatalogResponse = fetch_json(&self.client, &self.url).await?;
        let entry = Self::select(response.details, mode).ok_or_else(|| {
            SnapshotError::Schema(format!("{} lists no {} snapshot", self.name, mode))
        })?;
        Ok(self.describe(entry, mode, Utc::now()))
    }

    fn transfer(&self) -> TransferKind {
        TransferKind::Object
    }

    fn object_store(&self) -> Option<(&str, &ObjectStoreConfig)> {
        Some((&self.remote, &self.object_store))
    }

    /// The bucket holds `story/` and `geth/` trees rooted like the node home.
    fn target_dir(&self, asset: &Asset, layout: &NodeLayout) -> PathBuf {
        match asset.role {
            AssetRole::Consensus => layout.consensus_dir.clone(),
            AssetRole::Execution => layout.execution_root.clone(),
        }
    }

    fn export_path(&self, asset: &Asset, dir: &Path) -> PathBuf {
        let prefix = match &asset.source {
            AssetSource::Object { remote } => remote
                .rsplit('/')
                .nth(1)
                .unwrap_or_default()
                .to_string(),
            AssetSource::Http { .. } => String::new(),
        };
        dir.join(prefix).join(&asset.name)
    }
}
