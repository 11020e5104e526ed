//! Mirrored-state provider.
//!
//! Several independent mirrors serve the same `.current_state.json` document.
//! All mirrors are asked, the freshest answer wins, and the archives are
//! fetched from the same mirror that produced it.

use super::{height_from_value, ProviderAdapter};
use crate::config::{MirroredConfig, ModeUrls};
use crate::display;
use crate::error::SnapshotError;
use crate::metadata::fetch_json;
use crate::transport::TransferKind;
use crate::types::{Asset, AssetRole, AssetSource, PruningMode, SnapshotDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct MirrorState {
    #[serde(default)]
    snapshot_name: String,
    #[serde(default)]
    snapshot_geth_name: String,
    #[serde(default)]
    snapshot_height: serde_json::Value,
    #[serde(default)]
    snapshot_size: Option<String>,
    #[serde(default)]
    geth_snapshot_size: Option<String>,
    #[serde(default)]
    snapshot_block_time: String,
}

/// A mirror's answer that passed validation.
#[derive(Debug, Clone)]
struct MirrorAnswer {
    url: String,
    state: MirrorState,
    block_time: DateTime<Utc>,
}

pub struct MirroredStateProvider {
    name: String,
    mirrors: ModeUrls,
    client: reqwest::Client,
    transfer: TransferKind,
}

impl MirroredStateProvider {
    pub fn new(config: &MirroredConfig, mirrors: ModeUrls, client: reqwest::Client) -> Self {
        Self {
            name: config.name.clone(),
            mirrors,
            client,
            transfer: config.transfer,
        }
    }

    async fn query_mirror(&self, url: &str) -> Result<MirrorAnswer, SnapshotError> {
        let state: MirrorState = fetch_json(&self.client, url).await?;
        if state.snapshot_name.is_empty() || state.snapshot_geth_name.is_empty() {
            return Err(SnapshotError::Schema(format!(
                "{} does not name both snapshot archives",
                url
            )));
        }
        let block_time = display::parse_iso_timestamp(&state.snapshot_block_time).ok_or_else(|| {
            SnapshotError::Schema(format!(
                "could not parse snapshot_block_time '{}' from {}",
                state.snapshot_block_time, url
            ))
        })?;
        Ok(MirrorAnswer {
            url: url.to_string(),
            state,
            block_time,
        })
    }

    /// Queries every mirror for `mode` and keeps the freshest valid answer.
    ///
    /// Earlier mirrors win ties.
    async fn freshest(&self, mode: PruningMode) -> Result<MirrorAnswer, SnapshotError> {
        let urls = self.mirrors.for_mode(mode);
        if urls.is_empty() {
            return Err(SnapshotError::Network(format!(
                "no {} mirrors known for {}",
                mode, self.name
            )));
        }

        let answers = join_all(urls.iter().map(|url| self.query_mirror(url))).await;

        let mut best: Option<MirrorAnswer> = None;
        for (url, answer) in urls.iter().zip(answers) {
            match answer {
                Ok(answer) => {
                    debug!("{} reports block time {}", url, answer.block_time);
                    if best
                        .as_ref()
                        .map_or(true, |b| answer.block_time > b.block_time)
                    {
                        best = Some(answer);
                    }
                }
                Err(e) => warn!("Could not use mirror {}: {}", url, e),
            }
        }

        best.ok_or_else(|| {
            SnapshotError::Network(format!(
                "all {} {} mirrors of {} failed",
                urls.len(),
                mode,
                self.name
            ))
        })
    }
}

/// Directory of the state document, where the archives live.
fn mirror_base(url: &str) -> &str {
    url.rsplit_once('/').map(|(base, _)| base).unwrap_or(url)
}

fn describe(
    provider: &str,
    mode: PruningMode,
    answer: MirrorAnswer,
    now: DateTime<Utc>,
) -> SnapshotDescriptor {
    let base = mirror_base(&answer.url);
    let state = answer.state;
    let total_size = display::sum_sizes([
        state.snapshot_size.as_deref().unwrap_or_default(),
        state.geth_snapshot_size.as_deref().unwrap_or_default(),
    ]);
    let assets = vec![
        Asset {
            role: AssetRole::Consensus,
            source: AssetSource::Http {
                url: format!("{}/{}", base, state.snapshot_name),
            },
            name: state.snapshot_name,
            size: state.snapshot_size,
        },
        Asset {
            role: AssetRole::Execution,
            source: AssetSource::Http {
                url: format!("{}/{}", base, state.snapshot_geth_name),
            },
            name: state.snapshot_geth_name,
            size: state.geth_snapshot_size,
        },
    ];

    SnapshotDescriptor {
        provider: provider.to_string(),
        mode,
        assets,
        block_height: height_from_value(&state.snapshot_height),
        taken_at: Some(answer.block_time),
        total_size,
        age: display::format_age(answer.block_time, now),
    }
}

#[async_trait]
impl ProviderAdapter for MirroredStateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, mode: PruningMode) -> Result<SnapshotDescriptor, SnapshotError> {
        let answer = self.freshest(mode).await?;
        Ok(describe(&self.name, mode, answer, Utc::now()))
    }

    fn transfer(&self) -> TransferKind {
        self.transfer
    }
}
