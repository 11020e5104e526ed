//! Snapshot providers.
//!
//! Each provider publishes metadata in its own shape; adapters normalize it
//! into a [`SnapshotDescriptor`]. The apply pipeline only calls into a
//! provider for the steps that genuinely differ between them: preparing the
//! target directories and moving the assets into place.

pub mod catalog;
pub mod computed;
pub mod mirrored;

use crate::codec;
use crate::config::{Config, ModeUrls, ObjectStoreConfig};
use crate::error::SnapshotError;
use crate::layout::NodeLayout;
use crate::transport::{TransferKind, Transport};
use crate::types::{Asset, AssetSource, PruningMode, SnapshotDescriptor};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub use catalog::AggregatedCatalogProvider;
pub use computed::ComputedCatalogProvider;
pub use mirrored::MirroredStateProvider;

/// What happens to existing chain data before new assets land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipePolicy {
    /// Extract over the existing tree.
    OverwriteInPlace,
    /// Empty the consensus data dir and remove the execution `chaindata`.
    WipeChainData,
}

/// Destination of an install.
#[derive(Debug, Clone, Copy)]
pub enum InstallTarget<'a> {
    /// A live node: assets are extracted into the node layout.
    Node(&'a NodeLayout),
    /// Export only: assets are saved into `dir`, extracted when `extract`.
    Export { dir: &'a Path, extract: bool },
}

/// An asset after the download step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAsset {
    pub asset: Asset,
    /// Where the downloaded bytes are.
    pub location: PathBuf,
    /// Where the archive is extracted; `None` when already in place.
    pub extract_to: Option<PathBuf>,
    /// Remove `location` once extracted.
    pub remove_after_extract: bool,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fetches current metadata for `mode`.
    async fn fetch(&self, mode: PruningMode) -> Result<SnapshotDescriptor, SnapshotError>;

    fn transfer(&self) -> TransferKind {
        TransferKind::Http
    }

    fn wipe_policy(&self) -> WipePolicy {
        WipePolicy::OverwriteInPlace
    }

    /// Bucket remote used for object assets.
    fn object_store(&self) -> Option<(&str, &ObjectStoreConfig)> {
        None
    }

    /// Directory an asset ends up in on a live node.
    fn target_dir(&self, asset: &Asset, layout: &NodeLayout) -> PathBuf {
        layout.dir_for(asset.role).to_path_buf()
    }

    /// Name an asset is saved under when exporting.
    fn export_path(&self, asset: &Asset, dir: &Path) -> PathBuf {
        dir.join(&asset.name)
    }

    /// Clears target directories according to [`Self::wipe_policy`].
    async fn prepare_targets(&self, layout: &NodeLayout) -> Result<(), SnapshotError> {
        match self.wipe_policy() {
            WipePolicy::OverwriteInPlace => Ok(()),
            WipePolicy::WipeChainData => wipe_chain_data(layout).await,
        }
    }

    /// Downloads every asset, in order, one at a time.
    async fn download_assets(
        &self,
        descriptor: &SnapshotDescriptor,
        transport: &Transport,
        target: InstallTarget<'_>,
    ) -> Result<Vec<StagedAsset>, SnapshotError> {
        let mut staged = Vec::with_capacity(descriptor.assets.len());
        for asset in &descriptor.assets {
            let item = stage_asset(self, asset, transport, target).await?;
            staged.push(item);
        }
        Ok(staged)
    }

    /// Extracts staged archives, in order, one at a time.
    async fn extract_assets(&self, staged: &[StagedAsset]) -> Result<(), SnapshotError> {
        for item in staged {
            let Some(dest) = &item.extract_to else {
                continue;
            };
            info!(
                "📂 Extracting {} snapshot into {}",
                item.asset.role,
                dest.display()
            );
            codec::extract_in_background(item.location.clone(), dest.clone()).await?;
            if item.remove_after_extract {
                tokio::fs::remove_file(&item.location)
                    .await
                    .map_err(|e| SnapshotError::fs(&item.location, e))?;
            }
        }
        Ok(())
    }
}

async fn stage_asset<P: ProviderAdapter + ?Sized>(
    provider: &P,
    asset: &Asset,
    transport: &Transport,
    target: InstallTarget<'_>,
) -> Result<StagedAsset, SnapshotError> {
    match &asset.source {
        AssetSource::Http { url } => {
            let (location, extract_to, remove_after_extract) = match target {
                InstallTarget::Node(layout) => (
                    layout.staging_dir.join(&asset.name),
                    Some(provider.target_dir(asset, layout)),
                    true,
                ),
                InstallTarget::Export { dir, extract } => (
                    provider.export_path(asset, dir),
                    extract.then(|| dir.join(asset.role.as_str())),
                    false,
                ),
            };
            info!(
                "⬇️  Downloading {} {} snapshot to {}",
                provider.name(),
                asset.role,
                location.display()
            );
            transport
                .download(provider.transfer(), url, &location)
                .await?;
            Ok(StagedAsset {
                asset: asset.clone(),
                location,
                extract_to,
                remove_after_extract,
            })
        }
        AssetSource::Object { remote } => {
            let (remote_name, store) = provider.object_store().ok_or_else(|| {
                SnapshotError::Integrity(format!(
                    "{} has object assets but no object store configured",
                    provider.name()
                ))
            })?;
            let dest = match target {
                InstallTarget::Node(layout) => provider.target_dir(asset, layout),
                InstallTarget::Export { dir, .. } => provider.export_path(asset, dir),
            };
            transport.copy_object(remote_name, store, remote, &dest).await?;
            Ok(StagedAsset {
                asset: asset.clone(),
                location: dest,
                extract_to: None,
                remove_after_extract: false,
            })
        }
    }
}

/// Empties the consensus data dir and removes the execution `chaindata`.
pub async fn wipe_chain_data(layout: &NodeLayout) -> Result<(), SnapshotError> {
    let data = &layout.consensus_data_dir;
    info!("Removing old chain data in {}", data.display());
    match tokio::fs::read_dir(data).await {
        Ok(mut entries) => {
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SnapshotError::fs(data, e))?
            {
                let path = entry.path();
                let is_dir = entry
                    .file_type()
                    .await
                    .map_err(|e| SnapshotError::fs(&path, e))?
                    .is_dir();
                let removed = if is_dir {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                removed.map_err(|e| SnapshotError::fs(&path, e))?;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} does not exist, nothing to wipe", data.display())
        }
        Err(e) => return Err(SnapshotError::fs(data, e)),
    }

    let chaindata = layout.execution_chaindata();
    info!("Removing old chain data in {}", chaindata.display());
    match tokio::fs::remove_dir_all(&chaindata).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::fs(&chaindata, e)),
    }
}

/// Last path segment of a URL, without query or fragment.
pub(crate) fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
}

/// Reads a block height that providers send either as a number or a string.
pub(crate) fn height_from_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Builds the enabled providers in display order.
pub fn build_registry(
    config: &Config,
    mirrors: ModeUrls,
    client: reqwest::Client,
) -> Vec<Arc<dyn ProviderAdapter>> {
    let providers = &config.providers;
    let mut registry: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    if providers.mirrored.enabled {
        registry.push(Arc::new(MirroredStateProvider::new(
            &providers.mirrored,
            mirrors,
            client.clone(),
        )));
    }
    if providers.catalog.enabled {
        registry.push(Arc::new(AggregatedCatalogProvider::new(
            &providers.catalog,
            client.clone(),
        )));
    }
    if providers.computed.enabled {
        registry.push(Arc::new(ComputedCatalogProvider::new(
            &providers.computed,
            client,
        )));
    }
    registry
}
