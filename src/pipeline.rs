//! Snapshot apply pipeline.
//!
//! A [`Session`] walks through the stages below. The bracketed stages only
//! run when installing into a live node; an export skips them and never
//! touches services or the validator signing state.
//!
//! ```text
//! Idle → ModeSelected → ProviderSelected → [ServicesStopped → StateBackedUp]
//!      → AssetsDownloaded → AssetsExtracted → [StateRestored → ServicesRestarted] → Done
//! ```
//!
//! Once the signing state is backed up, any failure restores it before the
//! pipeline halts, and services are never restarted after a failure.

use crate::error::{PipelineError, SnapshotError};
use crate::layout::NodeLayout;
use crate::lock::NodeLock;
use crate::providers::{InstallTarget, ProviderAdapter};
use crate::resolver::{candidates, Resolver};
use crate::services::{existing_services, ServiceManager};
use crate::transport::Transport;
use crate::types::{ProviderListing, PruningMode, SnapshotDescriptor};
use std::fmt;
use std::fs::Permissions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ModeSelected,
    ProviderSelected,
    ServicesStopped,
    StateBackedUp,
    AssetsDownloaded,
    AssetsExtracted,
    StateRestored,
    ServicesRestarted,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::ModeSelected => "mode selected",
            Stage::ProviderSelected => "provider selected",
            Stage::ServicesStopped => "services stopped",
            Stage::StateBackedUp => "validator state backed up",
            Stage::AssetsDownloaded => "assets downloaded",
            Stage::AssetsExtracted => "assets extracted",
            Stage::StateRestored => "validator state restored",
            Stage::ServicesRestarted => "services restarted",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Where the selected snapshot goes.
#[derive(Debug, Clone)]
pub enum ApplyTarget {
    /// Replace the chain data of a live node.
    Node {
        layout: NodeLayout,
        services: Vec<String>,
    },
    /// Only save the assets into `dir`; nothing else is touched.
    Export { dir: PathBuf, extract: bool },
}

/// One run of the pipeline: the operator's choices plus the stages entered.
pub struct Session {
    mode: Option<PruningMode>,
    provider: Option<Arc<dyn ProviderAdapter>>,
    descriptor: Option<SnapshotDescriptor>,
    history: Vec<Stage>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            mode: None,
            provider: None,
            descriptor: None,
            history: vec![Stage::Idle],
        }
    }

    pub fn mode(&self) -> Option<PruningMode> {
        self.mode
    }

    pub fn descriptor(&self) -> Option<&SnapshotDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Idle)
    }

    /// Every stage entered so far, in order.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    fn enter(&mut self, stage: Stage) {
        info!("➡️  {}", stage);
        self.history.push(stage);
    }

    pub fn select_mode(&mut self, mode: PruningMode) {
        self.mode = Some(mode);
        self.enter(Stage::ModeSelected);
    }

    /// Picks `name` out of the resolver's listing for the session's mode.
    ///
    /// Fails when no provider has a snapshot for the mode, or when `name` is
    /// not one of those that do.
    pub fn select_provider(
        &mut self,
        resolver: &Resolver,
        listing: &[ProviderListing],
        name: &str,
    ) -> Result<(), SnapshotError> {
        let mode = self
            .mode
            .ok_or_else(|| SnapshotError::Integrity("no pruning mode selected".into()))?;
        let usable: Vec<&ProviderListing> = candidates(listing)
            .into_iter()
            .filter(|l| l.mode == mode)
            .collect();
        if usable.is_empty() {
            return Err(SnapshotError::Integrity(format!(
                "no {} snapshot is available from any provider",
                mode
            )));
        }

        let row = usable
            .iter()
            .find(|l| l.provider.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = usable.iter().map(|l| l.provider.as_str()).collect();
                SnapshotError::Integrity(format!(
                    "provider '{}' has no {} snapshot; available: {}",
                    name,
                    mode,
                    names.join(", ")
                ))
            })?;
        let (Some(adapter), Some(descriptor)) = (resolver.adapter(&row.provider), &row.descriptor)
        else {
            return Err(SnapshotError::Integrity(format!(
                "provider '{}' is not registered",
                row.provider
            )));
        };
        if descriptor.assets.is_empty() {
            return Err(SnapshotError::Integrity(format!(
                "{} {} snapshot lists no assets",
                row.provider, mode
            )));
        }

        info!(
            "Selected {} {} snapshot {}",
            row.provider,
            mode,
            row.summary()
        );
        self.provider = Some(adapter);
        self.descriptor = Some(descriptor.clone());
        self.enter(Stage::ProviderSelected);
        Ok(())
    }

    /// Runs the remaining stages against `target`.
    pub async fn apply(
        &mut self,
        target: &ApplyTarget,
        transport: &Transport,
        services: &dyn ServiceManager,
    ) -> Result<(), SnapshotError> {
        let (Some(provider), Some(descriptor)) = (self.provider.clone(), self.descriptor.clone())
        else {
            return Err(SnapshotError::Integrity(
                "apply called before a provider was selected".into(),
            ));
        };

        match target {
            ApplyTarget::Export { dir, extract } => {
                self.export(provider.as_ref(), &descriptor, dir, *extract, transport)
                    .await
            }
            ApplyTarget::Node {
                layout,
                services: names,
            } => {
                self.install(provider.as_ref(), &descriptor, layout, names, transport, services)
                    .await
            }
        }
    }

    async fn export(
        &mut self,
        provider: &dyn ProviderAdapter,
        descriptor: &SnapshotDescriptor,
        dir: &Path,
        extract: bool,
        transport: &Transport,
    ) -> Result<(), SnapshotError> {
        let halt = |step: &'static str, source: SnapshotError| {
            SnapshotError::from(Box::new(PipelineError {
                step,
                source,
                services_stopped: Vec::new(),
                backup_path: None,
                backup_kept: false,
                restore_error: None,
            }))
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| halt("download assets", SnapshotError::fs(dir, e)))?;
        let target = InstallTarget::Export { dir, extract };
        let staged = provider
            .download_assets(descriptor, transport, target)
            .await
            .map_err(|e| halt("download assets", e))?;
        self.enter(Stage::AssetsDownloaded);

        provider
            .extract_assets(&staged)
            .await
            .map_err(|e| halt("extract assets", e))?;
        self.enter(Stage::AssetsExtracted);

        self.enter(Stage::Done);
        info!("✅ {} snapshot saved to {}", provider.name(), dir.display());
        Ok(())
    }

    async fn install(
        &mut self,
        provider: &dyn ProviderAdapter,
        descriptor: &SnapshotDescriptor,
        layout: &NodeLayout,
        names: &[String],
        transport: &Transport,
        services: &dyn ServiceManager,
    ) -> Result<(), SnapshotError> {
        check_backup_location(layout, provider, descriptor)?;
        if !tokio::fs::try_exists(&layout.signing_state)
            .await
            .unwrap_or(false)
        {
            return Err(SnapshotError::fs(
                &layout.signing_state,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "validator signing state not found",
                ),
            ));
        }
        let _lock = NodeLock::acquire(&layout.lock_file(), "snapshot-apply")?;

        let stopped = existing_services(services, names).await?;
        if let Err(e) = services.stop(&stopped).await {
            return Err(PipelineError {
                step: "stop services",
                source: e,
                services_stopped: stopped,
                backup_path: None,
                backup_kept: false,
                restore_error: None,
            }
            .into());
        }
        self.enter(Stage::ServicesStopped);

        info!(
            "💾 Backing up {} to {}",
            layout.signing_state.display(),
            layout.backup.display()
        );
        let saved = match backup_signing_state(layout).await {
            Ok(saved) => saved,
            Err(e) => {
                return Err(PipelineError {
                    step: "back up validator state",
                    source: e,
                    services_stopped: stopped,
                    backup_path: None,
                    backup_kept: false,
                    restore_error: None,
                }
                .into())
            }
        };
        self.enter(Stage::StateBackedUp);

        if let Err((step, source)) = self
            .replace_chain_data(provider, descriptor, layout, transport)
            .await
        {
            error!("✖ {} failed, restoring validator state before halting", step);
            let restore_error = restore_signing_state(layout, &saved).await.err();
            if restore_error.is_none() {
                self.enter(Stage::StateRestored);
            }
            return Err(PipelineError {
                step,
                source,
                services_stopped: stopped,
                backup_path: Some(layout.backup.clone()),
                backup_kept: restore_error.is_some(),
                restore_error,
            }
            .into());
        }

        info!("♻️  Restoring {}", layout.signing_state.display());
        if let Err(e) = restore_signing_state(layout, &saved).await {
            return Err(PipelineError {
                step: "restore validator state",
                source: e,
                services_stopped: stopped,
                backup_path: Some(layout.backup.clone()),
                backup_kept: true,
                restore_error: None,
            }
            .into());
        }
        self.enter(Stage::StateRestored);

        if let Err(e) = services.restart(&stopped).await {
            return Err(PipelineError {
                step: "restart services",
                source: e,
                services_stopped: stopped,
                backup_path: None,
                backup_kept: false,
                restore_error: None,
            }
            .into());
        }
        self.enter(Stage::ServicesRestarted);

        self.enter(Stage::Done);
        info!(
            "✅ {} {} snapshot applied",
            provider.name(),
            descriptor.mode
        );
        Ok(())
    }

    /// Provider-specific part: wipe, download, extract.
    async fn replace_chain_data(
        &mut self,
        provider: &dyn ProviderAdapter,
        descriptor: &SnapshotDescriptor,
        layout: &NodeLayout,
        transport: &Transport,
    ) -> Result<(), (&'static str, SnapshotError)> {
        provider
            .prepare_targets(layout)
            .await
            .map_err(|e| ("remove old chain data", e))?;

        let staged = provider
            .download_assets(descriptor, transport, InstallTarget::Node(layout))
            .await
            .map_err(|e| ("download assets", e))?;
        self.enter(Stage::AssetsDownloaded);

        provider
            .extract_assets(&staged)
            .await
            .map_err(|e| ("extract assets", e))?;
        self.enter(Stage::AssetsExtracted);
        Ok(())
    }
}

/// The backup must survive every wipe and extraction the provider may do.
fn check_backup_location(
    layout: &NodeLayout,
    provider: &dyn ProviderAdapter,
    descriptor: &SnapshotDescriptor,
) -> Result<(), SnapshotError> {
    let mut touched = vec![
        layout.consensus_data_dir.clone(),
        layout.execution_chaindata(),
    ];
    touched.extend(
        descriptor
            .assets
            .iter()
            .map(|asset| provider.target_dir(asset, layout)),
    );
    if let Some(dir) = touched.iter().find(|d| layout.backup.starts_with(d)) {
        return Err(SnapshotError::Integrity(format!(
            "validator state backup {} is inside {}, which {} may wipe or overwrite",
            layout.backup.display(),
            dir.display(),
            provider.name()
        )));
    }
    Ok(())
}

/// Signing state as it was before any destructive step.
///
/// Restores are made from these bytes, never from whatever the backup path
/// holds by then.
#[derive(Debug, Clone)]
pub struct SigningStateBackup {
    contents: Vec<u8>,
    permissions: Permissions,
}

impl SigningStateBackup {
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }
}

/// Copies the signing state to the backup path and confirms it is durable.
pub async fn backup_signing_state(
    layout: &NodeLayout,
) -> Result<SigningStateBackup, SnapshotError> {
    let source = &layout.signing_state;
    let contents = tokio::fs::read(source)
        .await
        .map_err(|e| SnapshotError::fs(source, e))?;
    let permissions = tokio::fs::metadata(source)
        .await
        .map_err(|e| SnapshotError::fs(source, e))?
        .permissions();
    write_synced(&layout.backup, &contents, &permissions).await?;

    let written = tokio::fs::read(&layout.backup)
        .await
        .map_err(|e| SnapshotError::fs(&layout.backup, e))?;
    if written != contents {
        return Err(SnapshotError::Integrity(format!(
            "backup {} does not match {}",
            layout.backup.display(),
            source.display()
        )));
    }
    Ok(SigningStateBackup {
        contents,
        permissions,
    })
}

/// Puts the saved signing state back, then removes the backup file.
///
/// The backup file is rewritten first if it no longer matches `saved`, so a
/// failed restore always leaves a correct copy behind. The signing state is
/// replaced with a rename so it is never half written.
pub async fn restore_signing_state(
    layout: &NodeLayout,
    saved: &SigningStateBackup,
) -> Result<(), SnapshotError> {
    let on_disk = tokio::fs::read(&layout.backup).await.ok();
    if on_disk.as_deref() != Some(saved.contents()) {
        warn!(
            "Backup {} changed since it was taken, rewriting it",
            layout.backup.display()
        );
        write_synced(&layout.backup, saved.contents(), saved.permissions()).await?;
    }

    let target = &layout.signing_state;
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{}.restore", file_name));
    write_synced(&temp, saved.contents(), saved.permissions()).await?;
    if let Err(e) = tokio::fs::rename(&temp, target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(SnapshotError::fs(target, e));
    }

    if let Err(e) = tokio::fs::remove_file(&layout.backup).await {
        warn!(
            "Validator state restored but backup {} could not be removed: {}",
            layout.backup.display(),
            e
        );
    }
    Ok(())
}

async fn write_synced(
    path: &Path,
    contents: &[u8],
    permissions: &Permissions,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SnapshotError::fs(parent, e))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| SnapshotError::fs(path, e))?;
    file.set_permissions(permissions.clone())
        .await
        .map_err(|e| SnapshotError::fs(path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| SnapshotError::fs(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| SnapshotError::fs(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, AssetRole, AssetSource};
    use async_trait::async_trait;

    struct Listed;

    #[async_trait]
    impl ProviderAdapter for Listed {
        fn name(&self) -> &str {
            "Listed"
        }

        async fn fetch(&self, mode: PruningMode) -> Result<SnapshotDescriptor, SnapshotError> {
            Ok(descriptor(mode))
        }
    }

    fn descriptor(mode: PruningMode) -> SnapshotDescriptor {
        SnapshotDescriptor {
            provider: "Listed".into(),
            mode,
            assets: vec![Asset {
                role: AssetRole::Consensus,
                name: "story.tar.lz4".into(),
                source: AssetSource::Http {
                    url: "http://127.0.0.1:9/story.tar.lz4".into(),
                },
                size: Some("1G".into()),
            }],
            block_height: Some(10),
            taken_at: None,
            total_size: "1.00G".into(),
            age: "N/A".into(),
        }
    }

    #[tokio::test]
    async fn empty_candidate_set_aborts() {
        let resolver = Resolver::new(vec![Arc::new(Listed)]);
        let mut session = Session::new();
        session.select_mode(PruningMode::Archive);

        let listing = vec![ProviderListing::unknown("Listed", PruningMode::Archive)];
        let err = session.select_provider(&resolver, &listing, "Listed").unwrap_err();
        assert!(matches!(err, SnapshotError::Integrity(_)));
        assert_eq!(session.stage(), Stage::ModeSelected);

        let listing = resolver.resolve_for_mode(PruningMode::Archive).await;
        let err = session.select_provider(&resolver, &listing, "Other").unwrap_err();
        assert!(err.to_string().contains("available: Listed"));

        session.select_provider(&resolver, &listing, "listed").unwrap();
        assert_eq!(
            session.history(),
            [Stage::Idle, Stage::ModeSelected, Stage::ProviderSelected]
        );
    }

    #[test]
    fn backup_must_be_outside_wiped_and_extracted_dirs() {
        let mut layout = NodeLayout::standard(Path::new("/home/val"), "odyssey");
        let descriptor = descriptor(PruningMode::Pruned);
        check_backup_location(&layout, &Listed, &descriptor).unwrap();

        layout.backup = layout.consensus_data_dir.join("priv_validator_state.json.backup");
        assert!(check_backup_location(&layout, &Listed, &descriptor).is_err());

        // consensus archives extract into the consensus home
        layout.backup = layout.consensus_dir.join("priv_validator_state.json.backup");
        let err = check_backup_location(&layout, &Listed, &descriptor).unwrap_err();
        assert!(matches!(err, SnapshotError::Integrity(_)));
        assert!(err.to_string().contains("Listed may wipe or overwrite"));

        layout.backup = PathBuf::from("/var/backups/priv_validator_state.json");
        check_backup_location(&layout, &Listed, &descriptor).unwrap();
    }

    #[tokio::test]
    async fn backup_then_restore_replaces_stale_state() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = NodeLayout::standard(tmp.path(), "odyssey");
        std::fs::create_dir_all(&layout.consensus_data_dir).unwrap();
        std::fs::write(&layout.signing_state, br#"{"height":"42"}"#).unwrap();

        let saved = backup_signing_state(&layout).await.unwrap();
        assert_eq!(saved.contents(), br#"{"height":"42"}"#);
        assert_eq!(std::fs::read(&layout.backup).unwrap(), br#"{"height":"42"}"#);

        // a snapshot carrying its own signing state, and a wiped data dir
        std::fs::write(&layout.signing_state, br#"{"height":"1"}"#).unwrap();
        restore_signing_state(&layout, &saved).await.unwrap();
        assert_eq!(
            std::fs::read(&layout.signing_state).unwrap(),
            br#"{"height":"42"}"#
        );
        assert!(!layout.backup.exists());

        std::fs::remove_dir_all(&layout.consensus_data_dir).unwrap();
        restore_signing_state(&layout, &saved).await.unwrap();
        assert_eq!(
            std::fs::read(&layout.signing_state).unwrap(),
            br#"{"height":"42"}"#
        );
    }

    #[tokio::test]
    async fn restore_ignores_a_replaced_backup_file() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = NodeLayout::standard(tmp.path(), "odyssey");
        std::fs::create_dir_all(&layout.consensus_data_dir).unwrap();
        std::fs::write(&layout.signing_state, br#"{"height":"42"}"#).unwrap();

        let saved = backup_signing_state(&layout).await.unwrap();
        std::fs::write(&layout.backup, br#"{"height":"1"}"#).unwrap();
        std::fs::write(&layout.signing_state, br#"{"height":"1"}"#).unwrap();

        restore_signing_state(&layout, &saved).await.unwrap();
        assert_eq!(
            std::fs::read(&layout.signing_state).unwrap(),
            br#"{"height":"42"}"#
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn backup_and_restore_keep_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let layout = NodeLayout::standard(tmp.path(), "odyssey");
        std::fs::create_dir_all(&layout.consensus_data_dir).unwrap();
        std::fs::write(&layout.signing_state, br#"{"height":"42"}"#).unwrap();
        std::fs::set_permissions(&layout.signing_state, Permissions::from_mode(0o600)).unwrap();

        let saved = backup_signing_state(&layout).await.unwrap();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&layout.backup), 0o600);

        std::fs::remove_file(&layout.signing_state).unwrap();
        std::fs::write(&layout.signing_state, br#"{"height":"1"}"#).unwrap();
        std::fs::set_permissions(&layout.signing_state, Permissions::from_mode(0o644)).unwrap();
        restore_signing_state(&layout, &saved).await.unwrap();
        assert_eq!(mode(&layout.signing_state), 0o600);
    }

    #[tokio::test]
    async fn missing_signing_state_fails_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = NodeLayout::standard(tmp.path(), "odyssey");
        let err = backup_signing_state(&layout).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Filesystem { .. }));
        assert!(!layout.backup.exists());
    }
}
