//! Bulk copy from S3-compatible object storage through `rclone`.

use crate::config::{HttpConfig, ObjectStoreConfig, ToolsConfig};
use crate::error::SnapshotError;
use crate::transport::tools;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CLIENT_CONFIG_FILE: &str = "rclone.conf";

/// Minimal client configuration declaring one anonymous S3 remote.
pub fn render_client_config(remote_name: &str, store: &ObjectStoreConfig) -> String {
    format!(
        "[{}]\ntype = s3\nprovider = {}\nregion = {}\nendpoint = {}\n",
        remote_name, store.provider, store.region, store.endpoint
    )
}

/// Rewrites the client configuration; called on every run.
pub async fn write_client_config(
    config_dir: &Path,
    remote_name: &str,
    store: &ObjectStoreConfig,
) -> Result<PathBuf, SnapshotError> {
    tokio::fs::create_dir_all(config_dir)
        .await
        .map_err(|e| SnapshotError::fs(config_dir, e))?;
    let path = config_dir.join(CLIENT_CONFIG_FILE);
    tokio::fs::write(&path, render_client_config(remote_name, store))
        .await
        .map_err(|e| SnapshotError::fs(&path, e))?;
    Ok(path)
}

pub(crate) fn copy_args(
    tools: &ToolsConfig,
    http: &HttpConfig,
    client_config: &Path,
    source: &str,
    dest_dir: &Path,
) -> Vec<String> {
    vec![
        "--config".to_string(),
        client_config.display().to_string(),
        "copy".to_string(),
        format!("--transfers={}", tools.transfers),
        format!("--checkers={}", tools.transfers),
        format!("--contimeout={}s", http.connect_timeout.as_secs().max(1)),
        format!("--timeout={}s", http.idle_timeout.as_secs().max(1)),
        "--progress".to_string(),
        source.to_string(),
        dest_dir.display().to_string(),
    ]
}

/// Copies `source` (`remote:bucket/prefix`) into `dest_dir`.
pub async fn copy(
    tools: &ToolsConfig,
    http: &HttpConfig,
    config_dir: &Path,
    remote_name: &str,
    store: &ObjectStoreConfig,
    source: &str,
    dest_dir: &Path,
) -> Result<(), SnapshotError> {
    let program = tools::ensure_tool(&tools.rclone).await?;
    info!("Configuring {} for remote {}...", tools.rclone.program, remote_name);
    let client_config = write_client_config(config_dir, remote_name, store).await?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| SnapshotError::fs(dest_dir, e))?;

    info!("⬇️  Copying {} into {}", source, dest_dir.display());
    let args = copy_args(tools, http, &client_config, source, dest_dir);
    tools::run_attached(&program, &args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;

    #[test]
    fn client_config_declares_remote() {
        let conf = render_client_config("krews-snapshot", &ObjectStoreConfig::default());
        assert_eq!(
            conf,
            "[krews-snapshot]\ntype = s3\nprovider = DigitalOcean\nregion = fra1\nendpoint = https://fra1.cdn.digitaloceanspaces.com\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rewrites_config_and_invokes_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("args.log");
        let fake = crate::transport::tools::tests::fake_tool(
            tmp.path(),
            "rclone",
            &format!("echo \"$@\" > {}", log.display()),
        );
        let tools = ToolsConfig {
            rclone: ToolConfig {
                program: fake.to_string_lossy().into_owned(),
                install: vec![],
            },
            ..ToolsConfig::default()
        };
        let config_dir = tmp.path().join("conf");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CLIENT_CONFIG_FILE), "[stale]\n").unwrap();

        let dest = tmp.path().join("export");
        copy(
            &tools,
            &HttpConfig::default(),
            &config_dir,
            "snap",
            &ObjectStoreConfig::default(),
            "snap:bucket/story_testnet_pruned_snapshot/story",
            &dest,
        )
        .await
        .unwrap();

        let conf = std::fs::read_to_string(config_dir.join(CLIENT_CONFIG_FILE)).unwrap();
        assert!(conf.starts_with("[snap]\n"));
        let args = std::fs::read_to_string(&log).unwrap();
        assert!(args.contains("copy --transfers=6 --checkers=6"));
        assert!(args.contains("snap:bucket/story_testnet_pruned_snapshot/story"));
        assert!(args.trim_end().ends_with(&dest.display().to_string()));
        assert!(dest.is_dir());
    }
}
