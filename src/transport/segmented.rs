//! Multi-connection download through `aria2c`.

use crate::config::{HttpConfig, ToolsConfig};
use crate::error::SnapshotError;
use crate::transport::tools;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

/// Builds the `aria2c` argument list for one download.
pub(crate) fn aria2_args(
    tools: &ToolsConfig,
    http: &HttpConfig,
    url: &str,
    dest: &Path,
) -> Result<Vec<String>, SnapshotError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SnapshotError::Integrity(format!("bad destination {}", dest.display())))?;

    Ok(vec![
        format!("--split={}", tools.segments),
        format!("--max-connection-per-server={}", tools.segments),
        "--min-split-size=1M".to_string(),
        "--allow-overwrite=true".to_string(),
        "--auto-file-renaming=false".to_string(),
        "--continue=false".to_string(),
        format!("--connect-timeout={}", http.connect_timeout.as_secs().max(1)),
        format!("--timeout={}", http.idle_timeout.as_secs().max(1)),
        "--console-log-level=error".to_string(),
        "--summary-interval=1".to_string(),
        format!("--dir={}", dir.display()),
        format!("--out={}", name),
        url.to_string(),
    ])
}

/// Downloads `url` into `dest` with parallel segments.
///
/// Installs `aria2c` when missing; install failure is fatal.
pub async fn download(
    tools: &ToolsConfig,
    http: &HttpConfig,
    url: &str,
    dest: &Path,
) -> Result<(), SnapshotError> {
    let program = tools::ensure_tool(&tools.aria2).await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SnapshotError::fs(parent, e))?;
    }

    let args = aria2_args(tools, http, url, dest)?;
    info!("⬇️  Downloading {} with {} connections", url, tools.segments);

    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SnapshotError::Dependency(format!("failed to start aria2c: {}", e)))?;

    let spinner = indicatif::ProgressBar::new_spinner();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            // progress lines look like "[#a1b2c3 1.2GiB/40GiB(3%) CN:16 DL:110MiB ETA:6m]"
            if line.starts_with("[#") {
                spinner.set_message(line.trim().to_string());
                spinner.tick();
            }
        }
    }

    let status = child.wait().await?;
    spinner.finish_and_clear();
    if !status.success() {
        return Err(SnapshotError::Network(format!(
            "aria2c failed for {}: {}",
            url, status
        )));
    }

    if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
        return Err(SnapshotError::Integrity(format!(
            "aria2c reported success but {} is missing",
            dest.display()
        )));
    }
    info!("Download complete: {}", dest.display());
    Ok(())
}
