//! Single-stream HTTP download.

use crate::config::HttpConfig;
use crate::error::SnapshotError;
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_retry2::{Retry, RetryError};
use tracing::{info, warn};

/// Client for asset downloads.
///
/// Only the connect phase has a hard deadline; the body is guarded by the
/// per-chunk idle timeout because a healthy multi-gigabyte transfer can take
/// hours.
pub fn download_client(http: &HttpConfig) -> Result<reqwest::Client, SnapshotError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(http.connect_timeout)
        .user_agent(concat!("storysnap/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Reads a strictly positive `Content-Length` header.
fn declared_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|len| *len > 0)
}

/// Downloads `url` into `dest`, returning the number of bytes written.
///
/// A missing, zero or unparsable `Content-Length` is an integrity failure and
/// is detected before `dest` is touched.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    http: &HttpConfig,
) -> Result<u64, SnapshotError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SnapshotError::Network(format!("failed to reach {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SnapshotError::Network(format!(
            "bad status downloading {}: HTTP {}",
            url, status
        )));
    }

    let content_length = declared_length(&response).ok_or_else(|| {
        SnapshotError::Integrity(format!("invalid or missing Content-Length for {}", url))
    })?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SnapshotError::fs(parent, e))?;
    }
    let file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| SnapshotError::fs(dest, e))?;
    let mut writer = BufWriter::with_capacity(1024 * 1024, file);

    let pb = indicatif::ProgressBar::new(content_length);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} | {bytes_per_sec}, ETA {eta}")
            .map_err(|e| SnapshotError::Config(e.to_string()))?
            .progress_chars("█▓▒░ "),
    );
    let display_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    pb.set_message(format!("⬇️  {}", display_name));

    let mut written = 0u64;
    let mut byte_stream = response.bytes_stream();
    loop {
        let next = tokio::time::timeout(http.idle_timeout, byte_stream.next())
            .await
            .map_err(|_| {
                SnapshotError::Network(format!(
                    "download of {} stalled for {}",
                    url,
                    humantime::format_duration(http.idle_timeout)
                ))
            })?;
        let Some(piece) = next else { break };
        let chunk = piece
            .map_err(|e| SnapshotError::Network(format!("error reading {}: {}", url, e)))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| SnapshotError::fs(dest, e))?;
        written += chunk.len() as u64;
        pb.set_position(written);
    }
    writer.flush().await.map_err(|e| SnapshotError::fs(dest, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| SnapshotError::fs(dest, e))?;

    if written != content_length {
        pb.abandon_with_message(format!("❌ {}", display_name));
        return Err(SnapshotError::Integrity(format!(
            "file size mismatch for {}: expected {} bytes, got {} bytes",
            dest.display(),
            content_length,
            written
        )));
    }

    pb.finish_with_message(format!("✅ {}", display_name));
    Ok(written)
}

/// [`download_file`] with a bounded number of from-scratch retries.
///
/// Only network failures are retried; integrity and filesystem failures
/// abort immediately.
pub async fn download_with_retry(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    http: &HttpConfig,
) -> Result<u64, SnapshotError> {
    let retry_strategy =
        tokio_retry2::strategy::FixedInterval::from_millis(http.retry_interval.as_millis() as u64)
            .take(http.download_retries);

    let result = Retry::spawn(retry_strategy, || {
        let client = client.clone();
        let http = http.clone();
        async move {
            match download_file(&client, url, dest, &http).await {
                Ok(n) => Ok(n),
                Err(e @ SnapshotError::Network(_)) => {
                    warn!("Failed to download {} due to error: {}", url, e);
                    RetryError::to_transient(e)
                }
                Err(e) => RetryError::to_permanent(e),
            }
        }
    })
    .await?;

    info!("Downloaded {} ({} bytes)", dest.display(), result);
    Ok(result)
}
