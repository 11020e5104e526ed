//! Data structures for snapshot resolution and apply.

use crate::display;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a snapshot holds only recent state or the full history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PruningMode {
    Pruned,
    Archive,
}

impl PruningMode {
    pub const ALL: [PruningMode; 2] = [PruningMode::Pruned, PruningMode::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            PruningMode::Pruned => "pruned",
            PruningMode::Archive => "archive",
        }
    }
}

impl fmt::Display for PruningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pruned" => Ok(PruningMode::Pruned),
            "archive" => Ok(PruningMode::Archive),
            other => Err(format!(
                "unknown pruning mode '{}', expected 'pruned' or 'archive'",
                other
            )),
        }
    }
}

/// Logical role of one downloadable snapshot component.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetRole {
    /// Consensus-layer data (the `story` client).
    Consensus,
    /// Execution-layer data (the `geth` client).
    Execution,
}

impl AssetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetRole::Consensus => "consensus",
            AssetRole::Execution => "execution",
        }
    }
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an asset is fetched from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetSource {
    /// A compressed archive served over HTTP(S).
    Http { url: String },
    /// A directory tree in an S3-compatible bucket (`remote:bucket/prefix`).
    Object { remote: String },
}

/// One named downloadable component of a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub role: AssetRole,
    /// File (or directory) name used when staging or exporting.
    pub name: String,
    pub source: AssetSource,
    /// Size as reported by the provider, e.g. `"8.2G"`.
    pub size: Option<String>,
}

/// Normalized metadata about one candidate snapshot from one provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotDescriptor {
    pub provider: String,
    pub mode: PruningMode,
    pub assets: Vec<Asset>,
    pub block_height: Option<u64>,
    pub taken_at: Option<DateTime<Utc>>,
    /// Display total of all asset sizes, `"unknown"` when any is unparsable.
    pub total_size: String,
    /// Age at query time, e.g. `"2h 3m ago"`.
    pub age: String,
}

impl SnapshotDescriptor {
    pub fn height_display(&self) -> String {
        self.block_height
            .map(|h| h.to_string())
            .unwrap_or_else(|| display::NOT_AVAILABLE.to_string())
    }
}

/// One row of the merged provider listing.
///
/// `descriptor` is `None` when the provider could not be queried; the row is
/// still shown with placeholder values so the operator sees every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderListing {
    pub provider: String,
    pub mode: PruningMode,
    pub descriptor: Option<SnapshotDescriptor>,
}

impl ProviderListing {
    pub fn unknown(provider: impl Into<String>, mode: PruningMode) -> Self {
        Self {
            provider: provider.into(),
            mode,
            descriptor: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn total_size(&self) -> &str {
        self.descriptor
            .as_ref()
            .map(|d| d.total_size.as_str())
            .unwrap_or(display::UNKNOWN)
    }

    pub fn block_height(&self) -> String {
        self.descriptor
            .as_ref()
            .map(|d| d.height_display())
            .unwrap_or_else(|| display::NOT_AVAILABLE.to_string())
    }

    pub fn age(&self) -> &str {
        self.descriptor
            .as_ref()
            .map(|d| d.age.as_str())
            .unwrap_or(display::NOT_AVAILABLE)
    }

    /// Summary used by the provider prompt.
    pub fn summary(&self) -> String {
        format!(
            "( mode: {} | size: {} | height: {} | {} )",
            self.mode,
            self.total_size(),
            self.block_height(),
            self.age()
        )
    }
}
