//! StorySnap - resolve, download and safely apply Story node chain snapshots
//!
//! Several independent providers publish snapshots of the Story consensus
//! (`story`) and execution (`geth`) chain data, each in its own metadata
//! shape. This library normalizes them, lets the operator pick one, and
//! installs it without ever losing the validator signing state.
//!
//! # Features
//!
//! - **Multiple Providers**: mirrored-state, aggregated-catalog and computed-catalog
//!   adapters behind one [`ProviderAdapter`] trait
//! - **Partial Failure Tolerance**: an unreachable provider shows up as "unknown"
//! - **Three Transports**: single-stream HTTP, `aria2c` segments, `rclone` bucket copy
//! - **Streaming Extraction**: LZ4 (and gzip) tar archives, permission bits preserved
//! - **Safe Apply**: services stopped, signing state backed up and restored after
//!   extraction, never restarted after a failure
//!
//! # Example
//!
//! ```no_run
//! use storysnap::{build_registry, discover_mirrors, metadata_client, Config, PruningMode, Resolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let client = metadata_client(&config.http)?;
//! let mirrors = discover_mirrors(&client, &config.providers.mirrored).await;
//! let resolver = Resolver::new(build_registry(&config, mirrors, client));
//!
//! for row in resolver.resolve_for_mode(PruningMode::Pruned).await {
//!     println!("{} {}", row.provider, row.summary());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod display;
pub mod endpoints;
pub mod error;
pub mod layout;
pub mod lock;
pub mod metadata;
pub mod pipeline;
pub mod providers;
pub mod resolver;
pub mod services;
pub mod transport;
pub mod types;

pub use codec::{extract_archive, extract_lz4_tar, ExtractStats};
pub use config::Config;
pub use endpoints::discover_mirrors;
pub use error::{PipelineError, SnapshotError};
pub use layout::NodeLayout;
pub use metadata::metadata_client;
pub use pipeline::{ApplyTarget, Session, SigningStateBackup, Stage};
pub use providers::{build_registry, ProviderAdapter, WipePolicy};
pub use resolver::{candidates, Resolver};
pub use services::{ServiceManager, Systemctl};
pub use transport::{TransferKind, Transport};
pub use types::{Asset, AssetRole, AssetSource, ProviderListing, PruningMode, SnapshotDescriptor};
