//! Snapshot resolution across every registered provider.

use crate::providers::ProviderAdapter;
use crate::types::{ProviderListing, PruningMode};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::warn;

/// Fans out metadata queries to all providers.
///
/// Results keep registration order; nothing is cached.
#[derive(Clone)]
pub struct Resolver {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl Resolver {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn adapters(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    /// Looks up a provider by name, ignoring case.
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Queries every provider for `mode` concurrently.
    ///
    /// A failing provider becomes an "unknown" row, never an error.
    pub async fn resolve_for_mode(&self, mode: PruningMode) -> Vec<ProviderListing> {
        let results = join_all(self.adapters.iter().map(|a| a.fetch(mode))).await;
        self.adapters
            .iter()
            .zip(results)
            .map(|(adapter, result)| match result {
                Ok(descriptor) => ProviderListing {
                    provider: adapter.name().to_string(),
                    mode,
                    descriptor: Some(descriptor),
                },
                Err(e) => {
                    warn!("Could not fetch {} {} snapshot info: {}", adapter.name(), mode, e);
                    ProviderListing::unknown(adapter.name(), mode)
                }
            })
            .collect()
    }

    /// Mode-major listing across `modes`.
    pub async fn resolve_for_modes(&self, modes: &[PruningMode]) -> Vec<ProviderListing> {
        let per_mode = join_all(modes.iter().map(|m| self.resolve_for_mode(*m))).await;
        per_mode.into_iter().flatten().collect()
    }
}

/// Rows that can actually be installed.
pub fn candidates(listing: &[ProviderListing]) -> Vec<&ProviderListing> {
    listing.iter().filter(|l| l.is_available()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use crate::types::SnapshotDescriptor;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed {
        name: &'static str,
        delay_ms: u64,
        fail: bool,
    }

    #[async_trait]
    impl ProviderAdapter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, mode: PruningMode) -> Result<SnapshotDescriptor, SnapshotError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            if self.fail {
                return Err(SnapshotError::Schema("garbage".into()));
            }
            Ok(SnapshotDescriptor {
                provider: self.name.to_string(),
                mode,
                assets: vec![],
                block_height: Some(1),
                taken_at: None,
                total_size: "1.00G".into(),
                age: "N/A".into(),
            })
        }
    }

    fn resolver() -> Resolver {
        Resolver::new(vec![
            Arc::new(Fixed { name: "Slow", delay_ms: 50, fail: false }),
            Arc::new(Fixed { name: "Broken", delay_ms: 0, fail: true }),
            Arc::new(Fixed { name: "Fast", delay_ms: 0, fail: false }),
        ])
    }

    #[tokio::test]
    async fn keeps_registration_order_and_placeholders() {
        let listing = resolver().resolve_for_mode(PruningMode::Pruned).await;
        let names: Vec<_> = listing.iter().map(|l| l.provider.as_str()).collect();
        assert_eq!(names, ["Slow", "Broken", "Fast"]);
        assert!(!listing[1].is_available());
        assert_eq!(listing[1].total_size(), "unknown");

        let usable: Vec<_> = candidates(&listing).iter().map(|l| l.provider.clone()).collect();
        assert_eq!(usable, ["Slow", "Fast"]);
    }

    #[tokio::test]
    async fn lists_modes_in_order() {
        let listing = resolver().resolve_for_modes(&PruningMode::ALL).await;
        assert_eq!(listing.len(), 6);
        assert!(listing[..3].iter().all(|l| l.mode == PruningMode::Pruned));
        assert!(listing[3..].iter().all(|l| l.mode == PruningMode::Archive));
    }

    #[test]
    fn finds_adapter_by_name() {
        let resolver = resolver();
        assert_eq!(resolver.adapter(" fast ").map(|a| a.name().to_string()).as_deref(), Some("Fast"));
        assert!(resolver.adapter("nobody").is_none());
    }
}
