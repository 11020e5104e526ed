//! Mirror discovery for the mirrored-state provider.
//!
//! The set of mirrors changes over time, so it is looked up from a discovery
//! endpoint at startup. When that lookup fails the static list from the
//! configuration is used instead.

use crate::config::{MirroredConfig, ModeUrls};
use crate::metadata::fetch_json;
use crate::types::PruningMode;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

impl ModeUrls {
    pub fn for_mode(&self, mode: PruningMode) -> &[String] {
        match mode {
            PruningMode::Pruned => &self.pruned,
            PruningMode::Archive => &self.archive,
        }
    }
}

/// Discovery document: mirror hosts keyed by an arbitrary label, per mode.
#[derive(Deserialize, Debug, Default)]
struct DiscoveryResponse {
    #[serde(default)]
    pruned: BTreeMap<String, String>,
    #[serde(default)]
    archive: BTreeMap<String, String>,
}

fn mirror_url(template: &str, host: &str) -> String {
    template.replace("{host}", host.trim().trim_end_matches('/'))
}

fn build_urls(template: &str, hosts: &BTreeMap<String, String>) -> Vec<String> {
    hosts
        .values()
        .filter(|h| !h.trim().is_empty())
        .map(|h| mirror_url(template, h))
        .collect()
}

/// Resolves the mirror list for both modes.
///
/// Never fails: discovery errors and empty answers fall back per mode to the
/// configured static list.
pub async fn discover_mirrors(client: &reqwest::Client, config: &MirroredConfig) -> ModeUrls {
    let Some(url) = config.discovery_url.as_deref() else {
        info!("Mirror discovery disabled, using static mirror list");
        return config.fallback.clone();
    };

    match fetch_json::<DiscoveryResponse>(client, url).await {
        Ok(response) => {
            let mut urls = ModeUrls {
                pruned: build_urls(&config.mirror_url_template, &response.pruned),
                archive: build_urls(&config.mirror_url_template, &response.archive),
            };
            if urls.pruned.is_empty() {
                warn!("Discovery returned no pruned mirrors, using static list");
                urls.pruned = config.fallback.pruned.clone();
            }
            if urls.archive.is_empty() {
                warn!("Discovery returned no archive mirrors, using static list");
                urls.archive = config.fallback.archive.clone();
            }
            info!(
                "Discovered {} pruned and {} archive mirrors for {}",
                urls.pruned.len(),
                urls.archive.len(),
                config.name
            );
            urls
        }
        Err(e) => {
            warn!(
                "Mirror discovery for {} failed ({}), falling back to static mirror list",
                config.name, e
            );
            config.fallback.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::metadata::metadata_client;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(discovery: Option<String>) -> MirroredConfig {
        MirroredConfig {
            discovery_url: discovery,
            fallback: ModeUrls {
                pruned: vec!["https://static-p/state.json".into()],
                archive: vec!["https://static-a/state.json".into()],
            },
            ..MirroredConfig::default()
        }
    }

    #[tokio::test]
    async fn builds_mirror_urls_from_hosts() {
        let server = MockServer::start().await;
        Mock::given(path("/snapshots/itrocket"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"pruned": {"b": "server-3.itrocket.net", "a": "server-1.itrocket.net"},
                    "archive": {}}"#,
            ))
            .mount(&server)
            .await;

        let client = metadata_client(&HttpConfig::default()).unwrap();
        let urls = discover_mirrors(
            &client,
            &config(Some(format!("{}/snapshots/itrocket", server.uri()))),
        )
        .await;
        assert_eq!(
            urls.pruned,
            vec![
                "https://server-1.itrocket.net/testnet/story/.current_state.json",
                "https://server-3.itrocket.net/testnet/story/.current_state.json",
            ]
        );
        assert_eq!(urls.archive, vec!["https://static-a/state.json"]);
    }

    #[tokio::test]
    async fn discovery_failure_falls_back() {
        let server = MockServer::start().await;
        Mock::given(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = metadata_client(&HttpConfig::default()).unwrap();
        let cfg = config(Some(format!("{}/down", server.uri())));
        assert_eq!(discover_mirrors(&client, &cfg).await, cfg.fallback);
        assert_eq!(discover_mirrors(&client, &config(None)).await, cfg.fallback);
    }
}
