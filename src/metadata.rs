//! Provider metadata fetching.

use crate::config::HttpConfig;
use crate::error::SnapshotError;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Builds the client used for metadata and discovery requests.
///
/// Every request made with it is bounded by `request_timeout`, so a hanging
/// provider cannot stall resolution.
pub fn metadata_client(http: &HttpConfig) -> Result<reqwest::Client, SnapshotError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(http.connect_timeout)
        .timeout(http.request_timeout)
        .user_agent(concat!("storysnap/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Downloads and parses a JSON metadata document.
///
/// Non-2xx statuses become [`SnapshotError::Network`]; bodies that do not
/// match `T` become [`SnapshotError::Schema`].
pub async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, SnapshotError> {
    debug!("Retrieving metadata from {}", url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SnapshotError::Network(format!("failed to reach {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SnapshotError::Network(format!(
            "failed to fetch metadata from {}: HTTP {}",
            url, status
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| SnapshotError::Network(format!("failed to read body from {}: {}", url, e)))?;

    serde_json::from_slice::<T>(&body)
        .map_err(|e| SnapshotError::Schema(format!("invalid metadata format from {}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Deserialize, Debug)]
    struct Doc {
        height: u64,
    }

    fn client() -> reqwest::Client {
        metadata_client(&HttpConfig {
            request_timeout: Duration::from_millis(500),
            ..HttpConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"height": 42}"#))
            .mount(&server)
            .await;

        let doc: Doc = fetch_json(&client(), &format!("{}/meta.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(doc.height, 42);
    }

    #[tokio::test]
    async fn classifies_failures() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"height": 1}"#)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let missing = fetch_json::<Doc>(&client(), &format!("{}/missing", server.uri())).await;
        assert!(matches!(missing, Err(SnapshotError::Network(_))));

        let garbage = fetch_json::<Doc>(&client(), &format!("{}/garbage", server.uri())).await;
        assert!(matches!(garbage, Err(SnapshotError::Schema(_))));

        let slow = fetch_json::<Doc>(&client(), &format!("{}/slow", server.uri())).await;
        assert!(matches!(slow, Err(SnapshotError::Network(_))));
    }
}
