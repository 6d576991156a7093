//! HTTP client for Met Office bulletins

use reqwest::Client;
use tracing::{error, info};

use crate::config::SourceConfig;
use crate::error::{IngestError, IngestResult};

/// Downloads raw bulletin text for a (parameter, region) pair
///
/// There is no retry at this layer: any network error, timeout or non-2xx
/// status is reported as [`IngestError::FetchFailed`].
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    base_url: String,
}

impl Fetcher {
    pub fn new(config: &SourceConfig) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the bulletin for a pair
    pub fn source_url(&self, parameter: &str, region: &str) -> String {
        format!("{}/{}/date/{}.txt", self.base_url, parameter, region)
    }

    pub async fn fetch(&self, parameter: &str, region: &str) -> IngestResult<String> {
        let url = self.source_url(parameter, region);
        info!("Fetching bulletin from: {}", url);

        let fail = |reason: String| {
            error!(url = %url, "Failed to fetch bulletin: {}", reason);
            IngestError::FetchFailed {
                url: url.clone(),
                reason,
            }
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }

        let text = response.text().await.map_err(|e| fail(e.to_string()))?;
        info!(url = %url, bytes = text.len(), "Fetched bulletin");
        Ok(text)
    }
}
