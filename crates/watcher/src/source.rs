use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sitewatch_core::detect::PageFetcher;
use sitewatch_core::DetectError;

/// Single GET of the monitored page with a client-level timeout.
pub struct HttpPageFetcher {
    client: Client,
    url: String,
}

impl HttpPageFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("sitewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    fn source_ref(&self) -> &str {
        &self.url
    }

    async fn fetch_page(&self) -> Result<String, DetectError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DetectError::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DetectError::Fetch(format!("page download failed ({status})")));
        }
        resp.text()
            .await
            .map_err(|e| DetectError::Fetch(e.to_string()))
    }
}
