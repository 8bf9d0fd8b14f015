use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;
use url::Url;

use common::prelude::ContentId;
use common::providers::{ContentFetcher, ContentInfo, FetchError, TransferProgress};

use super::endpoint;

/// Header the transfer service uses to report how many sources hold the content
pub const SEEDS_HEADER: &str = "x-seeds";

/// Reads envelope documents from the transfer service by content id
///
/// `GET /content/<hex>/info` answers `{"size": n}`; `GET /content/<hex>` streams
/// the data.
#[derive(Debug, Clone)]
pub struct HttpContentFetcher {
    transfer: Url,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    size: u64,
}

impl HttpContentFetcher {
    pub fn new(transfer: Url, client: Client) -> Self {
        Self { transfer, client }
    }

    fn url(&self, hash: &ContentId, suffix: &str) -> Result<Url, FetchError> {
        let path = format!("content/{}{}", hash.to_hex(), suffix);
        Ok(endpoint(&self.transfer, &path).map_err(anyhow::Error::from)?)
    }
}

fn check_status(response: &Response, hash: &ContentId) -> Result<(), FetchError> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(FetchError::NotFound(hash.clone())),
        status if !status.is_success() => Err(FetchError::Failed(format!(
            "transfer service answered {}",
            status
        ))),
        _ => Ok(()),
    }
}

fn seeds_of(response: &Response) -> u32 {
    response
        .headers()
        .get(SEEDS_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn resolve(&self, hash: &ContentId, timeout: Duration) -> Result<ContentInfo, FetchError> {
        let response = self
            .client
            .get(self.url(hash, "/info")?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?;
        check_status(&response, hash)?;

        let info: InfoResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Failed(format!("invalid info response: {}", e)))?;
        Ok(ContentInfo { size: info.size })
    }

    async fn download(
        &self,
        hash: &ContentId,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .client
            .get(self.url(hash, "")?)
            .send()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?;
        check_status(&response, hash)?;

        let seeds = seeds_of(&response);
        progress.send_replace(TransferProgress { bytes: 0, seeds });

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?
        {
            data.extend_from_slice(&chunk);
            progress.send_replace(TransferProgress {
                bytes: data.len() as u64,
                seeds,
            });
        }
        tracing::debug!(%hash, size = data.len(), "content fetched");
        Ok(data)
    }
}
