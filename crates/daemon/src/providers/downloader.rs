use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use common::prelude::ContentId;
use common::providers::{DownloadError, ResultDownloader};

use super::{endpoint, REQUEST_TIMEOUT};

/// Fetches result links over HTTP and hands the bytes to the transfer service
///
/// The transfer service answers `POST /content` with `{"hash": "<hex>"}`, the
/// content id it will serve the data under.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    transfer: Url,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    hash: ContentId,
}

impl HttpDownloader {
    pub fn new(transfer: Url, client: Client) -> Self {
        Self { transfer, client }
    }

    async fn fetch_link(&self, link: &str, referer: Option<&str>) -> Result<Vec<u8>, DownloadError> {
        let mut request = self.client.get(link).timeout(REQUEST_TIMEOUT);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::Failed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::BAD_REQUEST {
            return Err(DownloadError::Decode(format!("link refused: {}", status)));
        }
        if !status.is_success() {
            return Err(DownloadError::Failed(format!("link answered {}", status)));
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if is_html {
            return Err(DownloadError::Decode("link returned a web page".to_string()));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Failed(e.to_string()))?;
        if data.is_empty() {
            return Err(DownloadError::Decode("link returned no data".to_string()));
        }
        Ok(data.to_vec())
    }
}

#[async_trait]
impl ResultDownloader for HttpDownloader {
    async fn download(&self, link: &str, referer: Option<&str>) -> Result<ContentId, DownloadError> {
        let data = self.fetch_link(link, referer).await?;
        let size = data.len();

        let url = endpoint(&self.transfer, "content").map_err(anyhow::Error::from)?;
        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .body(data)
            .send()
            .await
            .map_err(|e| DownloadError::Failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::Failed(format!(
                "transfer service answered {}",
                response.status()
            )));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| DownloadError::Failed(format!("invalid transfer response: {}", e)))?;
        tracing::info!(link, size, hash = %added.hash, "result content added");
        Ok(added.hash)
    }
}
