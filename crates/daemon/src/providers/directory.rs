use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use common::prelude::ShortId;
use common::providers::{Directory, DirectoryEntry, DirectoryError};

use super::{endpoint, REQUEST_TIMEOUT};

/// Subscription directory reached over HTTP
///
/// `GET /subscriptions/<short id>?anonymous=<bool>` answers 404 for unknown
/// subscriptions, otherwise `{"version": n, "envelope": "<base64>", "popularity": n}`.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    base: Url,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EntryResponse {
    version: u32,
    #[serde(default)]
    envelope: Option<String>,
    #[serde(default)]
    popularity: Option<u64>,
}

impl TryFrom<EntryResponse> for DirectoryEntry {
    type Error = DirectoryError;

    fn try_from(entry: EntryResponse) -> Result<Self, Self::Error> {
        let envelope = entry
            .envelope
            .map(|data| STANDARD.decode(data))
            .transpose()
            .map_err(|e| DirectoryError::Unavailable(format!("invalid envelope encoding: {}", e)))?;
        Ok(DirectoryEntry {
            version: entry.version,
            envelope,
            popularity: entry.popularity,
        })
    }
}

impl HttpDirectory {
    pub fn new(base: Url, client: Client) -> Self {
        Self { base, client }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn lookup(
        &self,
        short_id: &ShortId,
        anonymous: bool,
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let mut url = endpoint(&self.base, &format!("subscriptions/{}", short_id))
            .map_err(anyhow::Error::from)?;
        url.query_pairs_mut()
            .append_pair("anonymous", if anonymous { "true" } else { "false" });

        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(DirectoryError::Unavailable(format!(
                    "directory answered {}",
                    status
                )))
            }
            _ => {}
        }

        let entry: EntryResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("invalid directory response: {}", e)))?;
        Ok(Some(entry.try_into()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_decodes_envelope() {
        let entry: EntryResponse =
            serde_json::from_str(r#"{"version": 3, "envelope": "AQID", "popularity": 12}"#).unwrap();
        let entry = DirectoryEntry::try_from(entry).unwrap();
        assert_eq!(entry.version, 3);
        assert_eq!(entry.envelope, Some(vec![1, 2, 3]));
        assert_eq!(entry.popularity, Some(12));

        let bare: EntryResponse = serde_json::from_str(r#"{"version": 1}"#).unwrap();
        let bare = DirectoryEntry::try_from(bare).unwrap();
        assert!(bare.envelope.is_none());

        let broken: EntryResponse =
            serde_json::from_str(r#"{"version": 1, "envelope": "not base64!"}"#).unwrap();
        assert!(DirectoryEntry::try_from(broken).is_err());
    }
}
