use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use common::prelude::{Query, ResultItem};
use common::providers::{SearchEngine, SearchError, SearchRequest};

use super::REQUEST_TIMEOUT;

/// Runs subscription queries by POSTing them to a search service
///
/// The body is the query itself plus the subscription's search options; the
/// service answers `{"results": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpSearchEngine {
    endpoint: Url,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    subscription_id: &'a str,
    #[serde(flatten)]
    query: &'a Query,
    #[serde(skip_serializing_if = "Option::is_none")]
    networks: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ResultItem>,
}

impl HttpSearchEngine {
    pub fn new(endpoint: Url, client: Client) -> Self {
        Self { endpoint, client }
    }
}

/// Map a failed response onto the error kinds the scheduler distinguishes
fn status_error(status: StatusCode, body: String) -> SearchError {
    let message = format!("{}: {}", status, body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SearchError::Auth(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => SearchError::Fatal(message),
        _ => SearchError::Failed(message),
    }
}

#[async_trait]
impl SearchEngine for HttpSearchEngine {
    async fn execute(&self, request: SearchRequest) -> Result<Vec<ResultItem>, SearchError> {
        let body = SearchBody {
            subscription_id: &request.subscription_id,
            query: &request.query,
            networks: request.networks.as_deref(),
            max_age_secs: request.max_age_secs,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Failed(format!("invalid search response: {}", e)))?;
        tracing::debug!(
            id = %request.subscription_id,
            engine = %request.query.engine,
            count = parsed.results.len(),
            "search answered"
        );
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors() {
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "bad key".into()),
            SearchError::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::GONE, String::new()),
            SearchError::Fatal(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            SearchError::Failed(_)
        ));
    }

    #[test]
    fn test_body_flattens_query() {
        let query = Query::new("web")
            .with_url("https://feeds.example.com/rss")
            .with_interval(30);
        let networks = vec!["public".to_string()];
        let body = SearchBody {
            subscription_id: "abcd",
            query: &query,
            networks: Some(&networks),
            max_age_secs: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["subscription_id"], "abcd");
        assert_eq!(json["engine"], "web");
        assert_eq!(json["url"], "https://feeds.example.com/rss");
        assert_eq!(json["schedule"]["interval"], 30);
        assert_eq!(json["networks"][0], "public");
        assert!(json.get("max_age_secs").is_none());
    }
}
