use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use common::dht::{
    Dht, DhtError, DhtFlags, DhtValue, GetOutcome, GetRequest, KeyStats, DEFAULT_MAX_VALUE_SIZE,
};

use super::{endpoint, REQUEST_TIMEOUT};

/// Added to the DHT's own read timeout before the HTTP request gives up
const GATEWAY_SLACK: Duration = Duration::from_secs(5);
/// How often `wait_ready` asks a bootstrapping gateway again
const STATUS_POLL: Duration = Duration::from_secs(5);

/// DHT reached through a gateway node over HTTP
///
/// Keys and values travel base64 encoded:
///
/// * `GET  /dht/status` answers `{"ready", "sleeping", "anonymous", "max_value_size"}`
/// * `POST /dht/get` takes `{"key", "max_values", "timeout_ms", "flags", "allow_diversify"}`
///   and answers `{"values": [{"originator", "value"}], "diversified", "timed_out"}`
/// * `POST /dht/put` takes `{"originator", "key", "value", "flags"}`; 413 means too large
/// * `POST /dht/stats` takes `{"key", "timeout_ms"}` and answers `{"entries", "diversified"}`
///
/// Values are stored under `originator`, so one node id keeps one value per key.
#[derive(Debug)]
pub struct HttpDht {
    base: Url,
    client: Client,
    node_id: String,
    status: RwLock<GatewayStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct GatewayStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    sleeping: bool,
    #[serde(default)]
    anonymous: bool,
    #[serde(default = "default_max_value_size")]
    max_value_size: usize,
}

fn default_max_value_size() -> usize {
    DEFAULT_MAX_VALUE_SIZE
}

impl Default for GatewayStatus {
    fn default() -> Self {
        Self {
            ready: false,
            sleeping: false,
            anonymous: false,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

#[derive(Debug, Serialize)]
struct GetBody {
    key: String,
    max_values: usize,
    timeout_ms: u64,
    flags: u8,
    allow_diversify: bool,
}

#[derive(Debug, Deserialize)]
struct ValueResponse {
    originator: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    values: Vec<ValueResponse>,
    #[serde(default)]
    diversified: bool,
    #[serde(default)]
    timed_out: bool,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    originator: &'a str,
    key: String,
    value: String,
    flags: u8,
}

#[derive(Debug, Serialize)]
struct StatsBody {
    key: String,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    entries: u64,
    #[serde(default)]
    diversified: bool,
}

impl TryFrom<GetResponse> for GetOutcome {
    type Error = DhtError;

    fn try_from(response: GetResponse) -> Result<Self, Self::Error> {
        let values = response
            .values
            .into_iter()
            .map(|v| {
                let value = STANDARD
                    .decode(v.value)
                    .map_err(|e| DhtError::Unavailable(format!("invalid value encoding: {}", e)))?;
                Ok(DhtValue {
                    originator: v.originator,
                    value,
                })
            })
            .collect::<Result<Vec<_>, DhtError>>()?;
        Ok(GetOutcome {
            values,
            diversified: response.diversified,
            timed_out: response.timed_out,
        })
    }
}

fn unavailable(e: reqwest::Error) -> DhtError {
    DhtError::Unavailable(e.to_string())
}

fn check_status(response: &Response) -> Result<(), DhtError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(DhtError::Unavailable(format!("dht gateway answered {}", status)))
    }
}

impl HttpDht {
    pub fn new(base: Url, client: Client, node_id: &str) -> Self {
        Self {
            base,
            client,
            node_id: node_id.to_string(),
            status: RwLock::new(GatewayStatus::default()),
        }
    }

    fn url(&self, path: &str) -> Result<Url, DhtError> {
        Ok(endpoint(&self.base, path).map_err(anyhow::Error::from)?)
    }

    /// Ask the gateway for its state and remember the answer.
    pub async fn refresh_status(&self) -> Result<bool, DhtError> {
        let response = self
            .client
            .get(self.url("dht/status")?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(unavailable)?;
        check_status(&response)?;
        let status: GatewayStatus = response.json().await.map_err(unavailable)?;
        *self.status.write() = status;
        Ok(status.ready)
    }
}

#[async_trait]
impl Dht for HttpDht {
    async fn get(&self, key: &[u8], request: GetRequest) -> Result<GetOutcome, DhtError> {
        let body = GetBody {
            key: STANDARD.encode(key),
            max_values: request.max_values,
            timeout_ms: request.timeout.as_millis() as u64,
            flags: request.flags.bits(),
            allow_diversify: request.allow_diversify,
        };
        let sent = self
            .client
            .post(self.url("dht/get")?)
            .timeout(request.timeout + GATEWAY_SLACK)
            .json(&body)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::debug!("dht read timed out at the gateway");
                return Ok(GetOutcome {
                    timed_out: true,
                    ..GetOutcome::default()
                });
            }
            Err(e) => return Err(unavailable(e)),
        };
        check_status(&response)?;
        let parsed: GetResponse = response.json().await.map_err(unavailable)?;
        parsed.try_into()
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, flags: DhtFlags) -> Result<(), DhtError> {
        let max = self.max_value_size();
        if value.len() > max {
            return Err(DhtError::ValueTooLarge {
                size: value.len(),
                max,
            });
        }
        let size = value.len();
        let body = PutBody {
            originator: &self.node_id,
            key: STANDARD.encode(key),
            value: STANDARD.encode(value),
            flags: flags.bits(),
        };
        let response = self
            .client
            .post(self.url("dht/put")?)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(DhtError::ValueTooLarge { size, max });
        }
        check_status(&response)
    }

    async fn key_stats(&self, key: &[u8], timeout: Duration) -> Result<KeyStats, DhtError> {
        let body = StatsBody {
            key: STANDARD.encode(key),
            timeout_ms: timeout.as_millis() as u64,
        };
        let response = self
            .client
            .post(self.url("dht/stats")?)
            .timeout(timeout + GATEWAY_SLACK)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        check_status(&response)?;
        let stats: StatsResponse = response.json().await.map_err(unavailable)?;
        Ok(KeyStats {
            entries: stats.entries,
            diversified: stats.diversified,
        })
    }

    fn max_value_size(&self) -> usize {
        self.status.read().max_value_size
    }

    fn is_initialising(&self) -> bool {
        !self.status.read().ready
    }

    async fn wait_ready(&self) {
        loop {
            match self.refresh_status().await {
                Ok(true) => return,
                Ok(false) => tracing::debug!("dht gateway still bootstrapping"),
                Err(e) => tracing::debug!("dht gateway status failed: {}", e),
            }
            tokio::time::sleep(STATUS_POLL).await;
        }
    }

    fn is_sleeping(&self) -> bool {
        self.status.read().sleeping
    }

    fn is_anonymous(&self) -> bool {
        self.status.read().anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_response_decodes_values() {
        let response: GetResponse = serde_json::from_str(
            r#"{"values": [{"originator": "n1", "value": "AQID"}], "diversified": true}"#,
        )
        .unwrap();
        let outcome = GetOutcome::try_from(response).unwrap();
        assert_eq!(outcome.values.len(), 1);
        assert_eq!(outcome.values[0].originator, "n1");
        assert_eq!(outcome.values[0].value, vec![1, 2, 3]);
        assert!(outcome.diversified);
        assert!(!outcome.timed_out);

        let broken: GetResponse =
            serde_json::from_str(r#"{"values": [{"originator": "n1", "value": "%%"}]}"#).unwrap();
        assert!(GetOutcome::try_from(broken).is_err());
    }

    #[test]
    fn test_status_defaults() {
        let status: GatewayStatus = serde_json::from_str(r#"{"ready": true}"#).unwrap();
        assert!(status.ready);
        assert_eq!(status.max_value_size, DEFAULT_MAX_VALUE_SIZE);

        let dht = HttpDht::new(
            Url::parse("http://localhost:1").unwrap(),
            Client::new(),
            "node",
        );
        assert!(dht.is_initialising());
    }

    #[tokio::test]
    async fn test_oversized_put_rejected_locally() {
        let dht = HttpDht::new(
            Url::parse("http://localhost:1").unwrap(),
            Client::new(),
            "node",
        );
        let err = dht
            .put(b"k", vec![0; DEFAULT_MAX_VALUE_SIZE + 1], DhtFlags::NONE)
            .await
            .unwrap_err();
        assert!(matches!(err, DhtError::ValueTooLarge { .. }));
    }
}
