use serde::{Deserialize, Serialize};

/// Parsed form of an envelope payload
///
/// The payload is JSON so other implementations can carry extra fields; only
/// the ones polling needs are typed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Which search engine runs the query
    pub engine: String,
    /// Endpoint the engine polls, used for per-host rate limiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Absent means the subscription is never polled automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub filters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Minutes between polls; zero or negative means "use the default"
    #[serde(default)]
    pub interval: i64,
}

impl Query {
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            url: None,
            referer: None,
            schedule: None,
            filters: serde_json::Value::Null,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_interval(mut self, interval: i64) -> Self {
        self.schedule = Some(Schedule { interval });
        self
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Host of the polled endpoint, if any
    pub fn host(&self) -> Option<String> {
        let url = url::Url::parse(self.url.as_deref()?).ok()?;
        url.host_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_payload() {
        let q = Query::from_payload(br#"{"engine":"web"}"#).unwrap();
        assert_eq!(q.engine, "web");
        assert!(q.schedule.is_none());
        assert!(q.host().is_none());
    }

    #[test]
    fn test_host_extraction() {
        let q = Query::new("web")
            .with_url("https://search.example.org/rss?q=rust")
            .with_interval(30);
        assert_eq!(q.host().as_deref(), Some("search.example.org"));

        let back = Query::from_payload(&q.to_payload().unwrap()).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let q = Query::from_payload(br#"{"engine":"web","extra":[1,2],"schedule":{}}"#).unwrap();
        assert_eq!(q.schedule, Some(Schedule { interval: 0 }));
    }
}
