//! HTTP-backed collaborators plugged into the scheduler and discovery
//!
//! Each one is a thin adapter over an external service: the search endpoint,
//! the transfer service, the DHT gateway and the optional subscription
//! directory.

mod dht;
mod directory;
mod downloader;
mod fetcher;
mod search;
mod unconfigured;

use std::time::Duration;

use reqwest::Client;
use url::Url;

pub use dht::HttpDht;
pub use directory::HttpDirectory;
pub use downloader::HttpDownloader;
pub use fetcher::HttpContentFetcher;
pub use search::HttpSearchEngine;
pub use unconfigured::Unconfigured;

/// Applied to every request except envelope downloads, which are timed by discovery
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("subs/", env!("CARGO_PKG_VERSION"));

/// Client shared by the adapters
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(USER_AGENT).build()
}

/// `base` with `path` appended, whether or not `base` ends in a slash
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let with_slash = Url::parse("http://localhost:9000/api/").unwrap();
        let without = Url::parse("http://localhost:9000/api").unwrap();
        assert_eq!(
            endpoint(&with_slash, "content/ab").unwrap().as_str(),
            "http://localhost:9000/api/content/ab"
        );
        assert_eq!(
            endpoint(&without, "/content/ab").unwrap().as_str(),
            "http://localhost:9000/api/content/ab"
        );
    }
}
