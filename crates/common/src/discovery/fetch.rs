//! Envelope downloads with a stall monitor

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::content_id::ContentId;
use crate::providers::{ContentFetcher, FetchError, TransferProgress};

pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(300);
/// Allowed excess of the transfer size over the signed size
pub const SIZE_SLOP: u64 = 10 * 1024;
pub const MAX_ENVELOPE_SIZE: u64 = 4 * 1024 * 1024;

const MONITOR_PERIOD: Duration = Duration::from_secs(10);
const MAX_TRANSFER_TIME: Duration = Duration::from_secs(10 * 60);
const ZERO_BYTES_LIMIT: Duration = Duration::from_secs(4 * 60);
const NO_SEEDS_LIMIT: Duration = Duration::from_secs(2 * 60);

/// Fetch the encoded envelope stored under `hash`.
///
/// `signed_size` is the size announced in the presence record; the transfer may
/// exceed it by at most [`SIZE_SLOP`], and never [`MAX_ENVELOPE_SIZE`].
pub async fn fetch_envelope(
    fetcher: &dyn ContentFetcher,
    hash: &ContentId,
    signed_size: u32,
) -> Result<Vec<u8>, FetchError> {
    let info = timeout(RESOLVE_TIMEOUT, fetcher.resolve(hash, RESOLVE_TIMEOUT))
        .await
        .map_err(|_| FetchError::Abandoned("timed out resolving content".to_string()))??;

    let limit = signed_size as u64 + SIZE_SLOP;
    if info.size > limit {
        return Err(FetchError::TooLarge {
            size: info.size,
            limit,
        });
    }
    if info.size > MAX_ENVELOPE_SIZE {
        return Err(FetchError::TooLarge {
            size: info.size,
            limit: MAX_ENVELOPE_SIZE,
        });
    }

    let (tx, rx) = watch::channel(TransferProgress::default());
    tokio::select! {
        result = fetcher.download(hash, tx) => {
            let data = result?;
            if data.len() as u64 > limit.min(MAX_ENVELOPE_SIZE) {
                return Err(FetchError::TooLarge {
                    size: data.len() as u64,
                    limit: limit.min(MAX_ENVELOPE_SIZE),
                });
            }
            Ok(data)
        }
        reason = monitor(rx) => {
            tracing::info!(%hash, reason, "envelope download abandoned");
            Err(FetchError::Abandoned(reason.to_string()))
        }
    }
}

/// Resolves with the reason once the transfer should be given up.
async fn monitor(progress: watch::Receiver<TransferProgress>) -> &'static str {
    let start = Instant::now();
    let mut ticker = interval(MONITOR_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let running_for = start.elapsed();
        let current = *progress.borrow();

        if running_for > MAX_TRANSFER_TIME {
            return "not completed in permitted time";
        } else if running_for > ZERO_BYTES_LIMIT {
            if current.bytes == 0 {
                return "nothing downloaded";
            }
        } else if running_for > NO_SEEDS_LIMIT && current.seeds == 0 {
            return "no seeds";
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ContentInfo;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Scripted {
        size: u64,
        /// progress to report before stalling forever, or None to complete
        stall_with: Option<TransferProgress>,
    }

    #[async_trait]
    impl ContentFetcher for Scripted {
        async fn resolve(&self, _: &ContentId, _: Duration) -> Result<ContentInfo, FetchError> {
            Ok(ContentInfo { size: self.size })
        }

        async fn download(
            &self,
            _: &ContentId,
            progress: watch::Sender<TransferProgress>,
        ) -> Result<Vec<u8>, FetchError> {
            match self.stall_with {
                Some(p) => {
                    progress.send_replace(p);
                    std::future::pending().await
                }
                None => Ok(vec![0; self.size as usize]),
            }
        }
    }

    fn hash() -> ContentId {
        ContentId::new(vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_fetch_within_limits() {
        let fetcher = Scripted {
            size: 100,
            stall_with: None,
        };
        let data = fetch_envelope(&fetcher, &hash(), 100).await.unwrap();
        assert_eq!(data.len(), 100);
    }

    #[tokio::test]
    async fn test_size_slop() {
        let fetcher = Scripted {
            size: 100 + SIZE_SLOP + 1,
            stall_with: None,
        };
        let err = fetch_envelope(&fetcher, &hash(), 100).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { .. }));

        let fetcher = Scripted {
            size: MAX_ENVELOPE_SIZE + 1,
            stall_with: None,
        };
        let err = fetch_envelope(&fetcher, &hash(), MAX_ENVELOPE_SIZE as u32)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit, .. } if limit == MAX_ENVELOPE_SIZE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_without_seeds() {
        let fetcher = Scripted {
            size: 10,
            stall_with: Some(TransferProgress { bytes: 5, seeds: 0 }),
        };
        let started = Instant::now();
        let err = fetch_envelope(&fetcher, &hash(), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Abandoned(ref r) if r == "no seeds"));
        assert!(started.elapsed() > NO_SEEDS_LIMIT);
        assert!(started.elapsed() <= ZERO_BYTES_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_with_nothing_downloaded() {
        let fetcher = Scripted {
            size: 10,
            stall_with: Some(TransferProgress { bytes: 0, seeds: 2 }),
        };
        let err = fetch_envelope(&fetcher, &hash(), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Abandoned(ref r) if r == "nothing downloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_slow_transfer() {
        let fetcher = Scripted {
            size: 10,
            stall_with: Some(TransferProgress { bytes: 3, seeds: 1 }),
        };
        let started = Instant::now();
        let err = fetch_envelope(&fetcher, &hash(), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Abandoned(ref r) if r == "not completed in permitted time"));
        assert!(started.elapsed() > MAX_TRANSFER_TIME);
    }
}
