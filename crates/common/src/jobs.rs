//! Background job dispatcher for the discovery worker
//!
//! Anything that notices follow-up gossip work (an announcement of a higher
//! version, a subscription found without a popularity) queues a job here
//! instead of talking to the DHT inline. The worker drains the queue alongside its tick.

use anyhow::Result;

/// Background jobs that can be dispatched to the discovery worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Someone announced a version of a subscription higher than ours
    ///
    /// The announcement is untrusted; the worker fetches the presence record
    /// for `version`, verifies it and only then offers the upgrade.
    CheckUpgrade {
        /// Subscription id
        id: String,
        /// The announced version
        version: u32,
    },

    /// Refresh the cached popularity of a subscription found without one
    LookupPopularity {
        /// Subscription id
        id: String,
    },
}

/// Job dispatcher that can be cloned and shared across tasks
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create a new job dispatcher and receiver pair
    ///
    /// The dispatcher can be cloned and shared, while the receiver should be
    /// given to the worker task.
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Dispatch a job to the background worker
    ///
    /// This is non-blocking and will succeed unless the receiver has been dropped.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        tracing::debug!(?job, "dispatching discovery job");
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    pub fn dispatch_upgrade_check(&self, id: &str, version: u32) -> Result<()> {
        self.dispatch(Job::CheckUpgrade {
            id: id.to_string(),
            version,
        })
    }

    pub fn dispatch_popularity(&self, id: &str) -> Result<()> {
        self.dispatch(Job::LookupPopularity { id: id.to_string() })
    }
}

/// Job receiver for the background worker
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    /// Try to receive a job without blocking
    ///
    /// Returns None if no jobs are available or all senders have been dropped.
    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    /// Get an async stream of jobs for the worker loop
    pub fn into_async(self) -> flume::r#async::RecvStream<'static, Job> {
        self.rx.into_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_and_receive() {
        let (dispatcher, receiver) = JobDispatcher::new();
        dispatcher.dispatch_popularity("ef01").unwrap();
        dispatcher.dispatch_upgrade_check("abcd", 3).unwrap();

        assert_eq!(
            receiver.try_recv(),
            Some(Job::LookupPopularity {
                id: "ef01".to_string()
            })
        );
        assert_eq!(
            receiver.try_recv(),
            Some(Job::CheckUpgrade {
                id: "abcd".to_string(),
                version: 3
            })
        );
        assert_eq!(receiver.try_recv(), None);
    }

    #[test]
    fn test_dispatch_after_receiver_dropped() {
        let (dispatcher, receiver) = JobDispatcher::new();
        drop(receiver);
        assert!(dispatcher.dispatch_upgrade_check("abcd", 1).is_err());
    }
}
