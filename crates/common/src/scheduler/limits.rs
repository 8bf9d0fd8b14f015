use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between polls to the same host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimits(HashMap<String, Duration>);

impl RateLimits {
    /// Parse `host=mins` pairs separated by commas.
    ///
    /// Pairs that do not split into exactly two parts, or whose minutes are
    /// not a positive integer, are ignored.
    pub fn parse(pairs: &str) -> Self {
        let limits = pairs
            .split(',')
            .filter_map(|pair| {
                let parts: Vec<&str> = pair.split('=').map(str::trim).collect();
                let [host, mins] = parts.as_slice() else {
                    return None;
                };
                let mins: u64 = mins.parse().ok()?;
                if host.is_empty() || mins == 0 {
                    return None;
                }
                Some((host.to_lowercase(), Duration::from_secs(mins * 60)))
            })
            .collect();
        RateLimits(limits)
    }

    pub fn cooldown(&self, host: &str) -> Option<Duration> {
        self.0.get(&host.to_lowercase()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// When each rate limited host was last polled, on the monotonic clock
#[derive(Debug, Default)]
pub(super) struct HostPolls(HashMap<String, Instant>);

impl HostPolls {
    /// Record a poll to `host` at `now` unless it is still cooling down.
    ///
    /// On refusal returns how much longer the cooldown runs.
    pub(super) fn admit(
        &mut self,
        limits: &RateLimits,
        host: &str,
        now: Instant,
    ) -> Result<(), Duration> {
        let Some(cooldown) = limits.cooldown(host) else {
            return Ok(());
        };
        let host = host.to_lowercase();
        if let Some(last) = self.0.get(&host) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                return Err(cooldown - elapsed);
            }
        }
        self.0.insert(host, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_malformed_pairs() {
        let limits = RateLimits::parse("a.com=5, B.org=10,bad,c.net=0,d.net=x,e=1=2,=3");
        assert_eq!(limits.cooldown("a.com"), Some(Duration::from_secs(300)));
        assert_eq!(limits.cooldown("b.org"), Some(Duration::from_secs(600)));
        assert_eq!(limits.cooldown("c.net"), None);
        assert_eq!(limits.cooldown("d.net"), None);
        assert_eq!(limits.cooldown("e"), None);
        assert!(RateLimits::parse("").is_empty());
    }

    #[test]
    fn test_admit_enforces_cooldown() {
        let limits = RateLimits::parse("a.com=1");
        let mut polls = HostPolls::default();
        let start = Instant::now();

        assert!(polls.admit(&limits, "a.com", start).is_ok());
        let wait = polls
            .admit(&limits, "A.com", start + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(40));
        assert!(polls
            .admit(&limits, "a.com", start + Duration::from_secs(60))
            .is_ok());
        // unlimited hosts are never recorded or refused
        assert!(polls.admit(&limits, "other.com", start).is_ok());
        assert!(polls.admit(&limits, "other.com", start).is_ok());
    }
}
