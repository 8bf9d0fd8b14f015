use crate::clock::{HOUR_MS, MINUTE_MS};

pub const FAIL_INIT_DELAY_MS: i64 = 10 * MINUTE_MS;
pub const FAIL_MAX_DELAY_MS: i64 = 8 * HOUR_MS;

/// Delay before retrying after `fails` consecutive failed polls.
///
/// Doubles from [`FAIL_INIT_DELAY_MS`] with every further failure, capped at
/// [`FAIL_MAX_DELAY_MS`]. Zero failures means no delay.
pub fn backoff_delay(fails: u32) -> i64 {
    if fails == 0 {
        return 0;
    }
    let mut delay = FAIL_INIT_DELAY_MS;
    for _ in 1..fails {
        delay *= 2;
        if delay >= FAIL_MAX_DELAY_MS {
            return FAIL_MAX_DELAY_MS;
        }
    }
    delay
}

/// In-memory scan state of one subscription; never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct ScanState {
    /// Due time computed by the last schedule pass
    pub next_scan: Option<i64>,
    pub fails: u32,
    pub fail_time: i64,
}

impl ScanState {
    pub fn failed(&mut self, now: i64) {
        self.fails = self.fails.saturating_add(1);
        self.fail_time = now;
    }

    pub fn succeeded(&mut self) {
        self.fails = 0;
        self.fail_time = 0;
    }

    /// Retry time while failing, `None` when the regular schedule applies
    pub fn retry_at(&self) -> Option<i64> {
        (self.fails > 0).then(|| self.fail_time + backoff_delay(self.fails))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(0), 0);
        for k in 1..20u32 {
            let expected = (FAIL_INIT_DELAY_MS * 2i64.pow(k - 1)).min(FAIL_MAX_DELAY_MS);
            assert_eq!(backoff_delay(k), expected, "after {} failures", k);
        }
        assert_eq!(backoff_delay(u32::MAX), FAIL_MAX_DELAY_MS);
    }

    #[test]
    fn test_retry_measured_from_last_failure() {
        let mut state = ScanState::default();
        assert_eq!(state.retry_at(), None);

        state.failed(1_000);
        state.failed(5_000);
        assert_eq!(state.retry_at(), Some(5_000 + 2 * FAIL_INIT_DELAY_MS));

        state.succeeded();
        assert_eq!(state.retry_at(), None);
    }
}
