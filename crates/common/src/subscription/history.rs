use serde::{Deserialize, Serialize};

use crate::clock::MINUTE_MS;

use super::query::Schedule;

/// Consecutive failure count that marks an error as fatal
pub const FATAL_ERROR_FAILS: u32 = 1024;

/// Poll state and poll settings of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    pub enabled: bool,
    pub auto_dl: bool,
    pub post_notifications: bool,
    /// Time of the last successful reconcile (ms), 0 if never polled
    pub last_scan: i64,
    pub last_new_result: i64,
    pub num_unread: u32,
    pub num_read: u32,
    /// Cap on non-deleted results; `None` defers to the registry default
    pub max_results: Option<u32>,
    pub networks: Option<Vec<String>>,
    pub max_age_secs: Option<u64>,
    pub last_error: Option<String>,
    pub auth_failed: bool,
    pub consec_fails: u32,
    pub dl_with_ref: bool,
    pub interval_override: Option<u32>,
}

impl Default for History {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_dl: false,
            post_notifications: false,
            last_scan: 0,
            last_new_result: 0,
            num_unread: 0,
            num_read: 0,
            max_results: None,
            networks: None,
            max_age_secs: None,
            last_error: None,
            auth_failed: false,
            consec_fails: 0,
            dl_with_ref: true,
            interval_override: None,
        }
    }
}

impl History {
    /// When the next poll is due, or `None` when it never is.
    ///
    /// An interval override wins; otherwise the schedule's interval is used, and a
    /// non-positive interval falls back to `default_interval_mins`. A subscription
    /// that was never scanned is due `now`.
    pub fn next_scan_time(
        &self,
        schedule: Option<&Schedule>,
        default_interval_mins: u32,
        now: i64,
    ) -> Option<i64> {
        let interval_mins = match (self.interval_override, schedule) {
            (Some(mins), _) if mins > 0 => mins as i64,
            (_, None) => return None,
            (_, Some(schedule)) if schedule.interval > 0 => schedule.interval,
            (_, Some(_)) => default_interval_mins as i64,
        };
        if self.last_scan == 0 {
            Some(now)
        } else {
            Some(self.last_scan + interval_mins * MINUTE_MS)
        }
    }

    /// Effective poll interval in minutes
    pub fn check_frequency_mins(&self, schedule: Option<&Schedule>, default_interval_mins: u32) -> u32 {
        match (self.interval_override, schedule) {
            (Some(mins), _) if mins > 0 => mins,
            (_, Some(schedule)) if schedule.interval > 0 => {
                u32::try_from(schedule.interval).unwrap_or(u32::MAX)
            }
            _ => default_interval_mins,
        }
    }

    pub fn set_last_error(&mut self, error: &str, auth_failed: bool) {
        self.last_error = Some(error.to_string());
        self.auth_failed = auth_failed;
        self.consec_fails = self.consec_fails.saturating_add(1);
    }

    pub fn set_fatal_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
        self.auth_failed = false;
        self.consec_fails = FATAL_ERROR_FAILS;
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.auth_failed = false;
        self.consec_fails = 0;
    }

    pub fn is_fatal(&self) -> bool {
        self.consec_fails >= FATAL_ERROR_FAILS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_never_scanned_is_due_now() {
        let h = History::default();
        let s = Schedule { interval: 60 };
        assert_eq!(h.next_scan_time(Some(&s), 120, NOW), Some(NOW));
    }

    #[test]
    fn test_interval_from_schedule_then_default() {
        let h = History {
            last_scan: NOW,
            ..Default::default()
        };
        assert_eq!(
            h.next_scan_time(Some(&Schedule { interval: 60 }), 120, NOW),
            Some(NOW + 60 * MINUTE_MS)
        );
        assert_eq!(
            h.next_scan_time(Some(&Schedule { interval: 0 }), 120, NOW),
            Some(NOW + 120 * MINUTE_MS)
        );
        assert_eq!(h.next_scan_time(None, 120, NOW), None);
    }

    #[test]
    fn test_override_wins_even_without_schedule() {
        let h = History {
            last_scan: NOW,
            interval_override: Some(15),
            ..Default::default()
        };
        assert_eq!(h.next_scan_time(None, 120, NOW), Some(NOW + 15 * MINUTE_MS));
        assert_eq!(h.check_frequency_mins(None, 120), 15);
    }

    #[test]
    fn test_errors_count_up() {
        let mut h = History::default();
        h.set_last_error("timeout", false);
        h.set_last_error("401", true);
        assert_eq!(h.consec_fails, 2);
        assert!(h.auth_failed);
        assert!(!h.is_fatal());

        h.set_fatal_error("engine removed");
        assert!(h.is_fatal());

        h.clear_error();
        assert_eq!(h.consec_fails, 0);
        assert!(h.last_error.is_none());
    }
}
