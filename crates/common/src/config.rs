//! Tunables of the registry, scheduler and discovery loops
//!
//! All of these deserialize with defaults for every missing field, so a config
//! file only needs to mention what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::DAY_MS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Cap on non-deleted results for subscriptions without their own; 0 is unlimited
    #[serde(default)]
    pub max_results: u32,
    /// Foreign, unsubscribed subscriptions unused for this long are removed
    #[serde(default = "default_expire_unused_days")]
    pub expire_unused_days: u32,
    /// Delay between the first change and writing the subscriptions file
    #[serde(default = "default_save_delay_secs")]
    pub save_delay_secs: u64,
}

fn default_expire_unused_days() -> u32 {
    14
}

fn default_save_delay_secs() -> u64 {
    5
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_results: 0,
            expire_unused_days: default_expire_unused_days(),
            save_delay_secs: default_save_delay_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn expire_unused_ms(&self) -> i64 {
        self.expire_unused_days as i64 * DAY_MS
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_secs(self.save_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval for subscriptions whose schedule does not set one
    #[serde(default = "default_interval_mins")]
    pub default_interval_mins: u32,
    /// `host=mins` pairs separated by commas
    #[serde(default)]
    pub rate_limits: String,
    /// Failed auto-downloads of results older than this are marked read; 0 never
    #[serde(default)]
    pub mark_read_after_days: u32,
    #[serde(default = "default_download_workers")]
    pub result_download_workers: usize,
}

fn default_interval_mins() -> u32 {
    120
}

fn default_download_workers() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_mins: default_interval_mins(),
            rate_limits: String::new(),
            mark_read_after_days: 0,
            result_download_workers: default_download_workers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Announce content associations of public subscriptions
    #[serde(default = "default_true")]
    pub publish_associations: bool,
    /// Announce presence records of subscribed public subscriptions
    #[serde(default = "default_true")]
    pub publish_subscriptions: bool,
    /// Look for and offer upgrades of subscriptions
    #[serde(default = "default_true")]
    pub check_upgrades: bool,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Publishing runs on every this-many ticks
    #[serde(default = "default_publish_ticks")]
    pub publish_every_ticks: u64,
    /// Periodically look up which subscriptions found our downloaded content
    #[serde(default = "default_true")]
    pub lookup_associations: bool,
    /// A periodic association lookup starts on every this-many ticks
    #[serde(default = "default_lookup_ticks")]
    pub lookup_every_ticks: u64,
}

fn default_true() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    30
}

fn default_publish_ticks() -> u64 {
    10
}

fn default_lookup_ticks() -> u64 {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            publish_associations: true,
            publish_subscriptions: true,
            check_upgrades: true,
            tick_secs: default_tick_secs(),
            publish_every_ticks: default_publish_ticks(),
            lookup_associations: true,
            lookup_every_ticks: default_lookup_ticks(),
        }
    }
}

impl DiscoveryConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}
