use serde::{Deserialize, Serialize};

use crate::events::SubscriptionEvent;
use crate::subscription::SubscriptionRecord;

const REGISTRY_FILE_VERSION: u32 = 1;

/// On-disk form of `subscriptions.json`
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct RegistryFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub subs: Vec<SubscriptionRecord>,
}

fn default_version() -> u32 {
    REGISTRY_FILE_VERSION
}

impl RegistryFile {
    pub fn new(subs: Vec<SubscriptionRecord>) -> Self {
        Self {
            version: REGISTRY_FILE_VERSION,
            subs,
        }
    }
}

/// Events after which the registry file is out of date
pub(super) fn needs_save(event: &SubscriptionEvent) -> bool {
    matches!(
        event,
        SubscriptionEvent::Added { .. }
            | SubscriptionEvent::Removed { .. }
            | SubscriptionEvent::Changed { .. }
            | SubscriptionEvent::Upgraded { .. }
    )
}
