use std::fmt::Debug;

use async_trait::async_trait;

use crate::subscription::Subscription;

/// Decides whether a verified upgrade gets applied
#[async_trait]
pub trait UpgradePrompt: Send + Sync + Debug + 'static {
    /// Asked at most once per version; `new_version` is already verified.
    async fn confirm(&self, sub: &Subscription, new_version: u32) -> bool;
}

/// Answers every prompt the same way without asking anyone
#[derive(Debug, Clone, Copy)]
pub struct AutoUpgrade(pub bool);

impl Default for AutoUpgrade {
    fn default() -> Self {
        AutoUpgrade(true)
    }
}

#[async_trait]
impl UpgradePrompt for AutoUpgrade {
    async fn confirm(&self, sub: &Subscription, new_version: u32) -> bool {
        tracing::info!(
            id = %sub.id(),
            from = sub.version(),
            to = new_version,
            accept = self.0,
            "upgrade available"
        );
        self.0
    }
}
