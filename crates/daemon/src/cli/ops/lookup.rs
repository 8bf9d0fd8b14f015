use std::time::Duration;

use clap::Args;

use common::prelude::{ContentId, LookupOutcome};

use crate::cli::op::ServiceError;

#[derive(Args, Debug, Clone)]
pub struct Lookup {
    /// Hex content hash to find subscriptions for
    pub hash: String,

    /// Seconds to wait before settling for what was found
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Search a process-local DHT instead of the configured gateway
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("invalid content hash: {0}")]
    Hash(#[from] hex::FromHexError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("lookup failed: {0}")]
    Lookup(#[from] common::prelude::LookupError),
    #[error("registry error: {0}")]
    Registry(#[from] common::prelude::RegistryError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Lookup {
    type Error = LookupError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let hash = ContentId::from_hex(&self.hash)?;
        let service = ctx.service(self.offline).await?;

        let handle = service.discovery().lookup_associations(&hash);
        handle.set_timeout(Duration::from_secs(self.timeout));
        let (subscriptions, timed_out) = match handle.outcome().await {
            LookupOutcome::Complete {
                subscriptions,
                timed_out,
            } => (subscriptions, timed_out),
            LookupOutcome::Failed(e) => return Err(e.into()),
        };
        service.registry().save_config().await?;

        let mut lines = vec![format!(
            "{} subscription(s) associated with {}{}",
            subscriptions.len(),
            hash,
            if timed_out { " (timed out)" } else { "" }
        )];
        for sub in subscriptions {
            lines.push(format!("  {}  {} v{}", sub.id(), sub.name(), sub.version()));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::op::testing;
    use crate::cli::op::Op;

    #[tokio::test]
    async fn test_lookup_offline_finds_nothing() {
        let (_temp, ctx) = testing::context();
        let output = Lookup {
            hash: "ab".repeat(20),
            timeout: 5,
            offline: true,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(output.starts_with("0 subscription(s) associated with"));
        assert!(!output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_lookup_rejects_bad_hash() {
        let (_temp, ctx) = testing::context();
        let err = Lookup {
            hash: "not hex".to_string(),
            timeout: 5,
            offline: true,
        }
        .execute(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, LookupError::Hash(_)));
    }
}
