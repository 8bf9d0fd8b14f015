use std::path::PathBuf;

use clap::Args;

use common::prelude::EnvelopeError;

use crate::cli::op::{resolve_subscription, ResolveError};

#[derive(Args, Debug, Clone)]
pub struct Export {
    /// Subscription id, id prefix or name
    pub subscription: String,

    /// File to write the signed subscription document to
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Export {
    type Error = ExportError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let sub = resolve_subscription(&registry, &self.subscription)?;

        // the exported document never carries the private key
        sub.envelope().save(&self.path).await?;

        Ok(format!(
            "Exported {} v{} to {}",
            sub.name(),
            sub.version(),
            self.path.display()
        ))
    }
}
