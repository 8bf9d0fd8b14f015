use clap::Args;

use crate::cli::op::{resolve_subscription, ResolveError, ServiceError};

#[derive(Args, Debug, Clone)]
pub struct Popularity {
    /// Subscription id, id prefix or name
    pub subscription: String,

    /// Count peers on a process-local DHT instead of the configured gateway
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PopularityError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("popularity unavailable: {0}")]
    Lookup(#[from] common::prelude::LookupError),
    #[error("registry error: {0}")]
    Registry(#[from] common::prelude::RegistryError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Popularity {
    type Error = PopularityError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service(self.offline).await?;
        let sub = resolve_subscription(service.registry(), &self.subscription)?;
        let popularity = service.discovery().popularity(&sub).await?;
        service.registry().save_config().await?;
        Ok(format!("{} ({}): {} peer(s)", sub.name(), sub.id(), popularity))
    }
}
