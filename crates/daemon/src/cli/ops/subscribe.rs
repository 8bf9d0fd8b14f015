use clap::Args;

use common::prelude::RegistryError;

use crate::cli::op::{resolve_subscription, ResolveError};

#[derive(Args, Debug, Clone)]
pub struct Subscribe {
    /// Subscription id, id prefix or name
    pub subscription: String,

    /// Unsubscribe instead
    #[arg(long)]
    pub off: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Subscribe {
    type Error = SubscribeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let sub = resolve_subscription(&registry, &self.subscription)?;

        sub.set_subscribed(!self.off);
        registry.save_config().await?;

        let verb = if self.off { "Unsubscribed from" } else { "Subscribed to" };
        Ok(format!("{} {} ({})", verb, sub.name(), sub.id()))
    }
}
