use clap::Args;

use common::prelude::Subscription;

#[derive(Args, Debug, Clone)]
pub struct List {
    /// Include subscriptions learned from the network but not subscribed to
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
}

fn flags(sub: &Subscription) -> String {
    let mut flags = Vec::new();
    if sub.is_mine() {
        flags.push("mine");
    }
    if sub.is_public() {
        flags.push("public");
    }
    if sub.is_anonymous() {
        flags.push("anonymous");
    }
    if sub.is_singleton() {
        flags.push("singleton");
    }
    if !sub.is_subscribed() {
        flags.push("unsubscribed");
    }
    if sub.history().last_error.is_some() {
        flags.push("error");
    }
    flags.join(",")
}

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = ListError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let subs = registry.subscriptions(!self.all);

        if subs.is_empty() {
            return Ok("No subscriptions found".to_string());
        }

        let output = subs
            .iter()
            .map(|sub| {
                format!(
                    "{} v{} {} [{}] unread={}",
                    sub.id(),
                    sub.version(),
                    sub.name(),
                    flags(sub),
                    sub.history().num_unread
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }
}
