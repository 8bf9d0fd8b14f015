use clap::Args;

use super::format_time;
use crate::cli::op::{resolve_subscription, ResolveError};

#[derive(Args, Debug, Clone)]
pub struct Show {
    /// Subscription id, id prefix or name
    pub subscription: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ShowError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Show {
    type Error = ShowError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let sub = resolve_subscription(&registry, &self.subscription)?;
        let history = sub.history();

        let mut lines = vec![
            format!("{} ({})", sub.name(), sub.id()),
            format!("  version:      {}", sub.version()),
            format!("  public key:   {}", sub.public_key()),
            format!("  public:       {}", sub.is_public()),
            format!("  anonymous:    {}", sub.is_anonymous()),
            format!("  mine:         {}", sub.is_mine()),
            format!("  subscribed:   {}", sub.is_subscribed()),
            format!("  added:        {:?} at {}", sub.add_type(), format_time(sub.add_time())),
            format!("  payload:      {}", String::from_utf8_lossy(&sub.payload())),
            format!("  last scan:    {}", format_time(history.last_scan)),
            format!("  last new:     {}", format_time(history.last_new_result)),
            format!("  results:      {} unread, {} read", history.num_unread, history.num_read),
            format!("  auto download: {}", history.auto_dl),
            format!("  associations: {}", sub.association_count()),
        ];
        if let Some(popularity) = sub.cached_popularity() {
            lines.push(format!("  popularity:   {}", popularity));
        }
        if let Some(error) = &history.last_error {
            lines.push(format!(
                "  last error:   {} ({} consecutive)",
                error, history.consec_fails
            ));
        }

        Ok(lines.join("\n"))
    }
}
