use clap::Args;

use super::ResultsError;
use crate::cli::op::resolve_subscription;

#[derive(Args, Debug, Clone)]
pub struct Mark {
    /// Subscription id, id prefix or name
    pub subscription: String,

    /// Result ids (or id prefixes) to mark
    pub results: Vec<String>,

    /// Mark every result
    #[arg(long)]
    pub all: bool,

    /// Mark unread instead of read
    #[arg(long)]
    pub unread: bool,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mark {
    type Error = ResultsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let sub = resolve_subscription(&registry, &self.subscription)?;
        let store = registry.results();

        match (self.all, self.unread) {
            (true, false) => store.mark_all_read(&sub).await?,
            (true, true) => store.mark_all_unread(&sub).await?,
            (false, _) if self.results.is_empty() => return Err(ResultsError::NothingSelected),
            (false, read_state) => {
                let ids = super::delete::expand_ids(store, &sub, &self.results).await?;
                let reads = vec![!read_state; ids.len()];
                store.mark_results(&sub, &ids, &reads).await?;
            }
        }
        registry.save_config().await?;

        let history = sub.history();
        Ok(format!(
            "{}: {} unread, {} read",
            sub.name(),
            history.num_unread,
            history.num_read
        ))
    }
}
