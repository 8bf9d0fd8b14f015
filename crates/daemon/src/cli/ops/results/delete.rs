use clap::Args;

use common::prelude::Subscription;
use common::results::{ResultStore, ResultStoreError};

use super::ResultsError;
use crate::cli::op::resolve_subscription;

#[derive(Args, Debug, Clone)]
pub struct Delete {
    /// Subscription id, id prefix or name
    pub subscription: String,

    /// Result ids (or id prefixes) to delete
    pub results: Vec<String>,

    /// Delete every result
    #[arg(long)]
    pub all: bool,
}

/// Expand id prefixes into the full ids of the subscription's results
pub(super) async fn expand_ids(
    store: &ResultStore,
    sub: &Subscription,
    prefixes: &[String],
) -> Result<Vec<String>, ResultStoreError> {
    let results = store.results(sub, true).await?;
    Ok(results
        .into_iter()
        .filter(|r| prefixes.iter().any(|p| r.id.starts_with(p.as_str())))
        .map(|r| r.id)
        .collect())
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = ResultsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let sub = resolve_subscription(&registry, &self.subscription)?;
        let store = registry.results();

        if self.all {
            store.delete_all(&sub).await?;
        } else if self.results.is_empty() {
            return Err(ResultsError::NothingSelected);
        } else {
            let ids = expand_ids(store, &sub, &self.results).await?;
            store.delete_results(&sub, &ids).await?;
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
