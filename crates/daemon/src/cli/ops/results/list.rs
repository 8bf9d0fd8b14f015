use clap::Args;

use super::ResultsError;
use crate::cli::op::resolve_subscription;
use crate::cli::ops::format_time;

#[derive(Args, Debug, Clone)]
pub struct List {
    /// Subscription id, id prefix or name
    pub subscription: String,

    /// Include deleted results
    #[arg(long)]
    pub deleted: bool,

    /// Only show unread results
    #[arg(long)]
    pub unread: bool,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = ResultsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let sub = resolve_subscription(&registry, &self.subscription)?;

        let mut results = registry.results().results(&sub, self.deleted).await?;
        results.retain(|r| !self.unread || !r.read);
        results.sort_by_key(|r| std::cmp::Reverse(r.found_at));

        if results.is_empty() {
            return Ok("No results found".to_string());
        }

        let output = results
            .iter()
            .map(|r| {
                let state = match (r.deleted, r.read) {
                    (true, _) => "deleted",
                    (false, true) => "read",
                    (false, false) => "unread",
                };
                let mut line = format!(
                    "{} [{}] {} (found {})",
                    r.id.get(..12).unwrap_or(&r.id),
                    state,
                    r.item.name,
                    format_time(r.found_at)
                );
                if let Some(link) = &r.item.link {
                    line.push_str(&format!("\n    {}", link));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }
}
