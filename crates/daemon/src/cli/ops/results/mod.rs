use clap::{Args, Subcommand};

pub mod delete;
pub mod list;
pub mod mark;

use crate::cli::op::Op;

crate::command_enum! {
    (List, list::List),
    (Mark, mark::Mark),
    (Delete, delete::Delete),
}

// Rename the generated Command to ResultsCommand for clarity
pub type ResultsCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Results {
    #[command(subcommand)]
    pub command: ResultsCommand,
}

#[async_trait::async_trait]
impl Op for Results {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Errors shared by the result commands
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
    #[error(transparent)]
    Resolve(#[from] crate::cli::op::ResolveError),
    #[error("result store error: {0}")]
    Store(#[from] common::results::ResultStoreError),
    #[error("registry error: {0}")]
    Registry(#[from] common::prelude::RegistryError),
    #[error("either result ids or --all must be given")]
    NothingSelected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::op::testing;
    use common::prelude::{Query, ResultItem};

    #[tokio::test]
    async fn test_mark_and_delete_results() {
        let (_temp, ctx) = testing::context();
        let registry = ctx.registry().await.unwrap();
        let payload = Query::new("web").to_payload().unwrap();
        let sub = registry.create("reads", false, false, payload).unwrap();
        let items = ["a", "b", "c"].iter().map(|n| ResultItem::new(n)).collect();
        registry.results().reconcile(&sub, items).await.unwrap();
        registry.results().mark_all_unread(&sub).await.unwrap();
        registry.save_config().await.unwrap();

        let ids: Vec<String> = registry
            .results()
            .results(&sub, false)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mark = mark::Mark {
            subscription: "reads".to_string(),
            results: vec![ids[0][..10].to_string()],
            all: false,
            unread: false,
        };
        let output = mark.execute(&ctx).await.unwrap();
        assert_eq!(output, "reads: 2 unread, 1 read");

        let delete = delete::Delete {
            subscription: "reads".to_string(),
            results: vec![ids[1].clone()],
            all: false,
        };
        let output = delete.execute(&ctx).await.unwrap();
        assert_eq!(output, "reads: 1 unread, 1 read");

        let listed = list::List {
            subscription: "reads".to_string(),
            deleted: true,
            unread: false,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(listed.contains("[deleted] "));

        let nothing = delete::Delete {
            subscription: "reads".to_string(),
            results: Vec::new(),
            all: false,
        };
        assert!(matches!(
            nothing.execute(&ctx).await,
            Err(ResultsError::NothingSelected)
        ));
    }
}
