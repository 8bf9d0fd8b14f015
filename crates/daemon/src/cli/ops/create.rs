use clap::Args;

use common::prelude::{Query, RegistryError};

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Display name of the subscription
    pub name: String,

    /// Search engine that runs the query
    #[arg(long, default_value = "web")]
    pub engine: String,

    /// Endpoint the engine polls
    #[arg(long)]
    pub url: Option<String>,

    /// Referer sent when downloading results
    #[arg(long)]
    pub referer: Option<String>,

    /// Minutes between polls; 0 uses the default, omit to never poll automatically
    #[arg(long)]
    pub interval: Option<i64>,

    /// Publish the subscription to other peers
    #[arg(long)]
    pub public: bool,

    /// Only announce it on anonymous networks
    #[arg(long)]
    pub anonymous: bool,

    /// Download new results automatically
    #[arg(long)]
    pub auto_download: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("invalid query: {0}")]
    Query(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = CreateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;

        let mut query = Query::new(&self.engine);
        query.url = self.url.clone();
        query.referer = self.referer.clone();
        if let Some(interval) = self.interval {
            query = query.with_interval(interval);
        }

        let sub = registry.create(&self.name, self.public, self.anonymous, query.to_payload()?)?;
        if self.auto_download {
            sub.update_history(|h| h.auto_dl = true);
        }
        registry.save_config().await?;

        Ok(format!("Created subscription {} ({})", sub.name(), sub.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::op::{testing, Op};
    use crate::cli::ops::{List, Show};

    fn create(name: &str) -> Create {
        Create {
            name: name.to_string(),
            engine: "web".to_string(),
            url: Some("https://feeds.example.com/rss".to_string()),
            referer: None,
            interval: Some(30),
            public: true,
            anonymous: false,
            auto_download: true,
        }
    }

    #[tokio::test]
    async fn test_create_persists_subscription() {
        let (_temp, ctx) = testing::context();
        let output = create("nightly builds").execute(&ctx).await.unwrap();
        assert!(output.starts_with("Created subscription nightly builds"));

        let registry = ctx.registry().await.unwrap();
        let subs = registry.subscriptions(true);
        assert_eq!(subs.len(), 1);
        let sub = &subs[0];
        assert!(sub.is_mine());
        assert!(sub.is_public());
        assert!(sub.history().auto_dl);
        let query = sub.query().unwrap();
        assert_eq!(query.url.as_deref(), Some("https://feeds.example.com/rss"));
        assert_eq!(query.schedule.unwrap().interval, 30);

        let listed = List { all: false }.execute(&ctx).await.unwrap();
        assert!(listed.contains("nightly builds"));
        assert!(listed.contains("mine,public"));

        let shown = Show {
            subscription: "nightly builds".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(shown.contains("last scan:    never"));
        assert!(shown.contains("auto download: true"));
    }

    #[tokio::test]
    async fn test_create_requires_init() {
        let temp = tempfile::TempDir::new().unwrap();
        let ctx = crate::cli::op::OpContext::new(Some(temp.path().join("nothing")));
        assert!(matches!(
            create("x").execute(&ctx).await,
            Err(CreateError::State(_))
        ));
    }
}
