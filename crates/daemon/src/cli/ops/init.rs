use clap::Args;
use url::Url;

use subs_daemon::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Search service endpoint subscriptions are polled through
    #[arg(long)]
    pub search_url: Option<Url>,

    /// Transfer service that stores downloaded results and serves envelopes
    #[arg(long)]
    pub transfer_url: Option<Url>,

    /// Subscription directory consulted before the DHT
    #[arg(long)]
    pub directory_url: Option<Url>,

    /// DHT gateway node subscriptions are gossiped through
    #[arg(long)]
    pub dht_url: Option<Url>,

    /// Apply verified subscription upgrades without asking
    #[arg(long)]
    pub auto_upgrade: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] subs_daemon::state::StateError),
}

fn describe(url: &Option<Url>) -> String {
    match url {
        Some(url) => url.to_string(),
        None => "not configured".to_string(),
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            search_url: self.search_url.clone(),
            transfer_url: self.transfer_url.clone(),
            directory_url: self.directory_url.clone(),
            dht_url: self.dht_url.clone(),
            auto_upgrade: self.auto_upgrade,
            ..AppConfig::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized subs directory at: {}\n\
             - Key: {}\n\
             - Config: {}\n\
             - Subscriptions: {}\n\
             - Search service: {}\n\
             - Transfer service: {}\n\
             - Directory: {}\n\
             - DHT gateway: {}",
            state.subs_dir.display(),
            state.key_path.display(),
            state.config_path.display(),
            state.subscriptions_path().display(),
            describe(&state.config.search_url),
            describe(&state.config.transfer_url),
            describe(&state.config.directory_url),
            describe(&state.config.dht_url),
        );

        Ok(output)
    }
}
