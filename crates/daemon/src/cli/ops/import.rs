use std::path::PathBuf;

use clap::Args;

use common::prelude::RegistryError;

#[derive(Args, Debug, Clone)]
pub struct Import {
    /// Subscription document written by `subs export`
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("state error: {0}")]
    State(#[from] subs_daemon::state::StateError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Import {
    type Error = ImportError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let registry = ctx.registry().await?;
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| ImportError::Read(self.path.clone(), e))?;

        let sub = registry.import_document(&data)?;
        registry.save_config().await?;

        Ok(format!(
            "Imported {} v{} ({})",
            sub.name(),
            sub.version(),
            sub.id()
        ))
    }
}
