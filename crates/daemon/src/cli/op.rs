use std::error::Error;
use std::path::PathBuf;

use common::prelude::{Registry, Subscription};

use subs_daemon::service_state::StateSetupError;
use subs_daemon::state::{AppState, StateError};
use subs_daemon::{ServiceConfig, ServiceState};

#[derive(Clone)]
pub struct OpContext {
    /// Optional custom state directory (defaults to ~/.subs)
    pub config_path: Option<PathBuf>,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    pub fn state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_path.clone())
    }

    /// Open the registry of the state directory
    pub async fn registry(&self) -> Result<Registry, StateError> {
        self.state()?.load_registry().await
    }

    /// Registry, discovery and scheduler wired up as the daemon does it,
    /// without starting any of its background tasks
    pub async fn service(&self, offline: bool) -> Result<ServiceState, ServiceError> {
        let state = self.state()?;
        let config = ServiceConfig {
            subs_dir: state.subs_dir.clone(),
            node_secret: Some(state.load_key()?),
            app: state.config.clone(),
            offline,
            log_level: tracing::Level::WARN,
            log_dir: None,
        };
        Ok(ServiceState::from_config(&config).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("service setup failed: {0}")]
    Setup(#[from] StateSetupError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no subscription matches {0}")]
    NotFound(String),
    #[error("{0} matches more than one subscription")]
    Ambiguous(String),
}

/// Find a subscription by id, unique id prefix or exact name
pub fn resolve_subscription(registry: &Registry, needle: &str) -> Result<Subscription, ResolveError> {
    if let Some(sub) = registry.get(needle) {
        return Ok(sub);
    }

    let all = registry.subscriptions(false);
    let mut matches = all
        .iter()
        .filter(|s| s.id().starts_with(needle) || s.name() == needle);
    match (matches.next(), matches.next()) {
        (Some(sub), None) => Ok(sub.clone()),
        (None, _) => Err(ResolveError::NotFound(needle.to_string())),
        (Some(_), Some(_)) => Err(ResolveError::Ambiguous(needle.to_string())),
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::RegistryConfig;
    use common::prelude::Query;

    async fn registry_with(names: &[&str]) -> (tempfile::TempDir, Registry) {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = Registry::load(temp.path(), RegistryConfig::default())
            .await
            .unwrap();
        for name in names {
            let payload = Query::new("web").to_payload().unwrap();
            registry.create(name, false, false, payload).unwrap();
        }
        (temp, registry)
    }

    #[tokio::test]
    async fn test_resolve_by_id_prefix_and_name() {
        let (_temp, registry) = registry_with(&["alpha", "beta"]).await;
        let alpha = registry
            .subscriptions(false)
            .into_iter()
            .find(|s| s.name() == "alpha")
            .unwrap();

        assert_eq!(resolve_subscription(&registry, alpha.id()).unwrap().id(), alpha.id());
        assert_eq!(
            resolve_subscription(&registry, &alpha.id()[..12]).unwrap().id(),
            alpha.id()
        );
        assert_eq!(resolve_subscription(&registry, "alpha").unwrap().id(), alpha.id());
        assert!(matches!(
            resolve_subscription(&registry, "gamma"),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_name() {
        let (_temp, registry) = registry_with(&["same", "same"]).await;
        assert!(matches!(
            resolve_subscription(&registry, "same"),
            Err(ResolveError::Ambiguous(_))
        ));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::OpContext;
    use subs_daemon::state::AppState;

    /// A context over a freshly initialized state directory
    pub fn context() -> (tempfile::TempDir, OpContext) {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("subs");
        AppState::init(Some(dir.clone()), None).unwrap();
        (temp, OpContext::new(Some(dir)))
    }
}
