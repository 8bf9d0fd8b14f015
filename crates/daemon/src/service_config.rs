use std::path::PathBuf;

use common::prelude::SecretKey;

use crate::state::AppConfig;

#[derive(Debug)]
pub struct Config {
    /// Path to the state directory holding the registry and results
    pub subs_dir: PathBuf,
    /// Node key; its public key names this node on the DHT.
    ///  if not set then a new secret will be generated
    pub node_secret: Option<SecretKey>,

    /// Service urls and the registry, scheduler and discovery tunables
    pub app: AppConfig,
    /// Gossip on a process-local DHT instead of the configured gateway
    pub offline: bool,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}
