use std::{fs, path::PathBuf};

use common::config::{DiscoveryConfig, RegistryConfig, SchedulerConfig};
use common::prelude::{Registry, SecretKey};
use common::registry::{RegistryError, CONFIG_FILE_NAME as SUBSCRIPTIONS_FILE_NAME};
use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "subs";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "key.pem";

/// Contents of `config.toml`
///
/// Services left unset are simply not used: polling and envelope fetches fail
/// with an error until a url is configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Endpoint that runs subscription searches
    #[serde(default)]
    pub search_url: Option<Url>,
    /// Transfer service that stores downloaded content and serves it by content id
    #[serde(default)]
    pub transfer_url: Option<Url>,
    /// Directory consulted before the DHT for subscription versions
    #[serde(default)]
    pub directory_url: Option<Url>,
    /// Gateway node through which subscriptions are gossiped on the DHT
    #[serde(default)]
    pub dht_url: Option<Url>,
    /// Apply verified upgrades without asking
    #[serde(default)]
    pub auto_upgrade: bool,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.subs)
    pub subs_dir: PathBuf,
    /// Path to the node key PEM file
    pub key_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.subs)
    pub fn subs_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let subs_dir = Self::subs_dir(custom_path)?;

        if subs_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&subs_dir)?;

        // Generate and save key
        let key = SecretKey::generate().map_err(|e| StateError::InvalidKey(e.to_string()))?;
        let key_path = subs_dir.join(KEY_FILE_NAME);
        fs::write(&key_path, key.to_pem())?;

        let config = config.unwrap_or_default();
        let config_path = subs_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        Ok(Self {
            subs_dir,
            key_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let subs_dir = Self::subs_dir(custom_path)?;

        if !subs_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = subs_dir.join(KEY_FILE_NAME);
        let config_path = subs_dir.join(CONFIG_FILE_NAME);

        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            subs_dir,
            key_path,
            config_path,
            config,
        })
    }

    /// Load the secret key from the key file
    pub fn load_key(&self) -> Result<SecretKey, StateError> {
        let pem = fs::read_to_string(&self.key_path)?;
        let key = SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        Ok(key)
    }

    /// Path of the persisted subscription list
    pub fn subscriptions_path(&self) -> PathBuf {
        self.subs_dir.join(SUBSCRIPTIONS_FILE_NAME)
    }

    /// Open the subscription registry kept in the state directory
    pub async fn load_registry(&self) -> Result<Registry, StateError> {
        let registry = Registry::load(&self.subs_dir, self.config.registry.clone()).await?;
        Ok(registry)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("subs directory not initialized. Run 'subs init' first")]
    NotInitialized,

    #[error("subs directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
