use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use super::association::Association;
use super::history::History;

/// How an entity came to exist locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddType {
    /// Authored here
    Create,
    /// Loaded from an envelope someone handed us
    Import,
    /// Discovered through the network
    Lookup,
}

/// Persisted form of one subscription in the registry config file
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Encoded envelope document
    #[serde_as(as = "Hex")]
    pub envelope: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub add_type: AddType,
    pub add_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    pub subscribed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u64>,
    #[serde(default)]
    pub last_auto_upgrade_check: i64,
    #[serde(default)]
    pub highest_prompted_version: u32,
    #[serde(default)]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub history: History,
}
