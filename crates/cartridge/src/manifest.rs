//! Cartridge manifests: the actions an integration exposes.

use arbiter_core::risk::BaseRisk;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One action an integration exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Namespaced action type, e.g. `ads.campaign.pause`.
    pub action_type: String,
    /// Display name.
    pub name: String,
    /// Operator-facing description.
    pub description: String,
    /// Draft-7 JSON schema for the action's parameters.
    pub parameters_schema: JsonValue,
    /// Inherent risk before exposure is considered.
    pub base_risk_category: BaseRisk,
    /// Whether executions return an undo recipe.
    pub reversible: bool,
}

/// Static description of a cartridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartridgeManifest {
    /// Registry id, e.g. `ads-spend`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Semver version; upgrades must be monotonic.
    pub version: String,
    /// Exposed actions.
    pub actions: Vec<ActionSpec>,
    /// Connection names the cartridge requires at initialize time.
    pub required_connections: Vec<String>,
}

impl CartridgeManifest {
    /// Look up an action by type.
    pub fn action(&self, action_type: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.action_type == action_type)
    }

    /// The namespace prefix shared by this cartridge's actions
    /// (`ads` for `ads.campaign.pause`), used for cartridge inference.
    pub fn action_prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = self
            .actions
            .iter()
            .filter_map(|a| a.action_type.split('.').next())
            .collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        prefixes
    }
}
