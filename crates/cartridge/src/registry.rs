//! Cartridge registry: name → instance with semver-monotonic upgrades,
//! change notification, and manifest-driven parameter validation.

use crate::contract::{Cartridge, CartridgeError};
use dashmap::DashMap;
use jsonschema::{Draft, JSONSchema};
use semver::Version;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::info;

/// Registration and inference errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Manifest version is not valid semver.
    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),
    /// Re-registration with a non-greater version (pre-release < release).
    #[error("non-monotonic upgrade for '{id}': {existing} -> {offered}")]
    NonMonotonicUpgrade {
        /// Cartridge id being re-registered.
        id: String,
        /// Version already registered.
        existing: String,
        /// Version offered.
        offered: String,
    },
    /// No registered cartridge serves the action prefix.
    #[error("no cartridge serves action prefix '{0}'")]
    NoMatch(String),
    /// More than one cartridge serves the action prefix.
    #[error("cannot infer cartridge: prefix '{0}' is ambiguous")]
    Ambiguous(String),
}

type ChangeListener = Box<dyn Fn(&str) + Send + Sync>;

/// Process-wide cartridge registry. Mutated only at bootstrap or by explicit
/// admin register/unregister; readers take snapshots.
#[derive(Default)]
pub struct CartridgeRegistry {
    entries: DashMap<String, Arc<dyn Cartridge>>,
    schemas: DashMap<(String, String), Arc<JSONSchema>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl CartridgeRegistry {
    /// Fresh empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or upgrade a cartridge. Upgrades must be semver-monotonic;
    /// pre-releases sort below their release per semver ordering.
    pub fn register(&self, cartridge: Arc<dyn Cartridge>) -> Result<(), RegistryError> {
        let manifest = cartridge.manifest();
        let id = manifest.id.clone();
        let offered = Version::parse(&manifest.version).map_err(|e| {
            RegistryError::InvalidVersion(manifest.version.clone(), e.to_string())
        })?;
        if let Some(existing) = self.entries.get(&id) {
            let current = Version::parse(&existing.manifest().version).map_err(|e| {
                RegistryError::InvalidVersion(existing.manifest().version.clone(), e.to_string())
            })?;
            if offered <= current {
                return Err(RegistryError::NonMonotonicUpgrade {
                    id,
                    existing: current.to_string(),
                    offered: offered.to_string(),
                });
            }
        }
        // Compile parameter schemas up front; invalid ones surface at
        // validation time rather than blocking registration.
        for action in &manifest.actions {
            if let Ok(schema) = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&action.parameters_schema)
            {
                self.schemas.insert((id.clone(), action.action_type.clone()), Arc::new(schema));
            }
        }
        info!(cartridge = %id, version = %manifest.version, "cartridge registered");
        self.entries.insert(id.clone(), cartridge);
        self.notify(&id);
        Ok(())
    }

    /// Remove a cartridge. Returns whether one was present.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.schemas.retain(|(cid, _), _| cid != id);
            self.notify(id);
        }
        removed
    }

    /// Look up a cartridge by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Cartridge>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of registered ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Subscribe to register/unregister events (policy-cache invalidation).
    pub fn subscribe(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.write().expect("listener lock poisoned").push(Box::new(listener));
    }

    fn notify(&self, id: &str) {
        for listener in self.listeners.read().expect("listener lock poisoned").iter() {
            listener(id);
        }
    }

    /// Infer the cartridge serving `action_type` by its namespace prefix.
    /// Exactly one match is required.
    pub fn infer_for_action(&self, action_type: &str) -> Result<String, RegistryError> {
        let prefix = action_type.split('.').next().unwrap_or(action_type);
        let mut matches: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().manifest().action_prefixes().contains(&prefix))
            .map(|e| e.key().clone())
            .collect();
        matches.sort();
        match matches.len() {
            0 => Err(RegistryError::NoMatch(prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(RegistryError::Ambiguous(prefix.to_string())),
        }
    }

    /// Validate parameters against the manifest schema for an action.
    /// Unknown actions fail; actions without a compiled schema pass.
    pub fn validate_parameters(
        &self,
        cartridge_id: &str,
        action_type: &str,
        parameters: &serde_json::Value,
    ) -> Result<(), CartridgeError> {
        let cartridge = self
            .get(cartridge_id)
            .ok_or_else(|| CartridgeError::Unavailable(cartridge_id.to_string()))?;
        if cartridge.manifest().action(action_type).is_none() {
            return Err(CartridgeError::UnknownAction(action_type.to_string()));
        }
        if let Some(schema) = self.schemas.get(&(cartridge_id.to_string(), action_type.to_string()))
        {
            if let Err(errors) = schema.validate(parameters) {
                let msg = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                return Err(CartridgeError::InvalidParameters(msg));
            }
        }
        Ok(())
    }
}
