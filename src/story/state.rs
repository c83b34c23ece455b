//! World state model
//!
//! The world state is the structured game state (location, inventory,
//! flags, relationships) injected once into every compiled prompt. It is
//! persisted as JSON alongside the session; loads must always produce a
//! value with all four fields present, no matter how partial or corrupt
//! the stored payload is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Location assigned to freshly created sessions
pub const DEFAULT_LOCATION: &str = "starting_area";

/// Structured game state carried by every session
///
/// Maps are ordered (`BTreeMap`) so that `format()` is deterministic for
/// identical contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Current location of the player
    #[serde(default = "default_location")]
    pub location: String,

    /// Items held, duplicates allowed, insertion-ordered
    #[serde(default)]
    pub inventory: Vec<String>,

    /// Story flags, scalar-valued
    #[serde(default)]
    pub flags: BTreeMap<String, Value>,

    /// NPC relationships, scalar-valued
    #[serde(default)]
    pub relationships: BTreeMap<String, Value>,
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            location: default_location(),
            inventory: Vec::new(),
            flags: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }
}

impl WorldState {
    /// Build a world state from an arbitrary JSON value, never failing
    ///
    /// Each of the four fields is taken from the payload when present and
    /// well-typed; anything absent or of the wrong shape falls back to that
    /// field's default. Non-object payloads yield the full default state.
    pub fn from_json(value: &Value) -> Self {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return Self::default(),
        };

        let location = obj
            .get("location")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(default_location);

        let inventory = obj
            .get("inventory")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let flags = obj
            .get("flags")
            .and_then(Value::as_object)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let relationships = obj
            .get("relationships")
            .and_then(Value::as_object)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Self {
            location,
            inventory,
            flags,
            relationships,
        }
    }

    /// Parse a persisted JSON string, substituting defaults on any failure
    pub fn from_json_str(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_json(&value),
            Err(e) => {
                tracing::warn!("Malformed persisted world state, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Render the state as the prompt block injected after the system turn
    ///
    /// Deterministic for identical contents: inventory keeps insertion
    /// order, maps iterate in key order.
    pub fn format(&self) -> String {
        let inv_txt = if self.inventory.is_empty() {
            "(empty)".to_string()
        } else {
            self.inventory.join(", ")
        };

        let flags_txt = if self.flags.is_empty() {
            "(none)".to_string()
        } else {
            self.flags
                .iter()
                .map(|(k, v)| format!("{}={}", k, scalar_text(v)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let rel_txt = if self.relationships.is_empty() {
            "(none)".to_string()
        } else {
            self.relationships
                .iter()
                .map(|(k, v)| format!("{}:{}", k, scalar_text(v)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "WORLD STATE (authoritative)\n- inventory: {}\n- flags: {}\n- relationships: {}",
            inv_txt, flags_txt, rel_txt
        )
    }
}

/// Render a scalar JSON value without surrounding quotes
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
