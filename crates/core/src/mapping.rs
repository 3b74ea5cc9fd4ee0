use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::CoreError;

/// One configured mapping between a stable internal field name and the
/// opaque identifier the CRM assigned to the matching custom field.
/// External identifiers are regenerated per deployment, so these entries
/// come from configuration rather than code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    pub kind: EntityKind,
    pub internal: String,
    pub external: String,
}

#[derive(Debug, Default)]
struct TwoWay {
    to_external: HashMap<String, String>,
    to_internal: HashMap<String, String>,
}

/// Two-way field-name table, one per entity kind, built once at load.
/// Lookups are O(1); unknown external keys resolve to None and are ignored
/// by callers rather than treated as errors.
#[derive(Debug, Default)]
pub struct FieldMappingRegistry {
    by_kind: HashMap<EntityKind, TwoWay>,
}

impl FieldMappingRegistry {
    pub fn new(entries: &[MappingEntry]) -> Self {
        let mut by_kind: HashMap<EntityKind, TwoWay> = HashMap::new();
        for entry in entries {
            let table = by_kind.entry(entry.kind).or_default();
            table
                .to_external
                .insert(entry.internal.clone(), entry.external.clone());
            table
                .to_internal
                .insert(entry.external.clone(), entry.internal.clone());
        }
        Self { by_kind }
    }

    pub fn from_json(config: &str) -> Result<Self, CoreError> {
        let entries: Vec<MappingEntry> = serde_json::from_str(config)?;
        Ok(Self::new(&entries))
    }

    /// Replace the whole registry. Field identifiers are remapped per
    /// deployment, so this must work without a process restart.
    pub fn reload(&mut self, entries: &[MappingEntry]) {
        *self = Self::new(entries);
    }

    pub fn external_key(&self, kind: EntityKind, internal: &str) -> Option<&str> {
        self.by_kind
            .get(&kind)
            .and_then(|t| t.to_external.get(internal))
            .map(String::as_str)
    }

    pub fn internal_field(&self, kind: EntityKind, external: &str) -> Option<&str> {
        self.by_kind
            .get(&kind)
            .and_then(|t| t.to_internal.get(external))
            .map(String::as_str)
    }

    /// The internal names mapped for a kind, used when projecting outward.
    pub fn internal_fields(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flat_map(|t| t.to_external.keys().map(String::as_str))
    }
}
