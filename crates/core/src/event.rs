use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::entity::EntityKind;
use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::mapping::FieldMappingRegistry;

/// Internal field name carrying the back-reference the CRM stores for us.
pub const BACK_REF_FIELD: &str = "internal_id";

#[derive(Debug, Clone, Deserialize)]
pub struct CrmEventMeta {
    pub action: String,
    pub entity: String,
}

/// One CRM webhook delivery. `data == None` signals deletion; `previous`
/// is the CRM's snapshot of the record before the change.
#[derive(Debug, Clone, Deserialize)]
pub struct CrmEvent {
    pub meta: CrmEventMeta,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub previous: Option<Value>,
}

impl CrmEvent {
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::parse(&self.meta.entity)
    }

    pub fn is_deletion(&self) -> bool {
        self.data.is_none()
    }
}

/// The back-reference field of an upsert payload. The CRM reports entity
/// merges by concatenating every absorbed record's back-reference into one
/// comma-separated value; the first id is the surviving record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackRef {
    None,
    One(i64),
    Merged { winner: i64, losers: Vec<i64> },
}

impl BackRef {
    pub fn parse(value: &FieldValue) -> Result<Self, CoreError> {
        match value {
            FieldValue::Null => Ok(BackRef::None),
            FieldValue::Integer(id) => Ok(BackRef::One(*id)),
            FieldValue::Text(s) if s.trim().is_empty() => Ok(BackRef::None),
            FieldValue::Text(s) => {
                let mut ids = Vec::new();
                for part in s.split(',') {
                    let part = part.trim();
                    let id: i64 = part.parse().map_err(|_| {
                        CoreError::InvalidPayload(format!("malformed back-reference: {s:?}"))
                    })?;
                    ids.push(id);
                }
                match ids.as_slice() {
                    [] => Ok(BackRef::None),
                    [one] => Ok(BackRef::One(*one)),
                    [winner, losers @ ..] => Ok(BackRef::Merged {
                        winner: *winner,
                        losers: losers.to_vec(),
                    }),
                }
            }
            other => Err(CoreError::InvalidPayload(format!(
                "back-reference must be an id or id list, got {other:?}"
            ))),
        }
    }

    pub fn winner(&self) -> Option<i64> {
        match self {
            BackRef::None => None,
            BackRef::One(id) => Some(*id),
            BackRef::Merged { winner, .. } => Some(*winner),
        }
    }
}

/// A CRM payload normalized to a single flat map of internal field names.
/// Both wire shapes (top-level fields and the nested `custom_fields` map of
/// `{external_key: {value: ...}}`) end up identical here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRecord {
    pub fields: BTreeMap<String, FieldValue>,
}

impl FlatRecord {
    pub fn normalize(
        kind: EntityKind,
        payload: &Value,
        registry: &FieldMappingRegistry,
    ) -> Result<Self, CoreError> {
        let obj = payload.as_object().ok_or_else(|| {
            CoreError::InvalidPayload(format!("{} payload is not an object", kind.as_str()))
        })?;

        let mut fields = BTreeMap::new();
        for (key, value) in obj {
            if key == "custom_fields" {
                let Some(custom) = value.as_object() else {
                    continue;
                };
                for (external, wrapped) in custom {
                    // Unknown external keys are ignored: field identifiers
                    // drift across deployments and stale ones still arrive.
                    let Some(internal) = registry.internal_field(kind, external) else {
                        continue;
                    };
                    let inner = wrapped.get("value").unwrap_or(wrapped);
                    fields.insert(internal.to_string(), FieldValue::from_json(inner));
                }
            } else if let Some(internal) = registry.internal_field(kind, key) {
                // Flattened deliveries carry the external key at top level.
                fields.insert(internal.to_string(), FieldValue::from_json(value));
            } else {
                fields.insert(key.clone(), FieldValue::from_json(value));
            }
        }
        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_integer)
    }

    /// Non-empty text, treating Null and "" the same way.
    pub fn non_empty_text(&self, name: &str) -> Option<&str> {
        self.text(name).filter(|s| !s.is_empty())
    }

    pub fn back_ref(&self) -> Result<BackRef, CoreError> {
        match self.get(BACK_REF_FIELD) {
            None => Ok(BackRef::None),
            Some(v) => BackRef::parse(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;
    use serde_json::json;

    fn org_registry() -> FieldMappingRegistry {
        FieldMappingRegistry::new(&[
            MappingEntry {
                kind: EntityKind::Organization,
                internal: BACK_REF_FIELD.into(),
                external: "7f8959760703808f".into(),
            },
            MappingEntry {
                kind: EntityKind::Organization,
                internal: "website".into(),
                external: "770b2fee9c89906b".into(),
            },
        ])
    }

    #[test]
    fn nested_and_flat_payloads_normalize_identically() {
        let reg = org_registry();
        let nested = json!({
            "id": 77,
            "name": "Acme",
            "custom_fields": {
                "7f8959760703808f": {"value": 42},
                "770b2fee9c89906b": {"value": "acme.example"},
                "unknown_key_ffff": {"value": "dropped"}
            }
        });
        let flat = json!({
            "id": 77,
            "name": "Acme",
            "7f8959760703808f": 42,
            "770b2fee9c89906b": "acme.example"
        });
        let a = FlatRecord::normalize(EntityKind::Organization, &nested, &reg).unwrap();
        let b = FlatRecord::normalize(EntityKind::Organization, &flat, &reg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.integer("internal_id"), Some(42));
        assert_eq!(a.text("website"), Some("acme.example"));
        assert_eq!(a.get("unknown_key_ffff"), None);
    }

    #[test]
    fn back_ref_single_and_merged() {
        let mut rec = FlatRecord::default();
        rec.fields
            .insert(BACK_REF_FIELD.into(), FieldValue::Integer(42));
        assert_eq!(rec.back_ref().unwrap(), BackRef::One(42));

        rec.fields
            .insert(BACK_REF_FIELD.into(), FieldValue::Text("7, 12, 9".into()));
        assert_eq!(
            rec.back_ref().unwrap(),
            BackRef::Merged {
                winner: 7,
                losers: vec![12, 9]
            }
        );
    }

    #[test]
    fn back_ref_blank_is_none() {
        let mut rec = FlatRecord::default();
        rec.fields
            .insert(BACK_REF_FIELD.into(), FieldValue::Text("  ".into()));
        assert_eq!(rec.back_ref().unwrap(), BackRef::None);
        let empty = FlatRecord::default();
        assert_eq!(empty.back_ref().unwrap(), BackRef::None);
    }

    #[test]
    fn malformed_back_ref_is_an_error() {
        let mut rec = FlatRecord::default();
        rec.fields
            .insert(BACK_REF_FIELD.into(), FieldValue::Text("12,oops".into()));
        assert!(rec.back_ref().is_err());
    }

    #[test]
    fn deletion_event_has_no_data() {
        let ev = CrmEvent::from_json(
            r#"{"meta": {"action": "deleted", "entity": "organization"},
                "data": null,
                "previous": {"id": 999}}"#,
        )
        .unwrap();
        assert!(ev.is_deletion());
        assert_eq!(ev.kind(), Some(EntityKind::Organization));
    }
}
