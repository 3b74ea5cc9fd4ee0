pub mod entity;
pub mod error;
pub mod event;
pub mod field_value;
pub mod ids;
pub mod mapping;

pub use entity::{BillingStatus, DealStatus, EntityKind, PricePlan};
pub use error::CoreError;
pub use event::{BackRef, CrmEvent, CrmEventMeta, FlatRecord};
pub use field_value::FieldValue;
pub use ids::*;
pub use mapping::{FieldMappingRegistry, MappingEntry};
