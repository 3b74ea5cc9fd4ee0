//! Inbound normalization, field mapping, and resolver behavior driven
//! through real webhook payloads.

use crosslink_core::{EntityKind, RemoteId};
use crosslink_engine::Outcome;
use crosslink_harness::TestRig;
use crosslink_storage::{Company, Store};

#[test]
fn organization_created_from_webhook() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let outcome = rig.crm_event(
        r#"{
            "meta": {"action": "updated", "entity": "organization"},
            "data": {
                "id": 501,
                "name": "Acme Tutors",
                "address_country": "GB",
                "custom_fields": {
                    "5e1a7c33f09d21c8": {"value": "acme.example"}
                }
            }
        }"#,
    )?;

    let Outcome::Created(EntityKind::Organization, id) = outcome else {
        panic!("expected creation, got {outcome:?}");
    };
    let company = rig
        .store
        .company_by_crm_id(RemoteId::new(501))?
        .expect("company stored");
    assert_eq!(company.id.raw(), id);
    assert_eq!(company.name, "Acme Tutors");
    assert_eq!(company.country.as_deref(), Some("GB"));
    assert_eq!(company.website.as_deref(), Some("acme.example"));
    assert!(!company.is_deleted);
    Ok(())
}

#[test]
fn nested_and_flat_custom_fields_apply_identically() -> Result<(), Box<dyn std::error::Error>> {
    let nested = r#"{
        "meta": {"action": "updated", "entity": "organization"},
        "data": {
            "id": 7,
            "name": "Same Co",
            "custom_fields": {"5e1a7c33f09d21c8": {"value": "same.example"}}
        }
    }"#;
    let flat = r#"{
        "meta": {"action": "updated", "entity": "organization"},
        "data": {
            "id": 7,
            "name": "Same Co",
            "5e1a7c33f09d21c8": "same.example"
        }
    }"#;

    let mut a = TestRig::new();
    a.crm_event(nested)?;
    let mut b = TestRig::new();
    b.crm_event(flat)?;

    let ca = a.store.company_by_crm_id(RemoteId::new(7))?.unwrap();
    let cb = b.store.company_by_crm_id(RemoteId::new(7))?.unwrap();
    assert_eq!(ca.name, cb.name);
    assert_eq!(ca.website, cb.website);
    Ok(())
}

#[test]
fn back_reference_wins_over_other_candidates() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let existing = rig.seed_company("Original Name");
    // Another company whose name matches the payload exactly.
    rig.seed_company("Renamed Co");

    let outcome = rig.crm_event(&format!(
        r#"{{
            "meta": {{"action": "updated", "entity": "organization"}},
            "data": {{
                "id": 601,
                "name": "Renamed Co",
                "custom_fields": {{"9f2b6c0d8a1e44b7": {{"value": {}}}}}
            }}
        }}"#,
        existing.raw()
    ))?;

    assert_eq!(outcome, Outcome::Updated(EntityKind::Organization, existing.raw()));
    let company = rig.company(existing);
    assert_eq!(company.crm_org_id, Some(RemoteId::new(601)));
    assert_eq!(company.name, "Renamed Co");
    Ok(())
}

#[test]
fn organization_owner_mapped_from_crm_user() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let admin = rig.seed_admin(55, 777);
    rig.crm_event(
        r#"{
            "meta": {"action": "added", "entity": "organization"},
            "data": {"id": 88, "name": "Owned Co", "owner_id": 777}
        }"#,
    )?;
    let company = rig.store.company_by_crm_id(RemoteId::new(88))?.unwrap();
    assert_eq!(company.sales_person_id, Some(admin));
    Ok(())
}

#[test]
fn person_resolved_by_email_within_organization() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let mut company = Company::new("Acme");
    company.crm_org_id = Some(RemoteId::new(9));
    let company_id = rig.store.insert_company(&company)?;
    let mut contact = crosslink_storage::Contact::new(company_id, "Reed");
    contact.email = Some("pat@acme.example".into());
    let contact_id = rig.store.insert_contact(&contact)?;

    let outcome = rig.crm_event(
        r#"{
            "meta": {"action": "updated", "entity": "person"},
            "data": {
                "id": 3001,
                "org_id": 9,
                "name": "Pat Reed",
                "email": "pat@acme.example",
                "phone": "+44 20 555"
            }
        }"#,
    )?;

    assert_eq!(outcome, Outcome::Updated(EntityKind::Person, contact_id.raw()));
    let contact = rig.store.get_contact(contact_id)?.unwrap();
    assert_eq!(contact.crm_person_id, Some(RemoteId::new(3001)));
    assert_eq!(contact.first_name.as_deref(), Some("Pat"));
    assert_eq!(contact.phone.as_deref(), Some("+44 20 555"));
    Ok(())
}

#[test]
fn registry_reload_swaps_field_identifiers() -> Result<(), Box<dyn std::error::Error>> {
    use crosslink_core::MappingEntry;

    let mut rig = TestRig::new();
    rig.recon.registry_mut().reload(&[MappingEntry {
        kind: EntityKind::Organization,
        internal: "website".into(),
        external: "freshkey00".into(),
    }]);

    rig.crm_event(
        r#"{
            "meta": {"action": "updated", "entity": "organization"},
            "data": {
                "id": 11,
                "name": "Rekeyed",
                "custom_fields": {
                    "freshkey00": {"value": "rekeyed.example"},
                    "5e1a7c33f09d21c8": {"value": "stale-key-dropped"}
                }
            }
        }"#,
    )?;

    let company = rig.store.company_by_crm_id(RemoteId::new(11))?.unwrap();
    assert_eq!(company.website.as_deref(), Some("rekeyed.example"));
    Ok(())
}

#[test]
fn unknown_entity_kind_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let outcome = rig.crm_event(
        r#"{"meta": {"action": "updated", "entity": "note"}, "data": {"id": 1}}"#,
    )?;
    assert!(matches!(outcome, Outcome::Ignored(_)));
    Ok(())
}
