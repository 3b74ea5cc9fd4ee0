//! Reconciliation state machine: replay, merges, soft deletion and healing,
//! cascades, and per-event isolation.

use crosslink_core::{DealStatus, EntityKind, RemoteId};
use crosslink_engine::Outcome;
use crosslink_harness::TestRig;
use crosslink_storage::{Company, Store};

#[test]
fn upsert_replay_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let event = r#"{
        "meta": {"action": "updated", "entity": "organization"},
        "data": {"id": 42, "name": "Replayed Co", "address_country": "FR"}
    }"#;

    let first = rig.crm_event(event)?;
    let second = rig.crm_event(event)?;

    let Outcome::Created(EntityKind::Organization, id) = first else {
        panic!("expected creation, got {first:?}");
    };
    assert_eq!(second, Outcome::Updated(EntityKind::Organization, id));
    // Exactly one row; the replay found it by crm id rather than duplicating.
    assert!(rig.store.company_by_crm_id(RemoteId::new(42))?.is_some());
    assert!(rig.store.company_by_name_ci("replayed co")?.is_some());
    Ok(())
}

#[test]
fn merge_converges_and_replays_cleanly() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let mut ids = Vec::new();
    for (i, name) in ["Winner Co", "Loser One", "Loser Two"].iter().enumerate() {
        let mut company = Company::new(*name);
        company.crm_org_id = Some(RemoteId::new(200 + i as i64));
        ids.push(rig.store.insert_company(&company)?);
    }

    let event = format!(
        r#"{{
            "meta": {{"action": "updated", "entity": "organization"}},
            "data": {{
                "id": 200,
                "name": "Winner Co",
                "custom_fields": {{
                    "9f2b6c0d8a1e44b7": {{"value": "{}, {}, {}"}}
                }}
            }}
        }}"#,
        ids[0].raw(),
        ids[1].raw(),
        ids[2].raw()
    );

    rig.crm_event(&event)?;
    rig.crm_event(&event)?; // replay

    let winner = rig.company(ids[0]);
    assert_eq!(winner.crm_org_id, Some(RemoteId::new(200)));
    assert!(!winner.is_deleted);
    for loser in &ids[1..] {
        let company = rig.company(*loser);
        assert_eq!(company.crm_org_id, None, "loser keeps no external id");
        assert!(company.is_deleted);
    }
    Ok(())
}

#[test]
fn deletion_then_healing_upsert() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let mut company = Company::new("Phoenix Co");
    company.crm_org_id = Some(RemoteId::new(999));
    let id = rig.store.insert_company(&company)?;

    // Deletion for crm id 999 carrying our back-reference in `previous`.
    let outcome = rig.crm_event(&format!(
        r#"{{
            "meta": {{"action": "deleted", "entity": "organization"}},
            "data": null,
            "previous": {{
                "id": 999,
                "custom_fields": {{"9f2b6c0d8a1e44b7": {{"value": {}}}}}
            }}
        }}"#,
        id.raw()
    ))?;
    assert_eq!(outcome, Outcome::Deleted(EntityKind::Organization, id.raw()));
    let deleted = rig.company(id);
    assert_eq!(deleted.crm_org_id, None);
    assert!(deleted.is_deleted);

    // A later upsert under a new crm id heals the record in place.
    let outcome = rig.crm_event(&format!(
        r#"{{
            "meta": {{"action": "added", "entity": "organization"}},
            "data": {{
                "id": 1000,
                "name": "Phoenix Co",
                "custom_fields": {{"9f2b6c0d8a1e44b7": {{"value": {}}}}}
            }}
        }}"#,
        id.raw()
    ))?;
    assert_eq!(outcome, Outcome::Updated(EntityKind::Organization, id.raw()));
    let healed = rig.company(id);
    assert_eq!(healed.crm_org_id, Some(RemoteId::new(1000)));
    assert!(!healed.is_deleted, "upsert heals the deleted flag");
    Ok(())
}

#[test]
fn deletion_for_unknown_record_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let outcome = rig.crm_event(
        r#"{
            "meta": {"action": "deleted", "entity": "organization"},
            "data": null,
            "previous": {"id": 12345}
        }"#,
    )?;
    assert!(matches!(outcome, Outcome::Ignored(_)));
    Ok(())
}

#[test]
fn pipeline_and_stage_deletions_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let (pipeline, stage) = rig.seed_pipeline(10, 20);

    for entity in ["pipeline", "stage"] {
        let outcome = rig.crm_event(&format!(
            r#"{{
                "meta": {{"action": "deleted", "entity": "{entity}"}},
                "data": null,
                "previous": {{"id": 10}}
            }}"#
        ))?;
        assert!(matches!(outcome, Outcome::Ignored(_)));
    }
    assert!(rig.store.get_pipeline(pipeline)?.is_some());
    assert!(rig.store.get_stage(stage)?.is_some());
    Ok(())
}

#[test]
fn pipeline_upsert_creates_then_renames() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    rig.crm_event(
        r#"{"meta": {"action": "added", "entity": "pipeline"},
            "data": {"id": 30, "name": "Inbound"}}"#,
    )?;
    rig.crm_event(
        r#"{"meta": {"action": "updated", "entity": "pipeline"},
            "data": {"id": 30, "name": "Inbound EMEA"}}"#,
    )?;
    let pipeline = rig.store.pipeline_by_crm_id(RemoteId::new(30))?.unwrap();
    assert_eq!(pipeline.name, "Inbound EMEA");
    Ok(())
}

#[test]
fn unknown_pipeline_skips_deal_but_not_siblings() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let mut company = Company::new("Sibling Co");
    company.crm_org_id = Some(RemoteId::new(70));
    rig.store.insert_company(&company)?;

    let outcomes = rig.crm_batch(&[
        r#"{"meta": {"action": "updated", "entity": "deal"},
            "data": {"id": 900, "title": "Doomed", "org_id": 70,
                     "pipeline_id": 404, "stage_id": 405}}"#,
        r#"{"meta": {"action": "updated", "entity": "organization"},
            "data": {"id": 70, "name": "Sibling Co Renamed"}}"#,
    ])?;

    assert!(matches!(outcomes[0], Outcome::Skipped(_)));
    assert!(matches!(outcomes[1], Outcome::Updated(EntityKind::Organization, _)));
    assert!(rig.store.deal_by_crm_id(RemoteId::new(900))?.is_none());
    let company = rig.store.company_by_crm_id(RemoteId::new(70))?.unwrap();
    assert_eq!(company.name, "Sibling Co Renamed");
    Ok(())
}

#[test]
fn deal_materialized_with_company_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    rig.seed_pipeline(10, 20);
    let mut company = Company::new("Deal Co");
    company.crm_org_id = Some(RemoteId::new(71));
    company.website = Some("dealco.example".into());
    company.paid_invoice_count = 4;
    rig.store.insert_company(&company)?;

    let outcome = rig.crm_event(
        r#"{"meta": {"action": "added", "entity": "deal"},
            "data": {"id": 901, "title": "Deal Co expansion", "org_id": 71,
                     "pipeline_id": 10, "stage_id": 20, "status": "open"}}"#,
    )?;

    let Outcome::Created(EntityKind::Deal, _) = outcome else {
        panic!("expected deal creation, got {outcome:?}");
    };
    let deal = rig.store.deal_by_crm_id(RemoteId::new(901))?.unwrap();
    assert_eq!(deal.status, DealStatus::Open);
    assert_eq!(deal.website.as_deref(), Some("dealco.example"));
    assert_eq!(deal.paid_invoice_count, 4);
    Ok(())
}

#[test]
fn disallowed_company_update_closes_open_deals_once() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let (pipeline, _) = rig.seed_pipeline(10, 20);
    let mut company = Company::new("Blocked Co");
    company.crm_org_id = Some(RemoteId::new(80));
    company.disallowed = true;
    let company_id = rig.store.insert_company(&company)?;
    for _ in 0..2 {
        rig.store.insert_deal(&crosslink_storage::Deal {
            id: crosslink_core::DealId::new(0),
            crm_deal_id: None,
            name: "Open deal".into(),
            status: DealStatus::Open,
            company_id,
            contact_id: None,
            pipeline_id: pipeline,
            stage_id: None,
            admin_id: None,
            price_plan: None,
            website: None,
            estimated_income: None,
            paid_invoice_count: 0,
        })?;
    }

    let event = r#"{"meta": {"action": "updated", "entity": "organization"},
                    "data": {"id": 80, "name": "Blocked Co"}}"#;
    rig.crm_event(event)?;
    assert!(rig.store.open_deals_for_company(company_id)?.is_empty());

    // Replay: nothing left to close, no error.
    rig.crm_event(event)?;
    assert!(rig.store.open_deals_for_company(company_id)?.is_empty());
    Ok(())
}

#[test]
fn person_without_resolvable_organization_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let outcome = rig.crm_event(
        r#"{"meta": {"action": "added", "entity": "person"},
            "data": {"id": 500, "org_id": 77777, "name": "Orphan Person"}}"#,
    )?;
    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert!(rig.store.contact_by_crm_id(RemoteId::new(500))?.is_none());
    Ok(())
}

#[test]
fn person_follows_organization_relink() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let mut first = Company::new("First Org");
    first.crm_org_id = Some(RemoteId::new(1));
    let first_id = rig.store.insert_company(&first)?;
    let mut second = Company::new("Second Org");
    second.crm_org_id = Some(RemoteId::new(2));
    let second_id = rig.store.insert_company(&second)?;

    rig.crm_event(
        r#"{"meta": {"action": "added", "entity": "person"},
            "data": {"id": 600, "org_id": 1, "name": "Mover Person"}}"#,
    )?;
    let contact = rig.store.contact_by_crm_id(RemoteId::new(600))?.unwrap();
    assert_eq!(contact.company_id, first_id);

    rig.crm_event(
        r#"{"meta": {"action": "updated", "entity": "person"},
            "data": {"id": 600, "org_id": 2, "name": "Mover Person"}}"#,
    )?;
    let contact = rig.store.contact_by_crm_id(RemoteId::new(600))?.unwrap();
    assert_eq!(contact.company_id, second_id);
    Ok(())
}

#[test]
fn deal_deletion_marks_status_deleted() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new();
    let (pipeline, _) = rig.seed_pipeline(10, 20);
    let company_id = rig.seed_company("Deal Owner");
    let deal_id = rig.store.insert_deal(&crosslink_storage::Deal {
        id: crosslink_core::DealId::new(0),
        crm_deal_id: Some(RemoteId::new(950)),
        name: "Doomed".into(),
        status: DealStatus::Open,
        company_id,
        contact_id: None,
        pipeline_id: pipeline,
        stage_id: None,
        admin_id: None,
        price_plan: None,
        website: None,
        estimated_income: None,
        paid_invoice_count: 0,
    })?;

    rig.crm_event(
        r#"{"meta": {"action": "deleted", "entity": "deal"},
            "data": null, "previous": {"id": 950}}"#,
    )?;
    let deal = rig.store.get_deal(deal_id)?.unwrap();
    assert_eq!(deal.status, DealStatus::Deleted);
    assert_eq!(deal.crm_deal_id, None);
    Ok(())
}
