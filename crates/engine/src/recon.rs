use tracing::{error, info, warn};

use crosslink_core::{
    CrmEvent, DealStatus, EntityKind, FieldMappingRegistry, FlatRecord, RemoteId,
};
use crosslink_storage::{Company, Contact, Deal, Pipeline, Stage, Store};

use crate::error::EngineError;
use crate::locks::KeyedLocks;
use crate::merge;
use crate::resolver::{self, split_name};

/// Per-event result of driving the state machine. `Ignored` and `Skipped`
/// are successes from the webhook's point of view: the batch response stays
/// success-shaped and the reason is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(EntityKind, i64),
    Updated(EntityKind, i64),
    Deleted(EntityKind, i64),
    Ignored(&'static str),
    Skipped(String),
}

/// Drives create/update/delete transitions for all five entity kinds from
/// normalized CRM events. One driver with per-kind branches instead of a
/// type hierarchy; the kinds differ in their field subset and delete
/// semantics, not in their flow.
pub struct Reconciler {
    registry: FieldMappingRegistry,
    locks: KeyedLocks,
}

impl Reconciler {
    pub fn new(registry: FieldMappingRegistry) -> Self {
        Self {
            registry,
            locks: KeyedLocks::default(),
        }
    }

    pub fn registry(&self) -> &FieldMappingRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FieldMappingRegistry {
        &mut self.registry
    }

    /// Process one batch delivery. Failures are isolated per event: the
    /// returned outcomes line up with the input events and errors are
    /// logged, never propagated, so the delivering system sees success once
    /// the payload was structurally accepted.
    pub fn process_batch(&self, store: &mut dyn Store, events: &[CrmEvent]) -> Vec<Outcome> {
        events
            .iter()
            .map(|event| match self.process_event(store, event) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(entity = event.meta.entity, error = %e, "event failed");
                    Outcome::Skipped(e.to_string())
                }
            })
            .collect()
    }

    pub fn process_event(
        &self,
        store: &mut dyn Store,
        event: &CrmEvent,
    ) -> Result<Outcome, EngineError> {
        let Some(kind) = event.kind() else {
            info!(entity = event.meta.entity, "ignoring unknown entity kind");
            return Ok(Outcome::Ignored("unknown entity kind"));
        };

        if event.is_deletion() {
            if kind.ignores_deletion() {
                info!(kind = kind.as_str(), "ignoring pipeline/stage deletion");
                return Ok(Outcome::Ignored("pipeline/stage deletion"));
            }
            let Some(previous) = &event.previous else {
                return Ok(Outcome::Ignored("deletion without previous snapshot"));
            };
            let rec = FlatRecord::normalize(kind, previous, &self.registry)?;
            let crm_id = rec.integer("id").map(RemoteId::new);
            let _guard = self.locks.lock(kind, lock_key(&rec, crm_id)?);
            return self.apply_deletion(store, kind, &rec, crm_id);
        }

        let data = event
            .data
            .as_ref()
            .ok_or_else(|| EngineError::Validation("upsert event without data".into()))?;
        let rec = FlatRecord::normalize(kind, data, &self.registry)?;
        let crm_id = rec.integer("id").map(RemoteId::new);
        let _guard = self.locks.lock(kind, lock_key(&rec, crm_id)?);

        match kind {
            EntityKind::Organization => self.upsert_company(store, &rec, crm_id),
            EntityKind::Person => self.upsert_contact(store, &rec, crm_id),
            EntityKind::Deal => self.upsert_deal(store, &rec, crm_id),
            EntityKind::Pipeline => upsert_pipeline(store, &rec, crm_id),
            EntityKind::Stage => upsert_stage(store, &rec, crm_id),
        }
    }

    /// Soft deletion: the external id slot is cleared and the record stays.
    /// A record that never existed or is already gone is a no-op.
    fn apply_deletion(
        &self,
        store: &mut dyn Store,
        kind: EntityKind,
        rec: &FlatRecord,
        crm_id: Option<RemoteId>,
    ) -> Result<Outcome, EngineError> {
        match kind {
            EntityKind::Organization => {
                let Some(mut company) = resolver::resolve_company(store, rec, crm_id)? else {
                    return Ok(Outcome::Ignored("deletion target already absent"));
                };
                company.crm_org_id = None;
                company.is_deleted = true;
                store.update_company(&company)?;
                info!(company = company.id.raw(), "organization soft-deleted");
                Ok(Outcome::Deleted(kind, company.id.raw()))
            }
            EntityKind::Person => {
                let Some(mut contact) = resolver::resolve_contact(store, rec, crm_id, None)?
                else {
                    return Ok(Outcome::Ignored("deletion target already absent"));
                };
                contact.crm_person_id = None;
                contact.is_deleted = true;
                store.update_contact(&contact)?;
                info!(contact = contact.id.raw(), "person soft-deleted");
                Ok(Outcome::Deleted(kind, contact.id.raw()))
            }
            EntityKind::Deal => {
                let Some(mut deal) = resolver::resolve_deal(store, rec, crm_id)? else {
                    return Ok(Outcome::Ignored("deletion target already absent"));
                };
                deal.crm_deal_id = None;
                deal.status = DealStatus::Deleted;
                store.update_deal(&deal)?;
                info!(deal = deal.id.raw(), "deal marked deleted");
                Ok(Outcome::Deleted(kind, deal.id.raw()))
            }
            EntityKind::Pipeline | EntityKind::Stage => unreachable!("filtered by caller"),
        }
    }

    fn upsert_company(
        &self,
        store: &mut dyn Store,
        rec: &FlatRecord,
        crm_id: Option<RemoteId>,
    ) -> Result<Outcome, EngineError> {
        let crm_id = crm_id
            .ok_or_else(|| EngineError::Validation("organization payload missing id".into()))?;
        merge::absorb(store, EntityKind::Organization, &rec.back_ref()?, crm_id)?;

        let owner = match rec.integer("owner_id") {
            Some(owner) => store.admin_by_crm_owner_id(RemoteId::new(owner))?.map(|a| a.id),
            None => None,
        };

        if let Some(mut company) = resolver::resolve_company(store, rec, Some(crm_id))? {
            if let Some(name) = rec.non_empty_text("name") {
                company.name = name.to_string();
            }
            if let Some(country) = rec.non_empty_text("address_country") {
                company.country = Some(country.to_string());
            }
            if let Some(website) = rec.non_empty_text("website") {
                company.website = Some(website.to_string());
            }
            if owner.is_some() {
                company.sales_person_id = owner;
            }
            company.crm_org_id = Some(crm_id);
            // A live upsert for a soft-deleted record heals it.
            company.is_deleted = false;
            store.update_company(&company)?;
            close_open_deals_if_blocked(store, &company)?;
            return Ok(Outcome::Updated(EntityKind::Organization, company.id.raw()));
        }

        let name = rec
            .non_empty_text("name")
            .ok_or_else(|| EngineError::Validation("organization payload missing name".into()))?;
        let mut company = Company::new(name);
        company.crm_org_id = Some(crm_id);
        company.country = rec.non_empty_text("address_country").map(str::to_string);
        company.website = rec.non_empty_text("website").map(str::to_string);
        company.sales_person_id = owner;
        let id = store.insert_company(&company)?;
        info!(company = id.raw(), crm_id = crm_id.raw(), "organization materialized");
        Ok(Outcome::Created(EntityKind::Organization, id.raw()))
    }

    fn upsert_contact(
        &self,
        store: &mut dyn Store,
        rec: &FlatRecord,
        crm_id: Option<RemoteId>,
    ) -> Result<Outcome, EngineError> {
        let crm_id =
            crm_id.ok_or_else(|| EngineError::Validation("person payload missing id".into()))?;
        merge::absorb(store, EntityKind::Person, &rec.back_ref()?, crm_id)?;

        let company = match rec.integer("org_id") {
            Some(org) => store.company_by_crm_id(RemoteId::new(org))?,
            None => None,
        };

        if let Some(mut contact) =
            resolver::resolve_contact(store, rec, Some(crm_id), company.as_ref().map(|c| c.id))?
        {
            if let Some(name) = rec.non_empty_text("name") {
                let (first, last) = split_name(name);
                contact.first_name = first;
                contact.last_name = last;
            }
            if let Some(email) = rec.non_empty_text("email") {
                contact.email = Some(email.to_string());
            }
            if let Some(phone) = rec.non_empty_text("phone") {
                contact.phone = Some(phone.to_string());
            }
            // The CRM owns the person->organization link; follow it.
            if let Some(company) = &company {
                contact.company_id = company.id;
            }
            contact.crm_person_id = Some(crm_id);
            contact.is_deleted = false;
            store.update_contact(&contact)?;
            return Ok(Outcome::Updated(EntityKind::Person, contact.id.raw()));
        }

        let Some(company) = company else {
            warn!(crm_id = crm_id.raw(), "person upsert without resolvable organization, skipped");
            return Ok(Outcome::Skipped("person has no resolvable organization".into()));
        };
        let name = rec
            .non_empty_text("name")
            .ok_or_else(|| EngineError::Validation("person payload missing name".into()))?;
        let (first, last) = split_name(name);
        let mut contact = Contact::new(company.id, last);
        contact.first_name = first;
        contact.email = rec.non_empty_text("email").map(str::to_string);
        contact.phone = rec.non_empty_text("phone").map(str::to_string);
        contact.crm_person_id = Some(crm_id);
        let id = store.insert_contact(&contact)?;
        info!(contact = id.raw(), crm_id = crm_id.raw(), "person materialized");
        Ok(Outcome::Created(EntityKind::Person, id.raw()))
    }

    fn upsert_deal(
        &self,
        store: &mut dyn Store,
        rec: &FlatRecord,
        crm_id: Option<RemoteId>,
    ) -> Result<Outcome, EngineError> {
        let crm_id =
            crm_id.ok_or_else(|| EngineError::Validation("deal payload missing id".into()))?;
        merge::absorb(store, EntityKind::Deal, &rec.back_ref()?, crm_id)?;

        // Unknown pipeline/stage references skip the deal operation only;
        // sibling events in the same delivery still apply.
        let pipeline = match rec.integer("pipeline_id") {
            Some(p) => match store.pipeline_by_crm_id(RemoteId::new(p))? {
                Some(pipeline) => Some(pipeline),
                None => {
                    warn!(crm_pipeline = p, "deal references unknown pipeline, skipped");
                    return Ok(Outcome::Skipped(format!("unknown pipeline {p}")));
                }
            },
            None => None,
        };
        let stage = match rec.integer("stage_id") {
            Some(s) => match store.stage_by_crm_id(RemoteId::new(s))? {
                Some(stage) => Some(stage),
                None => {
                    warn!(crm_stage = s, "deal references unknown stage, skipped");
                    return Ok(Outcome::Skipped(format!("unknown stage {s}")));
                }
            },
            None => None,
        };
        let company = match rec.integer("org_id") {
            Some(org) => store.company_by_crm_id(RemoteId::new(org))?,
            None => None,
        };
        let contact = match rec.integer("person_id") {
            Some(p) => store.contact_by_crm_id(RemoteId::new(p))?,
            None => None,
        };
        let admin = match rec.integer("user_id") {
            Some(u) => store.admin_by_crm_owner_id(RemoteId::new(u))?,
            None => None,
        };
        let status = match rec.non_empty_text("status") {
            Some(s) => Some(DealStatus::parse(s)?),
            None => None,
        };

        if let Some(mut deal) = resolver::resolve_deal(store, rec, Some(crm_id))? {
            if let Some(title) = rec.non_empty_text("title") {
                deal.name = title.to_string();
            }
            if let Some(status) = status {
                deal.status = status;
            }
            if let Some(company) = &company {
                deal.company_id = company.id;
            }
            if let Some(contact) = &contact {
                deal.contact_id = Some(contact.id);
            }
            if let Some(pipeline) = &pipeline {
                deal.pipeline_id = pipeline.id;
            }
            if let Some(stage) = &stage {
                deal.stage_id = Some(stage.id);
            }
            if let Some(admin) = &admin {
                deal.admin_id = Some(admin.id);
            }
            deal.crm_deal_id = Some(crm_id);
            store.update_deal(&deal)?;
            return Ok(Outcome::Updated(EntityKind::Deal, deal.id.raw()));
        }

        let Some(company) = company else {
            warn!(crm_id = crm_id.raw(), "deal upsert without resolvable organization, skipped");
            return Ok(Outcome::Skipped("deal has no resolvable organization".into()));
        };
        let Some(pipeline) = pipeline else {
            warn!(crm_id = crm_id.raw(), "deal upsert without pipeline, skipped");
            return Ok(Outcome::Skipped("deal has no pipeline".into()));
        };
        let deal = Deal {
            id: crosslink_core::DealId::new(0),
            crm_deal_id: Some(crm_id),
            name: rec
                .non_empty_text("title")
                .map(str::to_string)
                .unwrap_or_else(|| company.name.clone()),
            status: status.unwrap_or(DealStatus::Open),
            company_id: company.id,
            contact_id: contact.map(|c| c.id),
            pipeline_id: pipeline.id,
            stage_id: stage.map(|s| s.id),
            admin_id: admin.map(|a| a.id),
            price_plan: Some(company.price_plan.as_str().to_string()),
            website: company.website.clone(),
            estimated_income: company.estimated_income.clone(),
            paid_invoice_count: company.paid_invoice_count,
        };
        let id = store.insert_deal(&deal)?;
        info!(deal = id.raw(), crm_id = crm_id.raw(), "deal materialized");
        Ok(Outcome::Created(EntityKind::Deal, id.raw()))
    }
}

fn upsert_pipeline(
    store: &mut dyn Store,
    rec: &FlatRecord,
    crm_id: Option<RemoteId>,
) -> Result<Outcome, EngineError> {
    let crm_id =
        crm_id.ok_or_else(|| EngineError::Validation("pipeline payload missing id".into()))?;
    let name = rec
        .non_empty_text("name")
        .ok_or_else(|| EngineError::Validation("pipeline payload missing name".into()))?;
    let entry_stage = match rec.integer("first_stage_id") {
        Some(s) => store.stage_by_crm_id(RemoteId::new(s))?.map(|st| st.id),
        None => None,
    };

    if let Some(mut pipeline) = store.pipeline_by_crm_id(crm_id)? {
        pipeline.name = name.to_string();
        if entry_stage.is_some() {
            pipeline.entry_stage_id = entry_stage;
        }
        store.update_pipeline(&pipeline)?;
        return Ok(Outcome::Updated(EntityKind::Pipeline, pipeline.id.raw()));
    }
    let id = store.insert_pipeline(&Pipeline {
        id: crosslink_core::PipelineId::new(0),
        crm_pipeline_id: crm_id,
        name: name.to_string(),
        entry_stage_id: entry_stage,
    })?;
    Ok(Outcome::Created(EntityKind::Pipeline, id.raw()))
}

fn upsert_stage(
    store: &mut dyn Store,
    rec: &FlatRecord,
    crm_id: Option<RemoteId>,
) -> Result<Outcome, EngineError> {
    let crm_id =
        crm_id.ok_or_else(|| EngineError::Validation("stage payload missing id".into()))?;
    let name = rec
        .non_empty_text("name")
        .ok_or_else(|| EngineError::Validation("stage payload missing name".into()))?;

    if let Some(mut stage) = store.stage_by_crm_id(crm_id)? {
        stage.name = name.to_string();
        store.update_stage(&stage)?;
        return Ok(Outcome::Updated(EntityKind::Stage, stage.id.raw()));
    }
    let id = store.insert_stage(&Stage {
        id: crosslink_core::StageId::new(0),
        crm_stage_id: crm_id,
        name: name.to_string(),
    })?;
    Ok(Outcome::Created(EntityKind::Stage, id.raw()))
}

/// Cascade rule: a company that is disallowed or whose billing lifecycle
/// has terminated closes every open deal it owns as lost. Re-running the
/// transition finds no open deals left, so the rule is idempotent.
pub fn close_open_deals_if_blocked(
    store: &mut dyn Store,
    company: &Company,
) -> Result<usize, EngineError> {
    if !company.disallowed && !company.billing_status.is_terminal() {
        return Ok(0);
    }
    let open = store.open_deals_for_company(company.id)?;
    let closed = open.len();
    for mut deal in open {
        deal.status = DealStatus::Lost;
        store.update_deal(&deal)?;
    }
    if closed > 0 {
        info!(
            company = company.id.raw(),
            closed,
            disallowed = company.disallowed,
            status = company.billing_status.as_str(),
            "closed open deals for blocked company"
        );
    }
    Ok(closed)
}

fn lock_key(rec: &FlatRecord, crm_id: Option<RemoteId>) -> Result<i64, EngineError> {
    if let Some(id) = crm_id {
        return Ok(id.raw());
    }
    Ok(rec.back_ref()?.winner().unwrap_or(0))
}
