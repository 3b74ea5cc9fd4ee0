//! Boundary exposed to the call-booking workflow. The booker only needs
//! "a company/deal exists, here is its id"; no calendar mechanics cross
//! this line.

use tracing::info;

use crosslink_core::{CompanyId, ContactId, DealId, DealStatus};
use crosslink_storage::{Company, Deal, Store};

use crate::error::EngineError;

/// Find a company for a booking request by contact email, then by
/// case-insensitive name, creating a fresh one if neither matches.
pub fn get_or_create_company(
    store: &mut dyn Store,
    name: &str,
    email: Option<&str>,
) -> Result<Company, EngineError> {
    if let Some(email) = email
        && let Some(company) = store.company_by_contact_email(&[email])?
    {
        return Ok(company);
    }
    if let Some(company) = store.company_by_name_ci(name)? {
        return Ok(company);
    }
    let mut company = Company::new(name);
    let id = store.insert_company(&company)?;
    company.id = id;
    info!(company = id.raw(), "company created for booking");
    Ok(company)
}

/// Return the company's open deal, or create one in the pipeline configured
/// for its price plan, landing on that pipeline's entry stage. Missing
/// configuration fails the caller's request synchronously: nothing short of
/// operator action can fix it.
pub fn get_or_create_deal(
    store: &mut dyn Store,
    company_id: CompanyId,
    contact_id: Option<ContactId>,
) -> Result<Deal, EngineError> {
    if let Some(deal) = store.open_deals_for_company(company_id)?.into_iter().next() {
        return Ok(deal);
    }

    let company = store
        .get_company(company_id)?
        .ok_or_else(|| EngineError::NotFound(format!("company {company_id}")))?;
    let config = store.get_sync_config()?;
    let pipeline_id = config.pipeline_for_plan(company.price_plan).ok_or_else(|| {
        EngineError::Configuration(format!(
            "no pipeline configured for price plan {}",
            company.price_plan.as_str()
        ))
    })?;
    let pipeline = store.get_pipeline(pipeline_id)?.ok_or_else(|| {
        EngineError::Configuration(format!("configured pipeline {pipeline_id} does not exist"))
    })?;
    let entry_stage = pipeline.entry_stage_id.ok_or_else(|| {
        EngineError::Configuration(format!("pipeline {} has no entry stage", pipeline.name))
    })?;

    let mut deal = Deal {
        id: DealId::new(0),
        crm_deal_id: None,
        name: company.name.clone(),
        status: DealStatus::Open,
        company_id,
        contact_id,
        pipeline_id,
        stage_id: Some(entry_stage),
        admin_id: company.sales_person_id,
        price_plan: Some(company.price_plan.as_str().to_string()),
        website: company.website.clone(),
        estimated_income: company.estimated_income.clone(),
        paid_invoice_count: company.paid_invoice_count,
    };
    let id = store.insert_deal(&deal)?;
    deal.id = id;
    info!(deal = id.raw(), company = company_id.raw(), "deal created for booking");
    Ok(deal)
}

/// Flip the company's booked-call flag. Idempotent by construction.
pub fn record_call_booked(store: &mut dyn Store, company_id: CompanyId) -> Result<(), EngineError> {
    let mut company = store
        .get_company(company_id)?
        .ok_or_else(|| EngineError::NotFound(format!("company {company_id}")))?;
    if !company.has_booked_call {
        company.has_booked_call = true;
        store.update_company(&company)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosslink_storage::{SqliteStore, SyncConfig};

    #[test]
    fn missing_pipeline_config_is_a_configuration_error() -> Result<(), EngineError> {
        let mut store = SqliteStore::open_in_memory()?;
        let id = store.insert_company(&Company::new("Acme"))?;
        match get_or_create_deal(&mut store, id, None) {
            Err(EngineError::Configuration(_)) => Ok(()),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_without_entry_stage_is_a_configuration_error() -> Result<(), EngineError> {
        let mut store = SqliteStore::open_in_memory()?;
        let company = store.insert_company(&Company::new("Acme"))?;
        let pipeline = store.insert_pipeline(&crosslink_storage::Pipeline {
            id: crosslink_core::PipelineId::new(0),
            crm_pipeline_id: crosslink_core::RemoteId::new(1),
            name: "Sales".into(),
            entry_stage_id: None,
        })?;
        store.set_sync_config(&SyncConfig {
            payg_pipeline_id: Some(pipeline),
            startup_pipeline_id: None,
            enterprise_pipeline_id: None,
        })?;
        match get_or_create_deal(&mut store, company, None) {
            Err(EngineError::Configuration(_)) => Ok(()),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn call_booked_is_idempotent() -> Result<(), EngineError> {
        let mut store = SqliteStore::open_in_memory()?;
        let id = store.insert_company(&Company::new("Acme"))?;
        record_call_booked(&mut store, id)?;
        record_call_booked(&mut store, id)?;
        assert!(store.get_company(id)?.unwrap().has_booked_call);
        Ok(())
    }
}
