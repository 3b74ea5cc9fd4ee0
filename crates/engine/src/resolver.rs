use tracing::{debug, warn};

use crosslink_core::{CompanyId, ContactId, DealId, FlatRecord, RemoteId};
use crosslink_storage::{Company, Contact, Deal, Store};

use crate::error::EngineError;

/// Split a CRM display name into (first, last). The first whitespace-separated
/// token is the first name; everything after it is the last name, so compound
/// last names ("Claude Van Damme") survive intact.
pub fn split_name(full: &str) -> (Option<String>, String) {
    let full = full.trim();
    match full.split_once(char::is_whitespace) {
        Some((first, last)) => (Some(first.to_string()), last.trim().to_string()),
        None => (None, full.to_string()),
    }
}

/// Resolve an inbound organization payload to an internal company.
///
/// Ordered candidates, first hit wins:
/// 1. back-reference id carried in the payload;
/// 2. the CRM's own id against the stored slot;
/// 3. case-insensitive exact name match. The name match is a deliberate
///    heuristic that accepts false positives; hits are logged so ambiguous
///    matches stay observable.
pub fn resolve_company(
    store: &dyn Store,
    rec: &FlatRecord,
    crm_id: Option<RemoteId>,
) -> Result<Option<Company>, EngineError> {
    if let Some(id) = rec.back_ref()?.winner()
        && let Some(company) = store.get_company(CompanyId::new(id))?
    {
        return Ok(Some(company));
    }
    if let Some(crm_id) = crm_id
        && let Some(company) = store.company_by_crm_id(crm_id)?
    {
        return Ok(Some(company));
    }
    if let Some(name) = rec.non_empty_text("name")
        && let Some(company) = store.company_by_name_ci(name)?
    {
        warn!(company = company.id.raw(), name, "organization resolved by name heuristic");
        return Ok(Some(company));
    }
    debug!("organization did not resolve");
    Ok(None)
}

/// Resolve an inbound person payload to an internal contact. The email and
/// last-name candidates only apply when the owning company has already been
/// resolved; both are scoped to it. Email match first, then case-insensitive
/// last-name match within the same company.
pub fn resolve_contact(
    store: &dyn Store,
    rec: &FlatRecord,
    crm_id: Option<RemoteId>,
    company_id: Option<CompanyId>,
) -> Result<Option<Contact>, EngineError> {
    if let Some(id) = rec.back_ref()?.winner()
        && let Some(contact) = store.get_contact(ContactId::new(id))?
    {
        return Ok(Some(contact));
    }
    if let Some(crm_id) = crm_id
        && let Some(contact) = store.contact_by_crm_id(crm_id)?
    {
        return Ok(Some(contact));
    }
    let Some(company_id) = company_id else {
        return Ok(None);
    };
    if let Some(email) = rec.non_empty_text("email")
        && let Some(contact) = store.contact_by_email_in_company(company_id, email)?
    {
        return Ok(Some(contact));
    }
    if let Some(name) = rec.non_empty_text("name") {
        let (_, last) = split_name(name);
        if let Some(contact) = store.contact_by_last_name_in_company(company_id, &last)? {
            warn!(contact = contact.id.raw(), last, "person resolved by last-name heuristic");
            return Ok(Some(contact));
        }
    }
    Ok(None)
}

pub fn resolve_deal(
    store: &dyn Store,
    rec: &FlatRecord,
    crm_id: Option<RemoteId>,
) -> Result<Option<Deal>, EngineError> {
    if let Some(id) = rec.back_ref()?.winner()
        && let Some(deal) = store.get_deal(DealId::new(id))?
    {
        return Ok(Some(deal));
    }
    if let Some(crm_id) = crm_id
        && let Some(deal) = store.deal_by_crm_id(crm_id)?
    {
        return Ok(Some(deal));
    }
    Ok(None)
}
