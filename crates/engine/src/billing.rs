use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crosslink_core::{AdminId, BillingStatus, EntityKind, PricePlan, RemoteId};
use crosslink_storage::{Company, Contact, Store};

use crate::booking;
use crate::error::EngineError;
use crate::recon::{self, Outcome};

/// Subject model this adapter handles; everything else in a batch is
/// ignored with a log line.
pub const CLIENT_MODEL: &str = "Client";

/// Emitted when the client accepts terms; carries no state we mirror.
pub const ACTION_TERMS_AGREED: &str = "agreed_terms";

/// A company younger than this may still get an automatic sales deal.
pub const DEAL_ELIGIBILITY_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
pub struct BillingWebhook {
    pub events: Vec<BillingEvent>,
}

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    pub action: String,
    #[serde(default)]
    pub verb: Option<String>,
    pub subject: Value,
}

#[derive(Debug, Deserialize)]
struct ClientPayload {
    id: i64,
    name: String,
    status: String,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    price_plan: Option<String>,
    #[serde(default)]
    paid_invoice_count: i64,
    #[serde(default)]
    disallowed: bool,
    #[serde(default)]
    sales_person: Option<OwnerRef>,
    #[serde(default)]
    paid_recipients: Vec<RecipientPayload>,
    #[serde(default)]
    extra_attrs: Vec<ExtraAttr>,
}

#[derive(Debug, Deserialize)]
struct OwnerRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RecipientPayload {
    id: i64,
    #[serde(default)]
    first_name: Option<String>,
    last_name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtraAttr {
    machine_name: String,
    value: Value,
}

/// Billing admin id -> internal admin id, rebuilt explicitly rather than
/// held as ambient global state. The adapter rebuilds once on a miss before
/// rejecting an event, so newly provisioned admins are picked up without a
/// restart.
pub struct AdminLookup {
    by_billing_id: HashMap<i64, AdminId>,
}

impl AdminLookup {
    pub fn rebuild(store: &dyn Store) -> Result<Self, EngineError> {
        let mut by_billing_id = HashMap::new();
        for admin in store.all_admins()? {
            if let Some(billing_id) = admin.billing_admin_id {
                by_billing_id.insert(billing_id.raw(), admin.id);
            }
        }
        Ok(Self { by_billing_id })
    }

    pub fn resolve(&self, billing_admin_id: i64) -> Option<AdminId> {
        self.by_billing_id.get(&billing_admin_id).copied()
    }
}

/// Strip the decoration from country strings like `"United Kingdom (GB)"`.
pub fn extract_country_code(raw: &str) -> String {
    raw.rsplit(' ')
        .next()
        .unwrap_or(raw)
        .trim_matches(|c| c == '(' || c == ')')
        .to_string()
}

/// Policy gate for automatic deal creation: early-stage lifecycle, young
/// enough, never paid, not disallowed.
pub fn deal_creation_eligible(company: &Company, now: DateTime<Utc>) -> bool {
    company.billing_status.is_early_stage()
        && company.created_at > now - Duration::days(DEAL_ELIGIBILITY_WINDOW_DAYS)
        && company.paid_invoice_count == 0
        && !company.disallowed
}

/// Normalizes billing-system webhooks into company/contact upserts, applying
/// the field-ownership partition and the deal-creation policy.
pub struct BillingAdapter {
    admins: AdminLookup,
}

impl BillingAdapter {
    pub fn new(store: &dyn Store) -> Result<Self, EngineError> {
        Ok(Self {
            admins: AdminLookup::rebuild(store)?,
        })
    }

    pub fn refresh_admins(&mut self, store: &dyn Store) -> Result<(), EngineError> {
        self.admins = AdminLookup::rebuild(store)?;
        Ok(())
    }

    /// Process a whole delivery. Per-event failures are logged and folded
    /// into the outcome list; the transport layer answers success once the
    /// payload parsed, so a single bad event never triggers a redelivery
    /// storm for its siblings.
    pub fn process_webhook(
        &mut self,
        store: &mut dyn Store,
        webhook: &BillingWebhook,
    ) -> Vec<Outcome> {
        webhook
            .events
            .iter()
            .map(|event| match self.process_event(store, event) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(action = event.action, error = %e, "billing event failed");
                    Outcome::Skipped(e.to_string())
                }
            })
            .collect()
    }

    pub fn process_event(
        &mut self,
        store: &mut dyn Store,
        event: &BillingEvent,
    ) -> Result<Outcome, EngineError> {
        if event.action == ACTION_TERMS_AGREED {
            return Ok(Outcome::Ignored("terms agreed"));
        }
        let model = event
            .subject
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Validation("billing subject missing model".into()))?;
        if model != CLIENT_MODEL {
            info!(model, "ignoring billing event with unhandled subject model");
            return Ok(Outcome::Ignored("unhandled subject model"));
        }
        let payload: ClientPayload = serde_json::from_value(event.subject.clone())
            .map_err(|e| EngineError::Validation(format!("malformed client payload: {e}")))?;
        self.process_client(store, &payload)
    }

    fn process_client(
        &mut self,
        store: &mut dyn Store,
        payload: &ClientPayload,
    ) -> Result<Outcome, EngineError> {
        // Ownership is mandatory: an event whose sales owner we cannot map
        // is rejected outright rather than silently dropped.
        let owner_ref = payload.sales_person.as_ref().ok_or_else(|| {
            EngineError::Validation(format!("client {} has no sales person", payload.id))
        })?;
        let owner = match self.admins.resolve(owner_ref.id) {
            Some(id) => id,
            None => {
                self.refresh_admins(store)?;
                self.admins.resolve(owner_ref.id).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "client {} names unknown sales person {}",
                        payload.id, owner_ref.id
                    ))
                })?
            }
        };
        let status = BillingStatus::parse(&payload.status)?;
        let billing_id = RemoteId::new(payload.id);

        let existing = match store.company_by_billing_id(billing_id)? {
            Some(company) => Some(company),
            // A company the booking flow created first has no billing id
            // yet; a recipient email match adopts it instead of duplicating.
            None => {
                let emails: Vec<&str> = payload
                    .paid_recipients
                    .iter()
                    .filter_map(|r| r.email.as_deref())
                    .collect();
                store.company_by_contact_email(&emails)?
            }
        };

        // The update branch writes only the billing-owned fields: name,
        // billing_status, country, website, currency, estimated_income,
        // paid_invoice_count, disallowed, sales_person. price_plan is
        // deliberately not among them; a manual CRM override wins after
        // creation.
        let (company_id, outcome) = if let Some(mut company) = existing {
            company.billing_client_id = Some(billing_id);
            company.name = payload.name.clone();
            company.billing_status = status;
            // Last non-empty value wins: a re-delivery that omits a field
            // must not wipe what an earlier delivery stored.
            if let Some(country) = payload.country.as_deref() {
                company.country = Some(extract_country_code(country));
            }
            if payload.website.is_some() {
                company.website = payload.website.clone();
            }
            if payload.currency.is_some() {
                company.currency = payload.currency.clone();
            }
            company.paid_invoice_count = payload.paid_invoice_count;
            company.disallowed = payload.disallowed;
            company.sales_person_id = Some(owner);
            apply_extra_attrs(&mut company, &payload.extra_attrs);
            store.update_company(&company)?;
            recon::close_open_deals_if_blocked(store, &company)?;
            (company.id, Outcome::Updated(EntityKind::Organization, company.id.raw()))
        } else {
            let mut company = Company::new(&payload.name);
            company.billing_client_id = Some(billing_id);
            company.billing_status = status;
            company.price_plan = match payload.price_plan.as_deref() {
                Some(plan) => PricePlan::parse(plan)?,
                None => PricePlan::Payg,
            };
            if let Some(created) = payload.created {
                company.created_at = created;
            }
            company.country = payload.country.as_deref().map(extract_country_code);
            company.website = payload.website.clone();
            company.currency = payload.currency.clone();
            company.paid_invoice_count = payload.paid_invoice_count;
            company.disallowed = payload.disallowed;
            company.sales_person_id = Some(owner);
            apply_extra_attrs(&mut company, &payload.extra_attrs);
            let id = store.insert_company(&company)?;
            info!(company = id.raw(), billing_id = payload.id, "company created from billing");
            (id, Outcome::Created(EntityKind::Organization, id.raw()))
        };

        // Recipients become contacts exactly once; re-deliveries never
        // clobber contact rows the CRM may have updated since.
        let mut primary_contact = None;
        for recipient in &payload.paid_recipients {
            let contact = match store.contact_by_billing_id(RemoteId::new(recipient.id))? {
                Some(contact) => contact,
                None => {
                    let mut contact = Contact::new(company_id, &recipient.last_name);
                    contact.billing_recipient_id = Some(RemoteId::new(recipient.id));
                    contact.first_name = recipient.first_name.clone();
                    contact.email = recipient.email.clone();
                    contact.phone = recipient.phone.clone();
                    let id = store.insert_contact(&contact)?;
                    contact.id = id;
                    contact
                }
            };
            primary_contact.get_or_insert(contact.id);
        }

        let company = store
            .get_company(company_id)?
            .ok_or_else(|| EngineError::NotFound(format!("company {company_id}")))?;
        if deal_creation_eligible(&company, Utc::now()) {
            // A missing pipeline configuration skips the deal, not the event.
            match booking::get_or_create_deal(store, company_id, primary_contact) {
                Ok(deal) => info!(deal = deal.id.raw(), "deal ensured for eligible company"),
                Err(e) => warn!(company = company_id.raw(), error = %e, "deal creation skipped"),
            }
        }

        Ok(outcome)
    }
}

/// Map the free-form extra-attribute bag through an explicit allow-list;
/// unknown machine names are dropped.
fn apply_extra_attrs(company: &mut Company, attrs: &[ExtraAttr]) {
    for attr in attrs {
        let text = match &attr.value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        match attr.machine_name.as_str() {
            "estimated_monthly_income" => {
                if text.is_some() {
                    company.estimated_income = text;
                }
            }
            "website" => {
                if text.is_some() {
                    company.website = text;
                }
            }
            "currency" => {
                if text.is_some() {
                    company.currency = text;
                }
            }
            other => {
                tracing::debug!(attr = other, "dropping unmapped extra attribute");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_code_extraction() {
        assert_eq!(extract_country_code("United Kingdom (GB)"), "GB");
        assert_eq!(extract_country_code("France (FR)"), "FR");
        assert_eq!(extract_country_code("DE"), "DE");
    }

    #[test]
    fn eligibility_gate() {
        let now = Utc::now();
        let mut company = Company::new("Fresh");
        company.billing_status = BillingStatus::Trial;
        assert!(deal_creation_eligible(&company, now));

        company.paid_invoice_count = 1;
        assert!(!deal_creation_eligible(&company, now));
        company.paid_invoice_count = 0;

        company.disallowed = true;
        assert!(!deal_creation_eligible(&company, now));
        company.disallowed = false;

        company.billing_status = BillingStatus::Active;
        assert!(!deal_creation_eligible(&company, now));
        company.billing_status = BillingStatus::PendingEmailConf;

        company.created_at = now - Duration::days(DEAL_ELIGIBILITY_WINDOW_DAYS + 1);
        assert!(!deal_creation_eligible(&company, now));
    }

    #[test]
    fn blank_extra_attrs_never_clear_stored_values() {
        let mut company = Company::new("Kept");
        company.estimated_income = Some("4500".into());
        company.website = Some("kept.example".into());
        apply_extra_attrs(
            &mut company,
            &[
                ExtraAttr {
                    machine_name: "estimated_monthly_income".into(),
                    value: Value::String(String::new()),
                },
                ExtraAttr {
                    machine_name: "website".into(),
                    value: Value::Null,
                },
            ],
        );
        assert_eq!(company.estimated_income.as_deref(), Some("4500"));
        assert_eq!(company.website.as_deref(), Some("kept.example"));
    }
}
