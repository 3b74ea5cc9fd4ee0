use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{info, warn};

use crosslink_core::{
    CompanyId, ContactId, DealId, DealStatus, EntityKind, FieldMappingRegistry, RemoteId,
};
use crosslink_storage::{Company, Contact, Deal, Store};

use crate::error::EngineError;

/// What a remote CRM call can report back. The boundary deliberately has no
/// transport detail in it: HTTP, auth and serialization live behind the
/// implementor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// 404/410: the record the stored id points at no longer exists.
    #[error("record gone")]
    Gone,

    /// 429/5xx: worth retrying with backoff.
    #[error("transient failure (status {status})")]
    Transient { status: u16 },

    /// 4xx rejection of the payload itself. Retrying won't help.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Minimal-diff CRM surface, one method per verb, shared across entity
/// kinds. Field maps are keyed by external field names.
pub trait CrmApi {
    fn create(
        &mut self,
        kind: EntityKind,
        fields: &BTreeMap<String, Value>,
    ) -> Result<RemoteId, RemoteError>;

    fn fetch(
        &mut self,
        kind: EntityKind,
        id: RemoteId,
    ) -> Result<BTreeMap<String, Value>, RemoteError>;

    fn update(
        &mut self,
        kind: EntityKind,
        id: RemoteId,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), RemoteError>;
}

/// Fixed request budget per rolling window, shared by every outbound call.
/// `acquire` queues (sleeps) instead of failing when the budget is spent.
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock();
                let now = Instant::now();
                while stamps
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    stamps.pop_front();
                }
                if stamps.len() < self.capacity {
                    stamps.push_back(now);
                    return;
                }
                self.window - now.duration_since(*stamps.front().expect("non-empty"))
            };
            std::thread::sleep(wait);
        }
    }
}

/// Bounded retry with exponential backoff for transient remote failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

enum PushPlan {
    Created(RemoteId),
    Updated(RemoteId),
    Clean(RemoteId),
}

/// Pushes internal records outward with minimal field-level diffs.
///
/// Create when the record has no external id, otherwise GET the current
/// remote state and PATCH only the keys whose values differ — a full
/// overwrite would clobber remote-only fields this system does not own.
/// A gone remote record is recreated and the fresh id stored.
pub struct OutboundSync<C: CrmApi> {
    api: C,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

/// Per-company cascade result: the company sync either succeeded or failed
/// the whole cascade, while contact/deal failures are isolated and listed.
#[derive(Debug)]
pub struct CascadeReport {
    pub company: RemoteId,
    pub synced_contacts: usize,
    pub synced_deals: usize,
    pub failures: Vec<String>,
}

impl<C: CrmApi> OutboundSync<C> {
    pub fn new(api: C) -> Self {
        Self {
            api,
            limiter: RateLimiter::new(100, Duration::from_secs(10)),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_policy(api: C, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self { api, limiter, retry }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut C {
        &mut self.api
    }

    pub fn sync_company(
        &mut self,
        store: &mut dyn Store,
        registry: &FieldMappingRegistry,
        id: CompanyId,
    ) -> Result<RemoteId, EngineError> {
        let mut company = store
            .get_company(id)?
            .ok_or_else(|| EngineError::NotFound(format!("company {id}")))?;
        if company.is_deleted {
            return Err(EngineError::Validation(format!(
                "company {id} is soft-deleted and is never pushed"
            )));
        }
        let desired = project(
            EntityKind::Organization,
            company_fields(&company, store)?,
            registry,
        );
        match self.push(EntityKind::Organization, company.crm_org_id, &desired, false)? {
            PushPlan::Created(remote) => {
                company.crm_org_id = Some(remote);
                store.update_company(&company)?;
                Ok(remote)
            }
            PushPlan::Updated(remote) | PushPlan::Clean(remote) => Ok(remote),
        }
    }

    pub fn sync_contact(
        &mut self,
        store: &mut dyn Store,
        registry: &FieldMappingRegistry,
        id: ContactId,
    ) -> Result<RemoteId, EngineError> {
        let mut contact = store
            .get_contact(id)?
            .ok_or_else(|| EngineError::NotFound(format!("contact {id}")))?;
        if contact.is_deleted {
            return Err(EngineError::Validation(format!(
                "contact {id} is soft-deleted and is never pushed"
            )));
        }
        let company = store
            .get_company(contact.company_id)?
            .ok_or_else(|| EngineError::NotFound(format!("company {}", contact.company_id)))?;
        let desired = project(EntityKind::Person, contact_fields(&contact, &company), registry);
        match self.push(EntityKind::Person, contact.crm_person_id, &desired, false)? {
            PushPlan::Created(remote) => {
                contact.crm_person_id = Some(remote);
                store.update_contact(&contact)?;
                Ok(remote)
            }
            PushPlan::Updated(remote) | PushPlan::Clean(remote) => Ok(remote),
        }
    }

    pub fn sync_deal(
        &mut self,
        store: &mut dyn Store,
        registry: &FieldMappingRegistry,
        id: DealId,
    ) -> Result<RemoteId, EngineError> {
        let mut deal = store
            .get_deal(id)?
            .ok_or_else(|| EngineError::NotFound(format!("deal {id}")))?;
        if deal.status == DealStatus::Deleted {
            return Err(EngineError::Validation(format!(
                "deal {id} is deleted and is never pushed"
            )));
        }
        let desired = project(EntityKind::Deal, deal_fields(&deal, store)?, registry);
        match self.push(EntityKind::Deal, deal.crm_deal_id, &desired, true)? {
            PushPlan::Created(remote) => {
                deal.crm_deal_id = Some(remote);
                store.update_deal(&deal)?;
                Ok(remote)
            }
            PushPlan::Updated(remote) | PushPlan::Clean(remote) => Ok(remote),
        }
    }

    /// Push a company and everything it owns. The company itself failing
    /// fails the cascade (contacts and deals need its remote id); each
    /// contact or deal failure is isolated, logged, and listed in the
    /// report without stopping its siblings.
    pub fn sync_company_cascade(
        &mut self,
        store: &mut dyn Store,
        registry: &FieldMappingRegistry,
        id: CompanyId,
    ) -> Result<CascadeReport, EngineError> {
        let company_remote = self.sync_company(store, registry, id)?;
        let mut report = CascadeReport {
            company: company_remote,
            synced_contacts: 0,
            synced_deals: 0,
            failures: Vec::new(),
        };
        for contact in store.contacts_for_company(id)? {
            match self.sync_contact(store, registry, contact.id) {
                Ok(_) => report.synced_contacts += 1,
                Err(e) => {
                    warn!(contact = contact.id.raw(), error = %e, "contact sync failed");
                    report.failures.push(format!("contact {}: {e}", contact.id));
                }
            }
        }
        for deal in store.open_deals_for_company(id)? {
            match self.sync_deal(store, registry, deal.id) {
                Ok(_) => report.synced_deals += 1,
                Err(e) => {
                    warn!(deal = deal.id.raw(), error = %e, "deal sync failed");
                    report.failures.push(format!("deal {}: {e}", deal.id));
                }
            }
        }
        Ok(report)
    }

    fn push(
        &mut self,
        kind: EntityKind,
        current: Option<RemoteId>,
        desired: &BTreeMap<String, Value>,
        guard_status: bool,
    ) -> Result<PushPlan, EngineError> {
        let Some(remote_id) = current else {
            let created = self.call(kind, |api| api.create(kind, desired))?;
            info!(kind = kind.as_str(), remote = created.raw(), "created remote record");
            return Ok(PushPlan::Created(created));
        };

        let remote = match self.call(kind, |api| api.fetch(kind, remote_id)) {
            Ok(remote) => remote,
            Err(EngineError::RemoteGone(_)) => {
                info!(kind = kind.as_str(), stale = remote_id.raw(), "stale remote id, recreating");
                let created = self.call(kind, |api| api.create(kind, desired))?;
                return Ok(PushPlan::Created(created));
            }
            Err(e) => return Err(e),
        };

        let mut diff: BTreeMap<String, Value> = desired
            .iter()
            .filter(|(key, value)| remote.get(*key) != Some(value))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // A deal closed remotely stays closed: suppress a status write that
        // would flip a terminal remote status back to open.
        if guard_status
            && diff.get("status").and_then(Value::as_str) == Some("open")
            && remote
                .get("status")
                .and_then(Value::as_str)
                .and_then(|s| DealStatus::parse(s).ok())
                .is_some_and(|s| s.is_terminal())
        {
            info!(remote = remote_id.raw(), "suppressing status regression");
            diff.remove("status");
        }

        if diff.is_empty() {
            return Ok(PushPlan::Clean(remote_id));
        }

        match self.call(kind, |api| api.update(kind, remote_id, &diff)) {
            Ok(()) => Ok(PushPlan::Updated(remote_id)),
            Err(EngineError::RemoteGone(_)) => {
                let created = self.call(kind, |api| api.create(kind, desired))?;
                Ok(PushPlan::Created(created))
            }
            Err(e) => Err(e),
        }
    }

    /// One remote call through the shared rate limit, with bounded retry on
    /// transient failures.
    fn call<T>(
        &mut self,
        kind: EntityKind,
        mut f: impl FnMut(&mut C) -> Result<T, RemoteError>,
    ) -> Result<T, EngineError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire();
            attempt += 1;
            match f(&mut self.api) {
                Ok(v) => return Ok(v),
                Err(RemoteError::Transient { status }) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(EngineError::RemoteTransient {
                            status,
                            context: format!("{} call, {attempt} attempts", kind.as_str()),
                        });
                    }
                    warn!(kind = kind.as_str(), status, attempt, "transient remote failure, retrying");
                    std::thread::sleep(self.retry.delay(attempt));
                }
                Err(RemoteError::Gone) => {
                    return Err(EngineError::RemoteGone(kind.as_str().to_string()));
                }
                Err(RemoteError::Rejected(msg)) => {
                    return Err(EngineError::Validation(format!(
                        "{} rejected by remote: {msg}",
                        kind.as_str()
                    )));
                }
            }
        }
    }
}

/// Translate internal field names to external keys and drop null/empty
/// values: external systems may reject or misinterpret empty custom-field
/// writes, and omitting a key is the safe way to say "no value".
fn project(
    kind: EntityKind,
    fields: Vec<(&'static str, Value)>,
    registry: &FieldMappingRegistry,
) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (name, value) in fields {
        if value.is_null() || value.as_str().is_some_and(str::is_empty) {
            continue;
        }
        let key = registry.external_key(kind, name).unwrap_or(name);
        out.insert(key.to_string(), value);
    }
    out
}

fn company_fields(
    company: &Company,
    store: &dyn Store,
) -> Result<Vec<(&'static str, Value)>, EngineError> {
    let owner = match company.sales_person_id {
        Some(admin_id) => store
            .get_admin(admin_id)?
            .and_then(|a| a.crm_owner_id)
            .map(|id| id.raw()),
        None => None,
    };
    Ok(vec![
        ("name", json!(company.name)),
        ("address_country", json!(company.country)),
        ("owner_id", json!(owner)),
        ("internal_id", json!(company.id.raw())),
        ("website", json!(company.website)),
        ("currency", json!(company.currency)),
        ("estimated_income", json!(company.estimated_income)),
        ("billing_status", json!(company.billing_status.as_str())),
        ("price_plan", json!(company.price_plan.as_str())),
        ("paid_invoice_count", json!(company.paid_invoice_count)),
        ("has_booked_call", json!(company.has_booked_call)),
    ])
}

fn contact_fields(contact: &Contact, company: &Company) -> Vec<(&'static str, Value)> {
    vec![
        ("name", json!(contact.name())),
        ("email", json!(contact.email)),
        ("phone", json!(contact.phone)),
        ("org_id", json!(company.crm_org_id.map(|id| id.raw()))),
        ("internal_id", json!(contact.id.raw())),
    ]
}

fn deal_fields(deal: &Deal, store: &dyn Store) -> Result<Vec<(&'static str, Value)>, EngineError> {
    let org = store
        .get_company(deal.company_id)?
        .and_then(|c| c.crm_org_id)
        .map(|id| id.raw());
    let person = match deal.contact_id {
        Some(id) => store.get_contact(id)?.and_then(|c| c.crm_person_id).map(|id| id.raw()),
        None => None,
    };
    let pipeline = store
        .get_pipeline(deal.pipeline_id)?
        .map(|p| p.crm_pipeline_id.raw());
    let stage = match deal.stage_id {
        Some(id) => store.get_stage(id)?.map(|s| s.crm_stage_id.raw()),
        None => None,
    };
    let owner = match deal.admin_id {
        Some(id) => store.get_admin(id)?.and_then(|a| a.crm_owner_id).map(|id| id.raw()),
        None => None,
    };
    Ok(vec![
        ("title", json!(deal.name)),
        ("status", json!(deal.status.as_str())),
        ("org_id", json!(org)),
        ("person_id", json!(person)),
        ("pipeline_id", json!(pipeline)),
        ("stage_id", json!(stage)),
        ("user_id", json!(owner)),
        ("internal_id", json!(deal.id.raw())),
        ("price_plan", json!(deal.price_plan)),
        ("website", json!(deal.website)),
        ("estimated_income", json!(deal.estimated_income)),
        ("paid_invoice_count", json!(deal.paid_invoice_count)),
    ])
}
