use chrono::{DateTime, Utc};

use crosslink_core::{
    AdminId, BillingStatus, CompanyId, ContactId, DealId, DealStatus, PipelineId, PricePlan,
    RemoteId, StageId,
};

/// A salesperson/owner row. Carries one foreign id per external system so
/// owner references on inbound payloads can be resolved either way.
#[derive(Debug, Clone)]
pub struct Admin {
    pub id: AdminId,
    pub billing_admin_id: Option<RemoteId>,
    pub crm_owner_id: Option<RemoteId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Company {
    pub id: CompanyId,
    pub billing_client_id: Option<RemoteId>,
    pub crm_org_id: Option<RemoteId>,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub billing_status: BillingStatus,
    pub price_plan: PricePlan,
    pub country: Option<String>,
    pub website: Option<String>,
    pub currency: Option<String>,
    pub estimated_income: Option<String>,
    pub paid_invoice_count: i64,
    pub has_booked_call: bool,
    /// Explicit "do not do business with" flag. Flipping it on closes every
    /// open deal the company owns.
    pub disallowed: bool,
    pub is_deleted: bool,
    pub sales_person_id: Option<AdminId>,
}

impl Company {
    /// A fresh, unsynced company with the internal defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CompanyId::new(0),
            billing_client_id: None,
            crm_org_id: None,
            created_at: Utc::now(),
            name: name.into(),
            billing_status: BillingStatus::PendingEmailConf,
            price_plan: PricePlan::Payg,
            country: None,
            website: None,
            currency: None,
            estimated_income: None,
            paid_invoice_count: 0,
            has_booked_call: false,
            disallowed: false,
            is_deleted: false,
            sales_person_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Contact {
    pub id: ContactId,
    pub billing_recipient_id: Option<RemoteId>,
    pub crm_person_id: Option<RemoteId>,
    pub first_name: Option<String>,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_id: CompanyId,
    pub is_deleted: bool,
}

impl Contact {
    pub fn new(company_id: CompanyId, last_name: impl Into<String>) -> Self {
        Self {
            id: ContactId::new(0),
            billing_recipient_id: None,
            crm_person_id: None,
            first_name: None,
            last_name: last_name.into(),
            email: None,
            phone: None,
            company_id,
            is_deleted: false,
        }
    }

    pub fn name(&self) -> String {
        match &self.first_name {
            Some(first) if !first.is_empty() => format!("{first} {}", self.last_name),
            _ => self.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deal {
    pub id: DealId,
    pub crm_deal_id: Option<RemoteId>,
    pub name: String,
    pub status: DealStatus,
    pub company_id: CompanyId,
    pub contact_id: Option<ContactId>,
    pub pipeline_id: PipelineId,
    pub stage_id: Option<StageId>,
    pub admin_id: Option<AdminId>,
    // Snapshot of the owning company at creation time, pushed to the CRM as
    // deal-level custom fields. Not kept in sync with the company row.
    pub price_plan: Option<String>,
    pub website: Option<String>,
    pub estimated_income: Option<String>,
    pub paid_invoice_count: i64,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: PipelineId,
    pub crm_pipeline_id: RemoteId,
    pub name: String,
    pub entry_stage_id: Option<StageId>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub id: StageId,
    pub crm_stage_id: RemoteId,
    pub name: String,
}

/// Which pipeline new deals land in, per price plan. Operator-maintained;
/// absence is a configuration error surfaced synchronously to callers that
/// need to create a deal.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub payg_pipeline_id: Option<PipelineId>,
    pub startup_pipeline_id: Option<PipelineId>,
    pub enterprise_pipeline_id: Option<PipelineId>,
}

impl SyncConfig {
    pub fn pipeline_for_plan(&self, plan: PricePlan) -> Option<PipelineId> {
        match plan {
            PricePlan::Payg => self.payg_pipeline_id,
            PricePlan::Startup => self.startup_pipeline_id,
            PricePlan::Enterprise => self.enterprise_pipeline_id,
        }
    }
}
