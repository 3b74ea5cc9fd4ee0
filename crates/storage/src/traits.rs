use crosslink_core::{AdminId, CompanyId, ContactId, DealId, PipelineId, RemoteId, StageId};

use crate::error::StorageError;
use crate::records::{Admin, Company, Contact, Deal, Pipeline, Stage, SyncConfig};

pub trait Store {
    // Admins
    fn insert_admin(&mut self, admin: &Admin) -> Result<AdminId, StorageError>;
    fn get_admin(&self, id: AdminId) -> Result<Option<Admin>, StorageError>;
    fn admin_by_billing_id(&self, id: RemoteId) -> Result<Option<Admin>, StorageError>;
    fn admin_by_crm_owner_id(&self, id: RemoteId) -> Result<Option<Admin>, StorageError>;
    fn all_admins(&self) -> Result<Vec<Admin>, StorageError>;

    // Companies
    fn insert_company(&mut self, company: &Company) -> Result<CompanyId, StorageError>;
    fn update_company(&mut self, company: &Company) -> Result<(), StorageError>;
    fn get_company(&self, id: CompanyId) -> Result<Option<Company>, StorageError>;
    fn company_by_crm_id(&self, id: RemoteId) -> Result<Option<Company>, StorageError>;
    fn company_by_billing_id(&self, id: RemoteId) -> Result<Option<Company>, StorageError>;
    /// Case-insensitive exact name match against non-deleted companies,
    /// first hit wins. A documented heuristic, not a unique key.
    fn company_by_name_ci(&self, name: &str) -> Result<Option<Company>, StorageError>;
    /// Most recently created non-deleted contact whose email matches any of
    /// the given addresses, yielding its owning company.
    fn company_by_contact_email(&self, emails: &[&str]) -> Result<Option<Company>, StorageError>;

    /// Transactionally move CRM-id ownership to the merge winner: every
    /// loser's slot is cleared and its is_deleted flag set, then the winner
    /// takes the surviving id, all in one transaction.
    fn absorb_company_merge(
        &mut self,
        winner: CompanyId,
        crm_id: RemoteId,
        losers: &[CompanyId],
    ) -> Result<(), StorageError>;
    fn absorb_contact_merge(
        &mut self,
        winner: ContactId,
        crm_id: RemoteId,
        losers: &[ContactId],
    ) -> Result<(), StorageError>;
    fn absorb_deal_merge(
        &mut self,
        winner: DealId,
        crm_id: RemoteId,
        losers: &[DealId],
    ) -> Result<(), StorageError>;

    // Contacts
    fn insert_contact(&mut self, contact: &Contact) -> Result<ContactId, StorageError>;
    fn update_contact(&mut self, contact: &Contact) -> Result<(), StorageError>;
    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;
    fn contact_by_crm_id(&self, id: RemoteId) -> Result<Option<Contact>, StorageError>;
    fn contact_by_billing_id(&self, id: RemoteId) -> Result<Option<Contact>, StorageError>;
    fn contact_by_email_in_company(
        &self,
        company_id: CompanyId,
        email: &str,
    ) -> Result<Option<Contact>, StorageError>;
    fn contact_by_last_name_in_company(
        &self,
        company_id: CompanyId,
        last_name: &str,
    ) -> Result<Option<Contact>, StorageError>;
    fn contacts_for_company(&self, company_id: CompanyId) -> Result<Vec<Contact>, StorageError>;

    // Deals
    fn insert_deal(&mut self, deal: &Deal) -> Result<DealId, StorageError>;
    fn update_deal(&mut self, deal: &Deal) -> Result<(), StorageError>;
    fn get_deal(&self, id: DealId) -> Result<Option<Deal>, StorageError>;
    fn deal_by_crm_id(&self, id: RemoteId) -> Result<Option<Deal>, StorageError>;
    fn open_deals_for_company(&self, company_id: CompanyId) -> Result<Vec<Deal>, StorageError>;

    // Pipelines / Stages (mirrored read-mostly, never deleted)
    fn insert_pipeline(&mut self, pipeline: &Pipeline) -> Result<PipelineId, StorageError>;
    fn update_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), StorageError>;
    fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>, StorageError>;
    fn pipeline_by_crm_id(&self, id: RemoteId) -> Result<Option<Pipeline>, StorageError>;
    fn insert_stage(&mut self, stage: &Stage) -> Result<StageId, StorageError>;
    fn update_stage(&mut self, stage: &Stage) -> Result<(), StorageError>;
    fn get_stage(&self, id: StageId) -> Result<Option<Stage>, StorageError>;
    fn stage_by_crm_id(&self, id: RemoteId) -> Result<Option<Stage>, StorageError>;

    // Config
    fn get_sync_config(&self) -> Result<SyncConfig, StorageError>;
    fn set_sync_config(&mut self, config: &SyncConfig) -> Result<(), StorageError>;
}
