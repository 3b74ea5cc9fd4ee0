use rusqlite::{Connection, OptionalExtension, Row};

use crosslink_core::{
    AdminId, BillingStatus, CompanyId, ContactId, DealId, DealStatus, PipelineId, PricePlan,
    RemoteId, StageId,
};

use crate::error::StorageError;
use crate::records::{Admin, Company, Contact, Deal, Pipeline, Stage, SyncConfig};
use crate::traits::Store;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Tunnel a StorageError through rusqlite's error type inside query_map
/// closures that must return rusqlite::Error.
fn tunnel(e: StorageError) -> rusqlite::Error {
    match e {
        StorageError::Sqlite(sq) => sq,
        other => rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(OpaqueStorageError(other.to_string())),
        ),
    }
}

fn opt_remote(raw: Option<i64>) -> Option<RemoteId> {
    raw.map(RemoteId::new)
}

const COMPANY_COLS: &str = "id, billing_client_id, crm_org_id, created_at, name, billing_status, \
     price_plan, country, website, currency, estimated_income, paid_invoice_count, \
     has_booked_call, disallowed, is_deleted, sales_person_id";

fn read_company(row: &Row) -> Result<Company, rusqlite::Error> {
    let billing_status: String = row.get(5)?;
    let price_plan: String = row.get(6)?;
    Ok(Company {
        id: CompanyId::new(row.get(0)?),
        billing_client_id: opt_remote(row.get(1)?),
        crm_org_id: opt_remote(row.get(2)?),
        created_at: row.get(3)?,
        name: row.get(4)?,
        billing_status: BillingStatus::parse(&billing_status)
            .map_err(|e| tunnel(StorageError::Core(e)))?,
        price_plan: PricePlan::parse(&price_plan).map_err(|e| tunnel(StorageError::Core(e)))?,
        country: row.get(7)?,
        website: row.get(8)?,
        currency: row.get(9)?,
        estimated_income: row.get(10)?,
        paid_invoice_count: row.get(11)?,
        has_booked_call: row.get(12)?,
        disallowed: row.get(13)?,
        is_deleted: row.get(14)?,
        sales_person_id: row.get::<_, Option<i64>>(15)?.map(AdminId::new),
    })
}

const CONTACT_COLS: &str =
    "id, billing_recipient_id, crm_person_id, first_name, last_name, email, phone, \
     company_id, is_deleted";

fn read_contact(row: &Row) -> Result<Contact, rusqlite::Error> {
    Ok(Contact {
        id: ContactId::new(row.get(0)?),
        billing_recipient_id: opt_remote(row.get(1)?),
        crm_person_id: opt_remote(row.get(2)?),
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        company_id: CompanyId::new(row.get(7)?),
        is_deleted: row.get(8)?,
    })
}

const DEAL_COLS: &str = "id, crm_deal_id, name, status, company_id, contact_id, pipeline_id, \
     stage_id, admin_id, price_plan, website, estimated_income, paid_invoice_count";

fn read_deal(row: &Row) -> Result<Deal, rusqlite::Error> {
    let status: String = row.get(3)?;
    Ok(Deal {
        id: DealId::new(row.get(0)?),
        crm_deal_id: opt_remote(row.get(1)?),
        name: row.get(2)?,
        status: DealStatus::parse(&status).map_err(|e| tunnel(StorageError::Core(e)))?,
        company_id: CompanyId::new(row.get(4)?),
        contact_id: row.get::<_, Option<i64>>(5)?.map(ContactId::new),
        pipeline_id: PipelineId::new(row.get(6)?),
        stage_id: row.get::<_, Option<i64>>(7)?.map(StageId::new),
        admin_id: row.get::<_, Option<i64>>(8)?.map(AdminId::new),
        price_plan: row.get(9)?,
        website: row.get(10)?,
        estimated_income: row.get(11)?,
        paid_invoice_count: row.get(12)?,
    })
}

fn read_admin(row: &Row) -> Result<Admin, rusqlite::Error> {
    Ok(Admin {
        id: AdminId::new(row.get(0)?),
        billing_admin_id: opt_remote(row.get(1)?),
        crm_owner_id: opt_remote(row.get(2)?),
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        email: row.get(5)?,
    })
}

const ADMIN_COLS: &str = "id, billing_admin_id, crm_owner_id, first_name, last_name, email";

fn read_pipeline(row: &Row) -> Result<Pipeline, rusqlite::Error> {
    Ok(Pipeline {
        id: PipelineId::new(row.get(0)?),
        crm_pipeline_id: RemoteId::new(row.get(1)?),
        name: row.get(2)?,
        entry_stage_id: row.get::<_, Option<i64>>(3)?.map(StageId::new),
    })
}

fn read_stage(row: &Row) -> Result<Stage, rusqlite::Error> {
    Ok(Stage {
        id: StageId::new(row.get(0)?),
        crm_stage_id: RemoteId::new(row.get(1)?),
        name: row.get(2)?,
    })
}

impl Store for SqliteStore {
    fn insert_admin(&mut self, admin: &Admin) -> Result<AdminId, StorageError> {
        self.conn.execute(
            "INSERT INTO admins (billing_admin_id, crm_owner_id, first_name, last_name, email)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                admin.billing_admin_id.map(|id| id.raw()),
                admin.crm_owner_id.map(|id| id.raw()),
                admin.first_name,
                admin.last_name,
                admin.email,
            ],
        )?;
        Ok(AdminId::new(self.conn.last_insert_rowid()))
    }

    fn get_admin(&self, id: AdminId) -> Result<Option<Admin>, StorageError> {
        let sql = format!("SELECT {ADMIN_COLS} FROM admins WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_admin)
            .optional()?)
    }

    fn admin_by_billing_id(&self, id: RemoteId) -> Result<Option<Admin>, StorageError> {
        let sql = format!("SELECT {ADMIN_COLS} FROM admins WHERE billing_admin_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_admin)
            .optional()?)
    }

    fn admin_by_crm_owner_id(&self, id: RemoteId) -> Result<Option<Admin>, StorageError> {
        let sql = format!("SELECT {ADMIN_COLS} FROM admins WHERE crm_owner_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_admin)
            .optional()?)
    }

    fn all_admins(&self) -> Result<Vec<Admin>, StorageError> {
        let sql = format!("SELECT {ADMIN_COLS} FROM admins ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let admins = stmt
            .query_map([], read_admin)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(admins)
    }

    fn insert_company(&mut self, company: &Company) -> Result<CompanyId, StorageError> {
        self.conn.execute(
            "INSERT INTO companies (billing_client_id, crm_org_id, created_at, name, \
             billing_status, price_plan, country, website, currency, estimated_income, \
             paid_invoice_count, has_booked_call, disallowed, is_deleted, sales_person_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                company.billing_client_id.map(|id| id.raw()),
                company.crm_org_id.map(|id| id.raw()),
                company.created_at,
                company.name,
                company.billing_status.as_str(),
                company.price_plan.as_str(),
                company.country,
                company.website,
                company.currency,
                company.estimated_income,
                company.paid_invoice_count,
                company.has_booked_call,
                company.disallowed,
                company.is_deleted,
                company.sales_person_id.map(|id| id.raw()),
            ],
        )?;
        Ok(CompanyId::new(self.conn.last_insert_rowid()))
    }

    fn update_company(&mut self, company: &Company) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE companies SET billing_client_id = ?1, crm_org_id = ?2, name = ?3, \
             billing_status = ?4, price_plan = ?5, country = ?6, website = ?7, currency = ?8, \
             estimated_income = ?9, paid_invoice_count = ?10, has_booked_call = ?11, \
             disallowed = ?12, is_deleted = ?13, sales_person_id = ?14 WHERE id = ?15",
            rusqlite::params![
                company.billing_client_id.map(|id| id.raw()),
                company.crm_org_id.map(|id| id.raw()),
                company.name,
                company.billing_status.as_str(),
                company.price_plan.as_str(),
                company.country,
                company.website,
                company.currency,
                company.estimated_income,
                company.paid_invoice_count,
                company.has_booked_call,
                company.disallowed,
                company.is_deleted,
                company.sales_person_id.map(|id| id.raw()),
                company.id.raw(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("company {}", company.id)));
        }
        Ok(())
    }

    fn get_company(&self, id: CompanyId) -> Result<Option<Company>, StorageError> {
        let sql = format!("SELECT {COMPANY_COLS} FROM companies WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_company)
            .optional()?)
    }

    fn company_by_crm_id(&self, id: RemoteId) -> Result<Option<Company>, StorageError> {
        let sql = format!("SELECT {COMPANY_COLS} FROM companies WHERE crm_org_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_company)
            .optional()?)
    }

    fn company_by_billing_id(&self, id: RemoteId) -> Result<Option<Company>, StorageError> {
        let sql = format!("SELECT {COMPANY_COLS} FROM companies WHERE billing_client_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_company)
            .optional()?)
    }

    fn company_by_name_ci(&self, name: &str) -> Result<Option<Company>, StorageError> {
        let sql = format!(
            "SELECT {COMPANY_COLS} FROM companies \
             WHERE name = ?1 COLLATE NOCASE AND is_deleted = 0 ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![name], read_company)
            .optional()?)
    }

    fn company_by_contact_email(&self, emails: &[&str]) -> Result<Option<Company>, StorageError> {
        if emails.is_empty() {
            return Ok(None);
        }
        let placeholders = (1..=emails.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        // Compare lowercased on both sides; emails arrive in whatever case
        // the sender typed.
        let sql = format!(
            "SELECT c.{} FROM companies c JOIN contacts ct ON ct.company_id = c.id \
             WHERE lower(ct.email) IN ({placeholders}) \
             AND ct.is_deleted = 0 AND c.is_deleted = 0 \
             ORDER BY ct.id DESC LIMIT 1",
            COMPANY_COLS.replace(", ", ", c."),
        );
        let lowered: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(lowered.iter());
        Ok(stmt.query_row(params, read_company).optional()?)
    }

    fn absorb_company_merge(
        &mut self,
        winner: CompanyId,
        crm_id: RemoteId,
        losers: &[CompanyId],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for loser in losers {
            tx.execute(
                "UPDATE companies SET crm_org_id = NULL, is_deleted = 1 WHERE id = ?1",
                rusqlite::params![loser.raw()],
            )?;
        }
        // Losers are cleared first so the unique slot is free for the winner.
        tx.execute(
            "UPDATE companies SET crm_org_id = ?1, is_deleted = 0 WHERE id = ?2",
            rusqlite::params![crm_id.raw(), winner.raw()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn absorb_contact_merge(
        &mut self,
        winner: ContactId,
        crm_id: RemoteId,
        losers: &[ContactId],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for loser in losers {
            tx.execute(
                "UPDATE contacts SET crm_person_id = NULL, is_deleted = 1 WHERE id = ?1",
                rusqlite::params![loser.raw()],
            )?;
        }
        tx.execute(
            "UPDATE contacts SET crm_person_id = ?1, is_deleted = 0 WHERE id = ?2",
            rusqlite::params![crm_id.raw(), winner.raw()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn absorb_deal_merge(
        &mut self,
        winner: DealId,
        crm_id: RemoteId,
        losers: &[DealId],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for loser in losers {
            tx.execute(
                "UPDATE deals SET crm_deal_id = NULL, status = 'deleted' WHERE id = ?1",
                rusqlite::params![loser.raw()],
            )?;
        }
        tx.execute(
            "UPDATE deals SET crm_deal_id = ?1 WHERE id = ?2",
            rusqlite::params![crm_id.raw(), winner.raw()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn insert_contact(&mut self, contact: &Contact) -> Result<ContactId, StorageError> {
        self.conn.execute(
            "INSERT INTO contacts (billing_recipient_id, crm_person_id, first_name, last_name, \
             email, phone, company_id, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                contact.billing_recipient_id.map(|id| id.raw()),
                contact.crm_person_id.map(|id| id.raw()),
                contact.first_name,
                contact.last_name,
                contact.email,
                contact.phone,
                contact.company_id.raw(),
                contact.is_deleted,
            ],
        )?;
        Ok(ContactId::new(self.conn.last_insert_rowid()))
    }

    fn update_contact(&mut self, contact: &Contact) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE contacts SET billing_recipient_id = ?1, crm_person_id = ?2, first_name = ?3, \
             last_name = ?4, email = ?5, phone = ?6, company_id = ?7, is_deleted = ?8 \
             WHERE id = ?9",
            rusqlite::params![
                contact.billing_recipient_id.map(|id| id.raw()),
                contact.crm_person_id.map(|id| id.raw()),
                contact.first_name,
                contact.last_name,
                contact.email,
                contact.phone,
                contact.company_id.raw(),
                contact.is_deleted,
                contact.id.raw(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("contact {}", contact.id)));
        }
        Ok(())
    }

    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let sql = format!("SELECT {CONTACT_COLS} FROM contacts WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_contact)
            .optional()?)
    }

    fn contact_by_crm_id(&self, id: RemoteId) -> Result<Option<Contact>, StorageError> {
        let sql = format!("SELECT {CONTACT_COLS} FROM contacts WHERE crm_person_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_contact)
            .optional()?)
    }

    fn contact_by_billing_id(&self, id: RemoteId) -> Result<Option<Contact>, StorageError> {
        let sql = format!("SELECT {CONTACT_COLS} FROM contacts WHERE billing_recipient_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_contact)
            .optional()?)
    }

    fn contact_by_email_in_company(
        &self,
        company_id: CompanyId,
        email: &str,
    ) -> Result<Option<Contact>, StorageError> {
        let sql = format!(
            "SELECT {CONTACT_COLS} FROM contacts \
             WHERE company_id = ?1 AND email = ?2 AND is_deleted = 0 ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![company_id.raw(), email], read_contact)
            .optional()?)
    }

    fn contact_by_last_name_in_company(
        &self,
        company_id: CompanyId,
        last_name: &str,
    ) -> Result<Option<Contact>, StorageError> {
        let sql = format!(
            "SELECT {CONTACT_COLS} FROM contacts \
             WHERE company_id = ?1 AND last_name = ?2 COLLATE NOCASE AND is_deleted = 0 \
             ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                rusqlite::params![company_id.raw(), last_name],
                read_contact,
            )
            .optional()?)
    }

    fn contacts_for_company(&self, company_id: CompanyId) -> Result<Vec<Contact>, StorageError> {
        let sql = format!(
            "SELECT {CONTACT_COLS} FROM contacts \
             WHERE company_id = ?1 AND is_deleted = 0 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let contacts = stmt
            .query_map(rusqlite::params![company_id.raw()], read_contact)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    fn insert_deal(&mut self, deal: &Deal) -> Result<DealId, StorageError> {
        self.conn.execute(
            "INSERT INTO deals (crm_deal_id, name, status, company_id, contact_id, pipeline_id, \
             stage_id, admin_id, price_plan, website, estimated_income, paid_invoice_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                deal.crm_deal_id.map(|id| id.raw()),
                deal.name,
                deal.status.as_str(),
                deal.company_id.raw(),
                deal.contact_id.map(|id| id.raw()),
                deal.pipeline_id.raw(),
                deal.stage_id.map(|id| id.raw()),
                deal.admin_id.map(|id| id.raw()),
                deal.price_plan,
                deal.website,
                deal.estimated_income,
                deal.paid_invoice_count,
            ],
        )?;
        Ok(DealId::new(self.conn.last_insert_rowid()))
    }

    fn update_deal(&mut self, deal: &Deal) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE deals SET crm_deal_id = ?1, name = ?2, status = ?3, company_id = ?4, \
             contact_id = ?5, pipeline_id = ?6, stage_id = ?7, admin_id = ?8 WHERE id = ?9",
            rusqlite::params![
                deal.crm_deal_id.map(|id| id.raw()),
                deal.name,
                deal.status.as_str(),
                deal.company_id.raw(),
                deal.contact_id.map(|id| id.raw()),
                deal.pipeline_id.raw(),
                deal.stage_id.map(|id| id.raw()),
                deal.admin_id.map(|id| id.raw()),
                deal.id.raw(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("deal {}", deal.id)));
        }
        Ok(())
    }

    fn get_deal(&self, id: DealId) -> Result<Option<Deal>, StorageError> {
        let sql = format!("SELECT {DEAL_COLS} FROM deals WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_deal)
            .optional()?)
    }

    fn deal_by_crm_id(&self, id: RemoteId) -> Result<Option<Deal>, StorageError> {
        let sql = format!("SELECT {DEAL_COLS} FROM deals WHERE crm_deal_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id.raw()], read_deal)
            .optional()?)
    }

    fn open_deals_for_company(&self, company_id: CompanyId) -> Result<Vec<Deal>, StorageError> {
        let sql = format!(
            "SELECT {DEAL_COLS} FROM deals \
             WHERE company_id = ?1 AND status = 'open' ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let deals = stmt
            .query_map(rusqlite::params![company_id.raw()], read_deal)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(deals)
    }

    fn insert_pipeline(&mut self, pipeline: &Pipeline) -> Result<PipelineId, StorageError> {
        self.conn.execute(
            "INSERT INTO pipelines (crm_pipeline_id, name, entry_stage_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.crm_pipeline_id.raw(),
                pipeline.name,
                pipeline.entry_stage_id.map(|id| id.raw()),
            ],
        )?;
        Ok(PipelineId::new(self.conn.last_insert_rowid()))
    }

    fn update_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE pipelines SET crm_pipeline_id = ?1, name = ?2, entry_stage_id = ?3 \
             WHERE id = ?4",
            rusqlite::params![
                pipeline.crm_pipeline_id.raw(),
                pipeline.name,
                pipeline.entry_stage_id.map(|id| id.raw()),
                pipeline.id.raw(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("pipeline {}", pipeline.id)));
        }
        Ok(())
    }

    fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, crm_pipeline_id, name, entry_stage_id FROM pipelines WHERE id = ?1",
                rusqlite::params![id.raw()],
                read_pipeline,
            )
            .optional()?)
    }

    fn pipeline_by_crm_id(&self, id: RemoteId) -> Result<Option<Pipeline>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, crm_pipeline_id, name, entry_stage_id FROM pipelines \
                 WHERE crm_pipeline_id = ?1",
                rusqlite::params![id.raw()],
                read_pipeline,
            )
            .optional()?)
    }

    fn insert_stage(&mut self, stage: &Stage) -> Result<StageId, StorageError> {
        self.conn.execute(
            "INSERT INTO stages (crm_stage_id, name) VALUES (?1, ?2)",
            rusqlite::params![stage.crm_stage_id.raw(), stage.name],
        )?;
        Ok(StageId::new(self.conn.last_insert_rowid()))
    }

    fn update_stage(&mut self, stage: &Stage) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE stages SET crm_stage_id = ?1, name = ?2 WHERE id = ?3",
            rusqlite::params![stage.crm_stage_id.raw(), stage.name, stage.id.raw()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("stage {}", stage.id)));
        }
        Ok(())
    }

    fn get_stage(&self, id: StageId) -> Result<Option<Stage>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, crm_stage_id, name FROM stages WHERE id = ?1",
                rusqlite::params![id.raw()],
                read_stage,
            )
            .optional()?)
    }

    fn stage_by_crm_id(&self, id: RemoteId) -> Result<Option<Stage>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, crm_stage_id, name FROM stages WHERE crm_stage_id = ?1",
                rusqlite::params![id.raw()],
                read_stage,
            )
            .optional()?)
    }

    fn get_sync_config(&self) -> Result<SyncConfig, StorageError> {
        let config = self
            .conn
            .query_row(
                "SELECT payg_pipeline_id, startup_pipeline_id, enterprise_pipeline_id \
                 FROM sync_config WHERE id = 1",
                [],
                |row| {
                    Ok(SyncConfig {
                        payg_pipeline_id: row.get::<_, Option<i64>>(0)?.map(PipelineId::new),
                        startup_pipeline_id: row.get::<_, Option<i64>>(1)?.map(PipelineId::new),
                        enterprise_pipeline_id: row.get::<_, Option<i64>>(2)?.map(PipelineId::new),
                    })
                },
            )
            .optional()?;
        Ok(config.unwrap_or_default())
    }

    fn set_sync_config(&mut self, config: &SyncConfig) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO sync_config (id, payg_pipeline_id, startup_pipeline_id, \
             enterprise_pipeline_id) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET payg_pipeline_id = excluded.payg_pipeline_id, \
             startup_pipeline_id = excluded.startup_pipeline_id, \
             enterprise_pipeline_id = excluded.enterprise_pipeline_id",
            rusqlite::params![
                config.payg_pipeline_id.map(|id| id.raw()),
                config.startup_pipeline_id.map(|id| id.raw()),
                config.enterprise_pipeline_id.map(|id| id.raw()),
            ],
        )?;
        Ok(())
    }
}

/// Wrapper error type used to tunnel StorageError through rusqlite's error
/// system in query_map closures that must return rusqlite::Error.
#[derive(Debug)]
struct OpaqueStorageError(String);

impl std::fmt::Display for OpaqueStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueStorageError {}
