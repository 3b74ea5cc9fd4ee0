use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// External id slots are nullable and unique when set. Rows are never hard
// deleted: companies/contacts carry is_deleted, deals use status='deleted',
// and pipelines/stages have no deletion path at all.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS admins (
    id INTEGER PRIMARY KEY,
    billing_admin_id INTEGER UNIQUE,
    crm_owner_id INTEGER UNIQUE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY,
    billing_client_id INTEGER UNIQUE,
    crm_org_id INTEGER UNIQUE,
    created_at TEXT NOT NULL,
    name TEXT NOT NULL,
    billing_status TEXT NOT NULL DEFAULT 'pending_email_conf',
    price_plan TEXT NOT NULL DEFAULT 'payg',
    country TEXT,
    website TEXT,
    currency TEXT,
    estimated_income TEXT,
    paid_invoice_count INTEGER NOT NULL DEFAULT 0,
    has_booked_call INTEGER NOT NULL DEFAULT 0,
    disallowed INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    sales_person_id INTEGER REFERENCES admins (id)
);
CREATE INDEX IF NOT EXISTS idx_companies_name ON companies (name COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY,
    billing_recipient_id INTEGER UNIQUE,
    crm_person_id INTEGER UNIQUE,
    first_name TEXT,
    last_name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    company_id INTEGER NOT NULL REFERENCES companies (id),
    is_deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_contacts_company ON contacts (company_id);
CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts (email COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS pipelines (
    id INTEGER PRIMARY KEY,
    crm_pipeline_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    entry_stage_id INTEGER REFERENCES stages (id)
);

CREATE TABLE IF NOT EXISTS stages (
    id INTEGER PRIMARY KEY,
    crm_stage_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deals (
    id INTEGER PRIMARY KEY,
    crm_deal_id INTEGER UNIQUE,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    company_id INTEGER NOT NULL REFERENCES companies (id),
    contact_id INTEGER REFERENCES contacts (id),
    pipeline_id INTEGER NOT NULL REFERENCES pipelines (id),
    stage_id INTEGER REFERENCES stages (id),
    admin_id INTEGER REFERENCES admins (id),
    -- Copied from the owning company at creation time; they drift
    -- independently afterwards.
    price_plan TEXT,
    website TEXT,
    estimated_income TEXT,
    paid_invoice_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_deals_company_status ON deals (company_id, status);

CREATE TABLE IF NOT EXISTS sync_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payg_pipeline_id INTEGER REFERENCES pipelines (id),
    startup_pipeline_id INTEGER REFERENCES pipelines (id),
    enterprise_pipeline_id INTEGER REFERENCES pipelines (id)
);
";
