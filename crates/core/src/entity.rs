use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The five entity kinds the reconciliation state machine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Organization,
    Person,
    Deal,
    Pipeline,
    Stage,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Person => "person",
            Self::Deal => "deal",
            Self::Pipeline => "pipeline",
            Self::Stage => "stage",
        }
    }

    /// Wire names as they appear in the CRM webhook `meta.entity` field.
    /// Anything else is ignored by the caller.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organization" => Some(Self::Organization),
            "person" => Some(Self::Person),
            "deal" => Some(Self::Deal),
            "pipeline" => Some(Self::Pipeline),
            "stage" => Some(Self::Stage),
            _ => None,
        }
    }

    /// Pipeline/Stage rows are referenced by internal id from Deals and are
    /// never deleted, even when the CRM reports deletion.
    pub fn ignores_deletion(&self) -> bool {
        matches!(self, Self::Pipeline | Self::Stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    Open,
    Won,
    Lost,
    Deleted,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "open" => Ok(Self::Open),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "deleted" => Ok(Self::Deleted),
            _ => Err(CoreError::InvalidData(format!("unknown deal status: {s}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Lifecycle status of a company as reported by the billing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingStatus {
    PendingEmailConf,
    Trial,
    Active,
    ActiveNotPaying,
    Suspended,
    InArrears,
    Terminated,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingEmailConf => "pending_email_conf",
            Self::Trial => "trial",
            Self::Active => "active",
            Self::ActiveNotPaying => "active-not-paying",
            Self::Suspended => "suspended",
            Self::InArrears => "in-arrears",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending_email_conf" => Ok(Self::PendingEmailConf),
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "active-not-paying" => Ok(Self::ActiveNotPaying),
            "suspended" => Ok(Self::Suspended),
            "in-arrears" => Ok(Self::InArrears),
            "terminated" => Ok(Self::Terminated),
            _ => Err(CoreError::InvalidData(format!(
                "unknown billing status: {s}"
            ))),
        }
    }

    /// Statuses in which a sales deal may still be opened.
    pub fn is_early_stage(&self) -> bool {
        matches!(self, Self::PendingEmailConf | Self::Trial)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricePlan {
    Payg,
    Startup,
    Enterprise,
}

impl PricePlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payg => "payg",
            Self::Startup => "startup",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "payg" => Ok(Self::Payg),
            "startup" => Ok(Self::Startup),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(CoreError::InvalidData(format!("unknown price plan: {s}"))),
        }
    }
}
