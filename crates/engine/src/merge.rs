use tracing::info;

use crosslink_core::{BackRef, CompanyId, ContactId, DealId, EntityKind, RemoteId};
use crosslink_storage::Store;

use crate::error::EngineError;

/// Absorb a CRM merge notification for the given kind. The back-reference's
/// first id survives; every following id has its external slot cleared and
/// its deleted flag set, transactionally with the winner's id assignment.
/// Single-id and empty back-references are no-ops. Replaying a merge
/// re-asserts the same end state, so the whole operation is idempotent.
pub fn absorb(
    store: &mut dyn Store,
    kind: EntityKind,
    back_ref: &BackRef,
    crm_id: RemoteId,
) -> Result<(), EngineError> {
    let BackRef::Merged { winner, losers } = back_ref else {
        return Ok(());
    };
    info!(
        kind = kind.as_str(),
        winner,
        losers = losers.len(),
        crm_id = crm_id.raw(),
        "absorbing merge"
    );
    match kind {
        EntityKind::Organization => {
            let losers: Vec<CompanyId> = losers.iter().copied().map(CompanyId::new).collect();
            store.absorb_company_merge(CompanyId::new(*winner), crm_id, &losers)?;
        }
        EntityKind::Person => {
            let losers: Vec<ContactId> = losers.iter().copied().map(ContactId::new).collect();
            store.absorb_contact_merge(ContactId::new(*winner), crm_id, &losers)?;
        }
        EntityKind::Deal => {
            let losers: Vec<DealId> = losers.iter().copied().map(DealId::new).collect();
            store.absorb_deal_merge(DealId::new(*winner), crm_id, &losers)?;
        }
        // Pipelines and stages have no merge semantics.
        EntityKind::Pipeline | EntityKind::Stage => {}
    }
    Ok(())
}
