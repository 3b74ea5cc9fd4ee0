//! Shared integration fixture: an in-memory store, a seeded field mapping
//! registry, and a programmable in-process CRM double.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;

use crosslink_core::{
    AdminId, CompanyId, ContactId, CrmEvent, DealId, EntityKind, FieldMappingRegistry,
    MappingEntry, PipelineId, RemoteId, StageId,
};
use crosslink_engine::{
    BillingAdapter, CrmApi, EngineError, Outcome, OutboundSync, RateLimiter, Reconciler,
    RemoteError, RetryPolicy,
};
use crosslink_storage::{Admin, Company, Pipeline, SqliteStore, Stage, Store, SyncConfig};

/// Mapping entries shaped like a real deployment: opaque hex keys per kind,
/// every kind carrying a back-reference slot.
pub fn seed_registry() -> FieldMappingRegistry {
    let entry = |kind, internal: &str, external: &str| MappingEntry {
        kind,
        internal: internal.to_string(),
        external: external.to_string(),
    };
    FieldMappingRegistry::new(&[
        entry(EntityKind::Organization, "internal_id", "9f2b6c0d8a1e44b7"),
        entry(EntityKind::Organization, "website", "5e1a7c33f09d21c8"),
        entry(EntityKind::Organization, "billing_status", "a80dd94e12bb67f0"),
        entry(EntityKind::Organization, "price_plan", "6c44ab90de3f1175"),
        entry(EntityKind::Organization, "paid_invoice_count", "f3197d02c5ae88b4"),
        entry(EntityKind::Organization, "has_booked_call", "2bd06e81a7c3f945"),
        entry(EntityKind::Person, "internal_id", "b4d1e9aa307cf268"),
        entry(EntityKind::Deal, "internal_id", "03c8f2d7b61e90aa"),
        entry(EntityKind::Deal, "price_plan", "77aa01be4c92d5f3"),
        entry(EntityKind::Deal, "website", "d9b3a6440e17cb82"),
        entry(EntityKind::Deal, "estimated_income", "41f6b08c93da25e1"),
        entry(EntityKind::Deal, "paid_invoice_count", "cc00e1f26b8a43d9"),
    ])
}

/// In-process CRM double. Records live in a map keyed by `(kind, id)`;
/// failures can be queued and are consumed one per call in order.
#[derive(Default)]
pub struct MockCrm {
    records: HashMap<(EntityKind, i64), BTreeMap<String, Value>>,
    next_id: i64,
    fail_queue: VecDeque<Option<RemoteError>>,
    pub creates: usize,
    pub updates: usize,
    pub fetches: usize,
    /// Field map sent by the most recent update call.
    pub last_update: Option<BTreeMap<String, Value>>,
}

impl MockCrm {
    pub fn queue_failure(&mut self, error: RemoteError) {
        self.fail_queue.push_back(Some(error));
    }

    /// Let the next call succeed; used to aim a queued failure at a later
    /// call in a sequence.
    pub fn queue_success(&mut self) {
        self.fail_queue.push_back(None);
    }

    pub fn seed_record(&mut self, kind: EntityKind, id: RemoteId, fields: BTreeMap<String, Value>) {
        self.records.insert((kind, id.raw()), fields);
        self.next_id = self.next_id.max(id.raw());
    }

    pub fn record(&self, kind: EntityKind, id: RemoteId) -> Option<&BTreeMap<String, Value>> {
        self.records.get(&(kind, id.raw()))
    }

    pub fn remove_record(&mut self, kind: EntityKind, id: RemoteId) {
        self.records.remove(&(kind, id.raw()));
    }

    pub fn write_count(&self) -> usize {
        self.creates + self.updates
    }

    fn take_failure(&mut self) -> Option<RemoteError> {
        self.fail_queue.pop_front().flatten()
    }
}

impl CrmApi for MockCrm {
    fn create(
        &mut self,
        kind: EntityKind,
        fields: &BTreeMap<String, Value>,
    ) -> Result<RemoteId, RemoteError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.creates += 1;
        // Fresh ids start above any seeded ones.
        let id = RemoteId::new(self.next_id.max(1000) + 1);
        self.next_id = id.raw();
        self.records.insert((kind, id.raw()), fields.clone());
        Ok(id)
    }

    fn fetch(
        &mut self,
        kind: EntityKind,
        id: RemoteId,
    ) -> Result<BTreeMap<String, Value>, RemoteError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.fetches += 1;
        self.records
            .get(&(kind, id.raw()))
            .cloned()
            .ok_or(RemoteError::Gone)
    }

    fn update(
        &mut self,
        kind: EntityKind,
        id: RemoteId,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), RemoteError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.updates += 1;
        self.last_update = Some(fields.clone());
        let record = self
            .records
            .get_mut(&(kind, id.raw()))
            .ok_or(RemoteError::Gone)?;
        for (k, v) in fields {
            record.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

pub struct TestRig {
    pub store: SqliteStore,
    pub recon: Reconciler,
    pub outbound: OutboundSync<MockCrm>,
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig {
    pub fn new() -> Self {
        // First rig in the process wins; later calls are no-ops.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        let recon = Reconciler::new(seed_registry());
        let outbound = OutboundSync::with_policy(
            MockCrm::default(),
            RateLimiter::new(1000, Duration::from_millis(1)),
            RetryPolicy::immediate(3),
        );
        Self {
            store,
            recon,
            outbound,
        }
    }

    /// Parse and process one CRM webhook delivery.
    pub fn crm_event(&mut self, raw: &str) -> Result<Outcome, EngineError> {
        let event = CrmEvent::from_json(raw)?;
        self.recon.process_event(&mut self.store, &event)
    }

    pub fn crm_batch(&mut self, raws: &[&str]) -> Result<Vec<Outcome>, EngineError> {
        let events = raws
            .iter()
            .map(|raw| CrmEvent::from_json(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.recon.process_batch(&mut self.store, &events))
    }

    pub fn billing_adapter(&self) -> Result<BillingAdapter, EngineError> {
        BillingAdapter::new(&self.store)
    }

    pub fn sync_company(&mut self, id: CompanyId) -> Result<RemoteId, EngineError> {
        self.outbound
            .sync_company(&mut self.store, self.recon.registry(), id)
    }

    pub fn sync_contact(&mut self, id: ContactId) -> Result<RemoteId, EngineError> {
        self.outbound
            .sync_contact(&mut self.store, self.recon.registry(), id)
    }

    pub fn sync_deal(&mut self, id: DealId) -> Result<RemoteId, EngineError> {
        self.outbound
            .sync_deal(&mut self.store, self.recon.registry(), id)
    }

    pub fn seed_admin(&mut self, billing_id: i64, crm_owner_id: i64) -> AdminId {
        self.store
            .insert_admin(&Admin {
                id: AdminId::new(0),
                billing_admin_id: Some(RemoteId::new(billing_id)),
                crm_owner_id: Some(RemoteId::new(crm_owner_id)),
                first_name: "Sam".into(),
                last_name: "Seller".into(),
                email: "sam@sales.example".into(),
            })
            .expect("insert admin")
    }

    /// Insert a stage and a pipeline whose entry stage is that stage.
    pub fn seed_pipeline(&mut self, crm_pipeline_id: i64, crm_stage_id: i64) -> (PipelineId, StageId) {
        let stage = self
            .store
            .insert_stage(&Stage {
                id: StageId::new(0),
                crm_stage_id: RemoteId::new(crm_stage_id),
                name: "New".into(),
            })
            .expect("insert stage");
        let pipeline = self
            .store
            .insert_pipeline(&Pipeline {
                id: PipelineId::new(0),
                crm_pipeline_id: RemoteId::new(crm_pipeline_id),
                name: "Sales".into(),
                entry_stage_id: Some(stage),
            })
            .expect("insert pipeline");
        (pipeline, stage)
    }

    /// Point every price plan at one pipeline.
    pub fn configure_pipelines(&mut self, pipeline: PipelineId) {
        self.store
            .set_sync_config(&SyncConfig {
                payg_pipeline_id: Some(pipeline),
                startup_pipeline_id: Some(pipeline),
                enterprise_pipeline_id: Some(pipeline),
            })
            .expect("set sync config");
    }

    pub fn seed_company(&mut self, name: &str) -> CompanyId {
        self.store
            .insert_company(&Company::new(name))
            .expect("insert company")
    }

    pub fn company(&self, id: CompanyId) -> Company {
        self.store
            .get_company(id)
            .expect("get company")
            .expect("company exists")
    }
}
