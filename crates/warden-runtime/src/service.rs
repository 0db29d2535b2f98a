//! [`KernelService`] – intent submission and run status.
//!
//! [`submit`](KernelService::submit) returns a run id at once and drives the
//! run on a spawned task; [`status`](KernelService::status) and
//! [`wait`](KernelService::wait) observe it through the [`RunRegistry`].
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_kernel::{ClearanceRegistry, Policy};
//! use warden_runtime::agent::{AgentPool, DigestAgent};
//! use warden_runtime::{Components, KernelService};
//! use warden_types::{CriticalityIndex, IntentRequest};
//!
//! # async fn demo() -> Result<(), warden_types::WardenError> {
//! let mut agents = AgentPool::new();
//! let mut clearance = ClearanceRegistry::new();
//! for id in ["a", "b", "c"] {
//!     agents.register(DigestAgent::new(id, "hold position", 0.2));
//!     clearance.grant(id, CriticalityIndex::Ci5);
//! }
//! let service = KernelService::start(
//!     Policy::baseline(),
//!     Components::in_memory(agents, clearance)?,
//! )?;
//! let run_id = service.submit(IntentRequest {
//!     payload: "Inspect the north gate.".into(),
//!     domain: None,
//!     requester: "ops".into(),
//!     severity: Some(2),
//!     likelihood: Some(2),
//!     emergency: false,
//!     constraints: vec![],
//! })?;
//! let snapshot = service.wait(run_id).await?;
//! println!("{}", snapshot.status);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use schemars::schema_for;
use tracing::info;
use uuid::Uuid;
use warden_kernel::reputation::ReputationRecord;
use warden_kernel::{Policy, ReputationReset};
use warden_middleware::EventBus;
use warden_types::{AuditLogEntry, Intent, IntentRequest, RunSnapshot, WardenError};

use crate::accountability::ReplayReport;
use crate::pipeline::{Components, Pipeline};
use crate::registry::RunRegistry;

pub struct KernelService {
    pipeline: Arc<Pipeline>,
    registry: RunRegistry,
}

impl KernelService {
    /// Validate `policy` and wire the pipeline.
    ///
    /// # Errors
    ///
    /// [`WardenError::InvalidPolicy`] for an invalid policy; storage errors
    /// from a startup reputation reset.
    pub fn start(policy: Policy, components: Components) -> Result<Self, WardenError> {
        policy.validate()?;
        if policy.reputation_reset == ReputationReset::OnStartup {
            components.reputation.reset()?;
            info!("reputation ledger reset at startup");
        }
        info!(
            agents = components.agents.len(),
            critical_threshold = %policy.critical_threshold,
            "kernel service started"
        );
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(Arc::new(policy), components)),
            registry: RunRegistry::default(),
        })
    }

    /// Accept `request` and start its run.
    ///
    /// # Errors
    ///
    /// [`WardenError::Channel`] when called outside a Tokio runtime.
    pub fn submit(&self, request: IntentRequest) -> Result<Uuid, WardenError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WardenError::Channel(format!("no async runtime: {e}")))?;
        let intent = Intent::accept(request);
        let run_id = intent.id();
        self.registry.register(run_id);

        let pipeline = Arc::clone(&self.pipeline);
        let registry = self.registry.clone();
        runtime.spawn(async move {
            pipeline.run(intent, &registry).await;
        });
        info!(%run_id, "intent submitted");
        Ok(run_id)
    }

    pub fn status(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.registry.get(run_id)
    }

    /// Wait until `run_id` reaches a terminal status.
    pub async fn wait(&self, run_id: Uuid) -> Result<RunSnapshot, WardenError> {
        let mut rx = self
            .registry
            .watch(run_id)
            .ok_or_else(|| WardenError::Channel(format!("unknown run {run_id}")))?;
        let snapshot = rx
            .wait_for(|s| s.status.is_terminal())
            .await
            .map_err(|e| WardenError::Channel(e.to_string()))?
            .clone();
        Ok(snapshot)
    }

    /// Submit and wait.
    pub async fn run(&self, request: IntentRequest) -> Result<RunSnapshot, WardenError> {
        let run_id = self.submit(request)?;
        self.wait(run_id).await
    }

    pub fn runs(&self) -> Vec<RunSnapshot> {
        self.registry.runs()
    }

    /// The most recent audit journal lines, oldest first.
    pub fn journal(&self) -> Vec<AuditLogEntry> {
        self.registry.journal()
    }

    pub fn reputation(&self) -> Result<Vec<(String, ReputationRecord)>, WardenError> {
        self.pipeline.reputation().snapshot()
    }

    /// Administrative reset of every agent's reputation.
    pub fn reset_reputation(&self) -> Result<(), WardenError> {
        self.pipeline.reputation().reset()?;
        info!("reputation ledger reset by operator");
        Ok(())
    }

    /// Retry queued notarizations once.
    pub async fn replay_deferred(&self) -> Result<ReplayReport, WardenError> {
        self.pipeline.notary().replay_deferred().await
    }

    pub fn policy(&self) -> &Policy {
        self.pipeline.policy()
    }

    pub fn bus(&self) -> &EventBus {
        self.pipeline.bus()
    }

    /// JSON Schema of [`IntentRequest`].
    pub fn intent_schema() -> serde_json::Value {
        serde_json::to_value(schema_for!(IntentRequest)).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_kernel::ClearanceRegistry;
    use warden_types::{CriticalityIndex, RunStatus};

    use crate::agent::{AgentPool, DigestAgent};

    fn components() -> Components {
        let mut agents = AgentPool::new();
        let mut clearance = ClearanceRegistry::new();
        for id in ["a", "b", "c"] {
            agents.register(DigestAgent::new(id, "hold position", 0.2));
            clearance.grant(id, CriticalityIndex::Ci5);
        }
        Components::in_memory(agents, clearance).unwrap()
    }

    fn request(payload: &str, severity: u8, likelihood: u8) -> IntentRequest {
        IntentRequest {
            payload: payload.to_string(),
            domain: None,
            requester: "ops".to_string(),
            severity: Some(severity),
            likelihood: Some(likelihood),
            emergency: false,
            constraints: vec![],
        }
    }

    #[test]
    fn invalid_policy_is_fatal() {
        let mut policy = Policy::baseline();
        policy.min_quorum = 0;
        assert!(matches!(
            KernelService::start(policy, components()),
            Err(WardenError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn submit_outside_runtime_is_an_error() {
        let service = KernelService::start(Policy::baseline(), components()).unwrap();
        assert!(service.submit(request("Check the pumps.", 1, 1)).is_err());
    }

    #[test]
    fn intent_schema_names_payload() {
        let schema = KernelService::intent_schema().to_string();
        assert!(schema.contains("payload"));
        assert!(schema.contains("requester"));
    }

    #[tokio::test]
    async fn standard_run_completes_and_is_journaled() {
        let service = KernelService::start(Policy::baseline(), components()).unwrap();
        let snapshot = service
            .run(request("Check the pumps. Log the readings.", 2, 2))
            .await
            .unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.decision.unwrap().action, "hold position");

        let journal = service.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].run_id, snapshot.run_id);
        assert_eq!(journal[0].input_hash.len(), 16);
    }

    #[tokio::test]
    async fn malformed_intent_fails_without_retry() {
        let service = KernelService::start(Policy::baseline(), components()).unwrap();
        let snapshot = service.run(request("ok", 2, 2)).await.unwrap();
        assert!(matches!(snapshot.status, RunStatus::Failed(_)));
        assert!(snapshot.decision.is_none());
    }

    #[tokio::test]
    async fn wait_on_unknown_run_is_an_error() {
        let service = KernelService::start(Policy::baseline(), components()).unwrap();
        assert!(service.wait(Uuid::new_v4()).await.is_err());
    }
}
