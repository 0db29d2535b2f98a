#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use warden_kernel::{
    ClearanceRegistry, InMemoryReputation, InMemoryShardVault, Policy, RecordingContainment,
    ReputationHandle,
};
use warden_memory::SqliteDeferredQueue;
use warden_middleware::EventBus;
use warden_runtime::{
    AgentPool, Components, KernelService, NotarizationSink, ScriptedAgent, SinkError, SubAgent,
};
use warden_types::{CriticalityIndex, IntentRequest, NotarizationAnchor, NotarizationRequest};

/// Three independent clauses: shardable into three fragments.
pub const CRITICAL_PAYLOAD: &str =
    "Reroute coolant through loop B. Open valve 7 halfway. Notify the shift lead.";

/// Sink that records every request and either anchors or refuses.
#[derive(Default)]
pub struct RecordingSink {
    pub requests: Mutex<Vec<NotarizationRequest>>,
    pub refuse: bool,
}

impl RecordingSink {
    pub fn refusing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            refuse: true,
        }
    }

    pub fn requests(&self) -> Vec<NotarizationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotarizationSink for RecordingSink {
    async fn anchor(&self, request: &NotarizationRequest) -> Result<NotarizationAnchor, SinkError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.refuse {
            Err(SinkError::Unreachable("notary offline".into()))
        } else {
            Ok(NotarizationAnchor(format!("anchor:{}", &request.fingerprint[..12])))
        }
    }
}

pub struct Harness {
    pub service: KernelService,
    pub vault: Arc<InMemoryShardVault>,
    pub containment: Arc<RecordingContainment>,
    pub sink: Arc<RecordingSink>,
    pub deferred: Arc<SqliteDeferredQueue>,
    pub bus: EventBus,
}

pub fn harness(policy: Policy, agents: &[Arc<ScriptedAgent>], sink: RecordingSink) -> Harness {
    harness_with_reputation(policy, agents, sink, Arc::new(InMemoryReputation::new()))
}

pub fn harness_with_reputation(
    policy: Policy,
    agents: &[Arc<ScriptedAgent>],
    sink: RecordingSink,
    reputation: ReputationHandle,
) -> Harness {
    let mut pool = AgentPool::new();
    let mut clearance = ClearanceRegistry::new();
    for agent in agents {
        pool.register_shared(agent.clone());
        clearance.grant(agent.id(), CriticalityIndex::Ci5);
    }
    let vault = Arc::new(InMemoryShardVault::new());
    let containment = Arc::new(RecordingContainment::new());
    let sink = Arc::new(sink);
    let deferred = Arc::new(SqliteDeferredQueue::open_in_memory().unwrap());
    let bus = EventBus::default();
    let components = Components {
        agents: pool,
        clearance,
        reputation,
        vault: vault.clone(),
        deferred: deferred.clone(),
        sink: sink.clone(),
        containment: containment.clone(),
        bus: bus.clone(),
    };
    Harness {
        service: KernelService::start(policy, components).unwrap(),
        vault,
        containment,
        sink,
        deferred,
        bus,
    }
}

/// `dim`-long vector with a single 1.0 at `hot`.  Distinct one-hot vectors
/// correlate at `-1/(dim-1)`.
pub fn one_hot(hot: usize, dim: usize) -> Vec<f64> {
    (0..dim).map(|i| if i == hot { 1.0 } else { 0.0 }).collect()
}

pub fn agent(id: &str, action: &str, risk: f64, features: Vec<f64>) -> Arc<ScriptedAgent> {
    Arc::new(ScriptedAgent::proposing(id, action, risk, features))
}

pub fn request(payload: &str, severity: u8, likelihood: u8) -> IntentRequest {
    IntentRequest {
        payload: payload.to_string(),
        domain: None,
        requester: "control-room".to_string(),
        severity: Some(severity),
        likelihood: Some(likelihood),
        emergency: false,
        constraints: vec![],
    }
}

/// Policy with fast notary retries.
pub fn policy() -> Policy {
    let mut policy = Policy::baseline();
    policy.notary.base_delay_ms = 1;
    policy
}
