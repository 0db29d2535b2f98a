//! [`Pipeline`] – the staged governance orchestrator.
//!
//! One call to [`Pipeline::run`] drives one intent from admission to a
//! terminal [`RunStatus`]:
//!
//! 1. **Intake** – [`IntakeGate`] runs the sanity filter, the risk classifier
//!    and the mode selector.  The run's [`ModeLatch`] is seeded here and can
//!    only be escalated afterwards.
//! 2. **Sharding** – intents that require sharding are cut into `k` sealed
//!    fragments (k from policy); others are replicated whole to `min_quorum`
//!    agents.  Agents come from the clearance registry.
//! 3. **Execution** – one Tokio task per shard, each owning only its shard
//!    and handle.  Every task selects on the run's [`CancellationToken`] and
//!    the per-shard deadline.
//! 4. **Collusion check** – sharded runs screen each output against the ones
//!    already received.  A positive verdict wipes the run immediately.
//! 5. **Audit**, 6. **Synthesis**, 7. **Accountability**, then the
//!    containment unlock.
//!
//! # Wipe
//!
//! Cancel the token, drain the tasks, drop the master plan, escalate the
//! latch, tombstone and discard the vault, verify nothing is retained,
//! publish a security incident and notarize the [`IncidentRecord`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use warden_kernel::fingerprint::{fingerprint, input_hash, logic_hash};
use warden_kernel::sharding::{self, AgentHandle, MasterPlan};
use warden_kernel::{
    Assignment, AuditStage, ClearanceRegistry, CollusionDetector, ContainmentInterface,
    DiscardReport, InMemoryReputation, InMemoryShardVault, IntakeGate, LoggingContainment,
    ModeLatch, Policy, ReputationHandle, Resolved, ShardVault, SynthesisStage,
};
use warden_memory::{DeferredQueue, SqliteDeferredQueue};
use warden_middleware::EventBus;
use warden_types::{
    AgentOutput, AgentReport, AuditLogEntry, AuditRecord, CollusionVerdict, ContainmentSignal,
    Decision, Event, EventPayload, IncidentRecord, Intent, Mode, Provenance, Resolution,
    RiskAssessment, RunSnapshot, RunStatus, Shard, Stage, WardenError,
};

use crate::accountability::{DigestSink, NotarizationOutcome, NotarizationSink, Notary};
use crate::agent::{AgentPool, SubAgent};
use crate::registry::RunRegistry;

const SOURCE: &str = "warden-runtime::pipeline";

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators injected into the pipeline.
pub struct Components {
    pub agents: AgentPool,
    pub clearance: ClearanceRegistry,
    pub reputation: ReputationHandle,
    pub vault: Arc<dyn ShardVault>,
    pub deferred: Arc<dyn DeferredQueue>,
    pub sink: Arc<dyn NotarizationSink>,
    pub containment: Arc<dyn ContainmentInterface>,
    pub bus: EventBus,
}

impl Components {
    /// Volatile stores, the local digest sink and a logging containment
    /// interface.
    pub fn in_memory(agents: AgentPool, clearance: ClearanceRegistry) -> Result<Self, WardenError> {
        Ok(Self {
            agents,
            clearance,
            reputation: Arc::new(InMemoryReputation::new()),
            vault: Arc::new(InMemoryShardVault::new()),
            deferred: Arc::new(SqliteDeferredQueue::open_in_memory()?),
            sink: Arc::new(DigestSink),
            containment: Arc::new(LoggingContainment),
            bus: EventBus::default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shard tasks
// ─────────────────────────────────────────────────────────────────────────────

enum ShardOutcome {
    Reported(AgentReport),
    Failed(String),
    TimedOut,
    Cancelled,
}

struct ShardResult {
    shard_id: Uuid,
    agent_id: String,
    outcome: ShardOutcome,
}

async fn examine(agent: &dyn SubAgent, shard: &Shard, handle: &AgentHandle) -> Result<AgentReport, WardenError> {
    let fragment = handle.open(shard)?;
    Ok(agent.examine(&fragment).await?)
}

async fn execute_shard(
    agent: Arc<dyn SubAgent>,
    shard: Shard,
    handle: AgentHandle,
    cancel: CancellationToken,
    deadline: Duration,
) -> ShardResult {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => ShardOutcome::Cancelled,
        res = tokio::time::timeout(deadline, examine(agent.as_ref(), &shard, &handle)) => match res {
            Ok(Ok(report)) => ShardOutcome::Reported(report),
            Ok(Err(e)) => ShardOutcome::Failed(e.to_string()),
            Err(_) => ShardOutcome::TimedOut,
        },
    };
    ShardResult {
        shard_id: shard.id,
        agent_id: handle.agent_id().to_string(),
        outcome,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-run scope
// ─────────────────────────────────────────────────────────────────────────────

struct RunScope<'a> {
    id: Uuid,
    registry: &'a RunRegistry,
    bus: &'a EventBus,
}

impl RunScope<'_> {
    fn enter(&self, stage: Stage) {
        debug!(run_id = %self.id, ?stage, "entering stage");
        self.registry.update(self.id, |s| s.stage = stage);
        self.bus.emit(Event::new(
            SOURCE,
            EventPayload::StageEntered {
                run_id: self.id,
                stage,
            },
        ));
    }

    fn update(&self, f: impl FnOnce(&mut RunSnapshot)) {
        self.registry.update(self.id, f);
    }

    fn escalate(&self, latch: &mut ModeLatch, reason: String) {
        if latch.escalate(reason.clone()) {
            self.update(|s| s.mode = Some(Mode::Critical));
            self.bus.emit(Event::new(
                SOURCE,
                EventPayload::ModeEscalated {
                    run_id: self.id,
                    reason,
                },
            ));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

pub struct Pipeline {
    policy: Arc<Policy>,
    gate: IntakeGate,
    detector: CollusionDetector,
    audit: AuditStage,
    synthesis: SynthesisStage,
    agents: AgentPool,
    clearance: ClearanceRegistry,
    reputation: ReputationHandle,
    vault: Arc<dyn ShardVault>,
    notary: Arc<Notary>,
    containment: Arc<dyn ContainmentInterface>,
    bus: EventBus,
}

impl Pipeline {
    pub fn new(policy: Arc<Policy>, components: Components) -> Self {
        let notary = Notary::new(
            components.sink,
            components.deferred,
            components.bus.clone(),
            &policy.notary,
        );
        Self {
            gate: IntakeGate::from_policy(&policy),
            detector: CollusionDetector::new(policy.collusion_threshold),
            audit: AuditStage::from_policy(&policy),
            synthesis: SynthesisStage::from_policy(&policy),
            agents: components.agents,
            clearance: components.clearance,
            reputation: components.reputation,
            vault: components.vault,
            notary: Arc::new(notary),
            containment: components.containment,
            bus: components.bus,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn reputation(&self) -> &ReputationHandle {
        &self.reputation
    }

    pub fn notary(&self) -> &Arc<Notary> {
        &self.notary
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Drive `intent` to a terminal status.  The run must already be
    /// registered in `registry`.
    #[instrument(skip_all, fields(run_id = %intent.id()))]
    pub async fn run(&self, intent: Intent, registry: &RunRegistry) -> RunSnapshot {
        let scope = RunScope {
            id: intent.id(),
            registry,
            bus: &self.bus,
        };
        scope.update(|s| s.status = RunStatus::Running);

        let result = self.drive(&intent, &scope).await;
        let (status, error) = match result {
            Ok(status) => (status, None),
            Err(e) => (e.run_status(), Some(e)),
        };

        if status != RunStatus::Completed {
            if let Err(e) = self.containment.signal(scope.id, ContainmentSignal::NoSignal) {
                error!(run_id = %scope.id, error = %e, "containment interface unreachable");
            }
        }
        if status != RunStatus::Wiped {
            if let Err(e) = self.vault.release(scope.id) {
                warn!(run_id = %scope.id, error = %e, "could not release shard storage");
            }
        }
        if let (RunStatus::Escalated(kind), Some(e)) = (status, &error) {
            warn!(run_id = %scope.id, %kind, "run escalated for human review");
            self.bus.emit(Event::new(
                SOURCE,
                EventPayload::EscalationRequired {
                    run_id: scope.id,
                    kind,
                    details: e.to_string(),
                },
            ));
        }

        scope.update(|s| {
            s.status = status;
            s.error = error.as_ref().map(ToString::to_string);
        });
        self.bus.emit(Event::new(
            SOURCE,
            EventPayload::RunFinished {
                run_id: scope.id,
                status,
            },
        ));

        let snapshot = registry
            .get(scope.id)
            .unwrap_or_else(|| RunSnapshot::pending(scope.id));
        registry.record(AuditLogEntry {
            run_id: scope.id,
            classification: snapshot.classification,
            domain: intent.domain(),
            status,
            logic_hash: snapshot.decision.as_ref().map(|d| d.logic_hash.clone()),
            input_hash: input_hash(intent.payload()),
            timestamp: Utc::now(),
        });
        info!(run_id = %scope.id, %status, "run finished");
        snapshot
    }

    async fn drive(&self, intent: &Intent, scope: &RunScope<'_>) -> Result<RunStatus, WardenError> {
        let run_id = scope.id;

        // ── Intake ───────────────────────────────────────────────────────────
        scope.enter(Stage::Classified);
        let admission = self.gate.admit(intent)?;
        let assessment = admission.assessment;
        let classification = assessment.classification;
        scope.update(|s| s.classification = Some(classification));

        scope.enter(Stage::ModeSelected);
        let mut latch = ModeLatch::new(admission.mode);
        scope.update(|s| s.mode = Some(latch.current()));

        // ── Sharding ─────────────────────────────────────────────────────────
        scope.enter(Stage::Sharding);
        let eligible: Vec<String> = self
            .clearance
            .cleared_for(classification)
            .into_iter()
            .filter(|id| self.agents.contains(id))
            .collect();
        let sharded = assessment.requires_sharding;
        let plan = if sharded {
            let k = self.policy.shard_count(classification).ok_or_else(|| {
                WardenError::UnshardableIntent(format!("no shard count for {classification}"))
            })?;
            sharding::shard(intent, k, &eligible)?
        } else {
            sharding::replicate(intent, self.policy.min_quorum, &eligible)?
        };
        let (parts, master) = plan.into_parts();
        let mut assignments = Vec::with_capacity(parts.len());
        for (shard, handle) in &parts {
            self.clearance.check(handle.agent_id(), classification)?;
            self.vault.put_shard(shard)?;
            assignments.push(Assignment {
                shard_id: shard.id,
                agent_id: shard.agent_id.clone(),
            });
        }
        info!(%run_id, shards = assignments.len(), sharded, "task dispatched");

        // ── Execution ────────────────────────────────────────────────────────
        scope.enter(Stage::Executing);
        let token = CancellationToken::new();
        let deadline = Duration::from_millis(self.policy.shard_timeout_ms);
        let mut tasks = JoinSet::new();
        for (shard, handle) in parts {
            let agent = self.agents.get(handle.agent_id()).ok_or_else(|| {
                WardenError::Agent(format!("agent {} is not registered", handle.agent_id()))
            })?;
            tasks.spawn(execute_shard(agent, shard, handle, token.child_token(), deadline));
        }

        let mut received: Vec<AgentOutput> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(%run_id, error = %e, "shard task did not complete");
                    continue;
                }
            };
            let report = match result.outcome {
                ShardOutcome::Reported(report) => report,
                ShardOutcome::Failed(reason) => {
                    warn!(%run_id, shard_id = %result.shard_id, %reason, "sub-agent failed");
                    continue;
                }
                ShardOutcome::TimedOut => {
                    warn!(%run_id, shard_id = %result.shard_id, "sub-agent missed its deadline");
                    continue;
                }
                ShardOutcome::Cancelled => continue,
            };
            let output = AgentOutput::from_report(result.shard_id, result.agent_id, report);
            if sharded {
                let verdict = self.detector.screen(&output, &received);
                if verdict.colluding {
                    drop(received);
                    return Err(self
                        .wipe(scope, &mut latch, verdict, token, &mut tasks, master)
                        .await);
                }
            }
            self.vault.put_output(run_id, &output)?;
            received.push(output);
        }

        if sharded {
            scope.enter(Stage::CollusionCheck);
            let verdict = self.detector.detect(&received);
            if verdict.colluding {
                drop(received);
                return Err(self
                    .wipe(scope, &mut latch, verdict, token, &mut tasks, master)
                    .await);
            }
            debug!(%run_id, statistic = verdict.statistic, "collusion screen clear");
        }
        drop(received);

        // ── Audit ────────────────────────────────────────────────────────────
        scope.enter(Stage::Audit);
        let stored = self.vault.outputs(run_id)?;
        let record = self.audit.audit(&stored, &assignments, intent.constraints())?;
        if record.escalate {
            scope.escalate(
                &mut latch,
                format!(
                    "accepted proposal risk at or above {}",
                    self.policy.escalation_risk
                ),
            );
        }
        let accepted: Vec<AgentOutput> = stored
            .into_iter()
            .filter(|o| record.accepted.contains(&o.shard_id))
            .collect();

        // ── Synthesis ────────────────────────────────────────────────────────
        scope.enter(Stage::Synthesis);
        let mode = latch.current();
        let (resolved, deadlock) =
            match self.synthesis.synthesize(&accepted, mode, self.reputation.as_ref()) {
                Ok(resolved) => (resolved, None),
                Err(e @ WardenError::SynthesisDeadlock { .. }) => {
                    warn!(%run_id, error = %e, "emitting fallback action");
                    (self.synthesis.fallback(e.to_string()), Some(e))
                }
                Err(e) => return Err(e),
            };
        drop(master);
        if mode == Mode::Standard && !resolved.reputation_updates.is_empty() {
            self.reputation.record(&resolved.reputation_updates)?;
        }
        let decision = self.decide(run_id, &assessment, &record, mode, &resolved)?;
        info!(%run_id, action = %decision.action, logic_hash = %decision.logic_hash, "decision emitted");
        scope.update(|s| s.decision = Some(decision.clone()));

        // ── Accountability ───────────────────────────────────────────────────
        scope.enter(Stage::Accountability);
        let request = Notary::decision_request(&decision)?;
        match mode {
            Mode::Critical => match self.notary.notarize(request).await {
                NotarizationOutcome::Anchored(anchor) => {
                    scope.update(|s| s.anchor = Some(anchor));
                }
                NotarizationOutcome::Deferred { queue_id, .. } => {
                    info!(%run_id, queue_id, "decision queued for later notarization");
                }
                NotarizationOutcome::Lost { reason, .. } => {
                    return Err(WardenError::NotarizationDeferred(reason));
                }
            },
            Mode::Standard => {
                let pending = self.notary.dispatch(request);
                let registry = scope.registry.clone();
                tokio::spawn(async move {
                    if let Ok(NotarizationOutcome::Anchored(anchor)) = pending.await {
                        registry.update(run_id, |s| s.anchor = Some(anchor));
                    }
                });
            }
        }

        if let Some(e) = deadlock {
            return Err(e);
        }
        self.containment.signal(run_id, ContainmentSignal::Unlock)?;
        scope.enter(Stage::Done);
        Ok(RunStatus::Completed)
    }

    fn decide(
        &self,
        run_id: Uuid,
        assessment: &RiskAssessment,
        record: &AuditRecord,
        mode: Mode,
        resolved: &Resolved,
    ) -> Result<Decision, WardenError> {
        let provenance = Provenance {
            assessment: assessment.clone(),
            shard_ids: record.accepted.clone(),
            audit_fingerprint: fingerprint(record)?,
        };
        let logic_hash = logic_hash(&(&resolved.action, &resolved.resolution, mode, &provenance))?;
        let fallback = matches!(resolved.resolution, Resolution::Fallback { .. });
        Ok(Decision {
            id: Uuid::new_v4(),
            run_id,
            action: resolved.action.clone(),
            resolution: resolved.resolution.clone(),
            mode,
            requires_human_approval: assessment.requires_human_approval() || fallback,
            provenance,
            logic_hash,
            decided_at: Utc::now(),
        })
    }

    async fn wipe(
        &self,
        scope: &RunScope<'_>,
        latch: &mut ModeLatch,
        verdict: CollusionVerdict,
        token: CancellationToken,
        tasks: &mut JoinSet<ShardResult>,
        master: MasterPlan,
    ) -> WardenError {
        let run_id = scope.id;
        token.cancel();
        while tasks.join_next().await.is_some() {}
        drop(master);
        scope.escalate(latch, "collusion detected".to_string());

        let report = self.vault.discard(run_id).unwrap_or_else(|e| {
            error!(%run_id, error = %e, "discard pass failed");
            DiscardReport::default()
        });
        match self.vault.retained(run_id) {
            Ok(0) => debug!(%run_id, "wipe verified: nothing retained"),
            Ok(n) => error!(%run_id, retained = n, "wipe left shard data behind"),
            Err(e) => error!(%run_id, error = %e, "could not verify wipe"),
        }

        let incident = IncidentRecord {
            run_id,
            statistic: verdict.statistic,
            pair: verdict.pair,
            shards_discarded: report.shards_discarded,
            outputs_discarded: report.outputs_discarded,
            detected_at: Utc::now(),
        };
        warn!(
            %run_id,
            statistic = incident.statistic,
            shards = incident.shards_discarded,
            outputs = incident.outputs_discarded,
            "collusion detected; run wiped"
        );
        scope.update(|s| s.incident = Some(incident.clone()));
        self.bus
            .emit(Event::new(SOURCE, EventPayload::SecurityIncident(incident.clone())));

        match Notary::incident_request(&incident, latch.current()) {
            Ok(request) => {
                if let NotarizationOutcome::Anchored(anchor) = self.notary.notarize(request).await {
                    scope.update(|s| s.anchor = Some(anchor));
                }
            }
            Err(e) => error!(%run_id, error = %e, "incident could not be fingerprinted"),
        }
        WardenError::Wiped { run_id }
    }
}
