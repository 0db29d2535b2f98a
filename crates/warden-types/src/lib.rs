use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Intent intake
// ────────────────────────────────────────────────────────────────────────────

/// Knowledge domain an intent is declared under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Engineering,
    Mathematics,
    Physics,
    ComputerScience,
    Law,
    Medicine,
    Ethics,
    Arts,
    Philosophy,
    Business,
    #[default]
    Unknown,
}

impl Domain {
    /// Keyword-based domain guess used when the requester did not declare one.
    ///
    /// Mathematics wins only when it has strictly more keyword hits than
    /// engineering; everything else falls back to engineering.
    pub fn detect(payload: &str) -> Self {
        const MATH: [&str; 6] = ["theorem", "proof", "equation", "mathematical", "calculate", "algorithm"];
        const ENG: [&str; 6] = ["design", "build", "engineer", "material", "structural", "mechanical"];

        let lower = payload.to_lowercase();
        let math = MATH.iter().filter(|kw| lower.contains(*kw)).count();
        let eng = ENG.iter().filter(|kw| lower.contains(*kw)).count();
        if math > eng {
            Domain::Mathematics
        } else {
            Domain::Engineering
        }
    }
}

/// A constraint the requester declares on acceptable sub-agent results.
/// Checked by the audit stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constraint {
    /// The proposed action must not mention this term (case-insensitive).
    Forbid(String),
    /// The proposed action must mention this term (case-insensitive).
    Require(String),
    /// The proposed action must be at most this many characters long.
    MaxLength(usize),
    /// The self-assessed risk of a proposal must not exceed this value.
    MaxRisk(f64),
}

/// Wire shape of an intent submission.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IntentRequest {
    /// The raw request text.
    pub payload: String,
    /// Declared domain. Detected from the payload when absent.
    #[serde(default)]
    pub domain: Option<Domain>,
    /// Identity of the requester.
    pub requester: String,
    /// Declared severity tier, 1–5.
    #[serde(default)]
    pub severity: Option<u8>,
    /// Declared likelihood tier, 1–5.
    #[serde(default)]
    pub likelihood: Option<u8>,
    /// Declared emergency state. Forces the critical path.
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// An accepted intent. Immutable: fields are only reachable through
/// accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    id: Uuid,
    payload: String,
    domain: Domain,
    requester: String,
    timestamp: DateTime<Utc>,
    severity: Option<u8>,
    likelihood: Option<u8>,
    declared_emergency: bool,
    constraints: Vec<Constraint>,
}

impl Intent {
    /// Accept a submission, stamping it with a fresh id and the current time.
    pub fn accept(request: IntentRequest) -> Self {
        let domain = request
            .domain
            .unwrap_or_else(|| Domain::detect(&request.payload));
        Self {
            id: Uuid::new_v4(),
            payload: request.payload,
            domain,
            requester: request.requester,
            timestamp: Utc::now(),
            severity: request.severity,
            likelihood: request.likelihood,
            declared_emergency: request.emergency,
            constraints: request.constraints,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Option<u8> {
        self.severity
    }

    pub fn likelihood(&self) -> Option<u8> {
        self.likelihood
    }

    pub fn declared_emergency(&self) -> bool {
        self.declared_emergency
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Risk
// ────────────────────────────────────────────────────────────────────────────

/// Composite risk classification, `CI-1` (low) to `CI-5` (existential).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum CriticalityIndex {
    #[serde(rename = "CI-1")]
    Ci1 = 1,
    #[serde(rename = "CI-2")]
    Ci2 = 2,
    #[serde(rename = "CI-3")]
    Ci3 = 3,
    #[serde(rename = "CI-4")]
    Ci4 = 4,
    #[serde(rename = "CI-5")]
    Ci5 = 5,
}

impl CriticalityIndex {
    pub const ALL: [CriticalityIndex; 5] = [
        CriticalityIndex::Ci1,
        CriticalityIndex::Ci2,
        CriticalityIndex::Ci3,
        CriticalityIndex::Ci4,
        CriticalityIndex::Ci5,
    ];

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Ci1),
            2 => Some(Self::Ci2),
            3 => Some(Self::Ci3),
            4 => Some(Self::Ci4),
            5 => Some(Self::Ci5),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CriticalityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CI-{}", self.level())
    }
}

/// ALARP band of a severity × likelihood score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarpStatus {
    BroadlyAcceptable,
    TolerableIfAlarp,
    Unacceptable,
}

impl AlarpStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=6 => Self::BroadlyAcceptable,
            7..=15 => Self::TolerableIfAlarp,
            _ => Self::Unacceptable,
        }
    }
}

/// Execution profile of a pipeline run. `Standard < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Cooperative, reputation-weighted resolution.
    Standard,
    /// Deterministic adversarial resolution; reputation disabled.
    Critical,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Standard => write!(f, "standard"),
            Mode::Critical => write!(f, "critical"),
        }
    }
}

/// Output of the risk classifier. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RiskAssessment {
    pub severity: u8,
    pub likelihood: u8,
    pub classification: CriticalityIndex,
    pub alarp: AlarpStatus,
    pub requires_sharding: bool,
    pub recommended_mode: Mode,
    /// `true` when a semantic trigger in the payload raised the tiers.
    pub triggered: bool,
}

impl RiskAssessment {
    pub fn score(&self) -> u8 {
        self.severity * self.likelihood
    }

    /// Unacceptable risk or an existential classification needs a human
    /// sign-off before the decision is acted on.
    pub fn requires_human_approval(&self) -> bool {
        self.alarp == AlarpStatus::Unacceptable || self.classification == CriticalityIndex::Ci5
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Run lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// Pipeline stage a run is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Accepted,
    Classified,
    ModeSelected,
    Sharding,
    Executing,
    CollusionCheck,
    Audit,
    Synthesis,
    Accountability,
    Done,
}

/// Why a run did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedIntent,
    UnshardableIntent,
    AuditQuorumFailure,
    SynthesisDeadlock,
    NotarizationDeferred,
    /// The kernel shut down before the run finished.
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::MalformedIntent => "malformed_intent",
            FailureKind::UnshardableIntent => "unshardable_intent",
            FailureKind::AuditQuorumFailure => "audit_quorum_failure",
            FailureKind::SynthesisDeadlock => "synthesis_deadlock",
            FailureKind::NotarizationDeferred => "notarization_deferred",
            FailureKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Terminal (or in-flight) status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    /// Fatal to the run, surfaced to the requester without retry.
    Failed(FailureKind),
    /// Fatal to the run and handed to human-in-the-loop review.
    Escalated(FailureKind),
    /// Collusion detected; all shard state discarded. Irreversible.
    Wiped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed(kind) => write!(f, "failed ({kind})"),
            RunStatus::Escalated(kind) => write!(f, "escalated ({kind})"),
            RunStatus::Wiped => write!(f, "wiped"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shards and sub-agent results
// ────────────────────────────────────────────────────────────────────────────

/// A sealed fragment of a task, readable only by its assigned agent.
///
/// A shard carries no reference to sibling shards or to the master plan.
#[derive(Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: Uuid,
    pub run_id: Uuid,
    pub agent_id: String,
    /// Fragment bytes sealed under the assigned agent's key.
    pub sealed: Vec<u8>,
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("run_id", &self.run_id)
            .field("agent_id", &self.agent_id)
            .field("sealed", &format_args!("<{} bytes>", self.sealed.len()))
            .finish()
    }
}

/// A candidate action proposed by a sub-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Proposal {
    pub action: String,
    pub rationale: String,
    /// Self-assessed risk of the action in `[0, 1]`.
    pub risk: f64,
}

/// What a sub-agent returns for its fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentReport {
    pub proposal: Proposal,
    /// Output embedding / timing / content features. Used only for
    /// correlation testing.
    pub features: Vec<f64>,
}

/// A sub-agent result bound to the shard it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub shard_id: Uuid,
    pub agent_id: String,
    pub proposal: Proposal,
    pub features: Vec<f64>,
}

impl AgentOutput {
    pub fn from_report(shard_id: Uuid, agent_id: impl Into<String>, report: AgentReport) -> Self {
        Self {
            shard_id,
            agent_id: agent_id.into(),
            proposal: report.proposal,
            features: report.features,
        }
    }
}

/// Outcome of pairwise correlation testing over a set of outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollusionVerdict {
    pub colluding: bool,
    /// Largest pairwise statistic observed.
    pub statistic: f64,
    /// The pair that produced `statistic`, when at least one pair was tested.
    pub pair: Option<(Uuid, Uuid)>,
}

// ────────────────────────────────────────────────────────────────────────────
// Audit and decision records
// ────────────────────────────────────────────────────────────────────────────

/// Result of one shield check against one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: String,
    pub shard_id: Uuid,
    pub passed: bool,
    pub violation: Option<String>,
}

/// Structural cross-check results for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub outcomes: Vec<CheckOutcome>,
    /// Shards whose outputs passed every check.
    pub accepted: Vec<Uuid>,
    /// Shards that failed a check or never reported.
    pub excluded: Vec<Uuid>,
    /// The surviving proposals reveal a higher risk than classified.
    pub escalate: bool,
}

/// How the synthesis stage arrived at a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    WeightedVote { weight: f64 },
    Adversarial { rounds: u32 },
    Fallback { reason: String },
}

/// What produced a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub assessment: RiskAssessment,
    pub shard_ids: Vec<Uuid>,
    pub audit_fingerprint: String,
}

/// The synthesised final action for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub run_id: Uuid,
    pub action: String,
    pub resolution: Resolution,
    pub mode: Mode,
    pub requires_human_approval: bool,
    pub provenance: Provenance,
    /// Truncated SHA-256 over the decision content.
    pub logic_hash: String,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_fallback(&self) -> bool {
        matches!(self.resolution, Resolution::Fallback { .. })
    }
}

/// Record of a wipe. Never contains shard or output data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub run_id: Uuid,
    pub statistic: f64,
    pub pair: Option<(Uuid, Uuid)>,
    pub shards_discarded: usize,
    pub outputs_discarded: usize,
    pub detected_at: DateTime<Utc>,
}

/// What a notarization request attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotarySubject {
    Decision,
    Incident,
}

/// Immutable summary handed to the external notarization sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotarizationRequest {
    pub run_id: Uuid,
    pub subject: NotarySubject,
    /// SHA-256 hex fingerprint of the decision or incident record.
    pub fingerprint: String,
    pub classification: Option<CriticalityIndex>,
    pub mode: Mode,
    pub requested_at: DateTime<Utc>,
}

/// Opaque anchor returned by the notarization sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarizationAnchor(pub String);

/// Directive sent to the containment interface.
///
/// The kernel never locks: a lock directive is deliberately not
/// representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentSignal {
    Unlock,
    NoSignal,
}

/// Externally visible view of a run. Carries no shard data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub stage: Stage,
    pub mode: Option<Mode>,
    pub status: RunStatus,
    pub classification: Option<CriticalityIndex>,
    pub decision: Option<Decision>,
    pub anchor: Option<NotarizationAnchor>,
    pub incident: Option<IncidentRecord>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn pending(run_id: Uuid) -> Self {
        Self {
            run_id,
            stage: Stage::Accepted,
            mode: None,
            status: RunStatus::Pending,
            classification: None,
            decision: None,
            anchor: None,
            incident: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// One compact line of the kernel's audit journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub run_id: Uuid,
    pub classification: Option<CriticalityIndex>,
    pub domain: Domain,
    pub status: RunStatus,
    pub logic_hash: Option<String>,
    /// First 16 hex characters of the payload digest.
    pub input_hash: String,
    pub timestamp: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the kernel event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "warden-runtime::pipeline"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    StageEntered { run_id: Uuid, stage: Stage },
    ModeEscalated { run_id: Uuid, reason: String },
    RunFinished { run_id: Uuid, status: RunStatus },
    /// A wipe happened. Reported as a security event, not a failure.
    SecurityIncident(IncidentRecord),
    /// Human-in-the-loop review is required for this run.
    EscalationRequired { run_id: Uuid, kind: FailureKind, details: String },
    NotarizationDeferred { run_id: Uuid, attempts: u32 },
    Anchored { run_id: Uuid, anchor: NotarizationAnchor },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning the pipeline taxonomy and ambient failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WardenError {
    #[error("Malformed intent: {0}")]
    MalformedIntent(String),

    #[error("Unshardable intent: {0}")]
    UnshardableIntent(String),

    #[error("Audit quorum failure: {accepted} accepted output(s), {required} required")]
    AuditQuorumFailure { accepted: usize, required: usize },

    #[error("Synthesis deadlock after {rounds} round(s)")]
    SynthesisDeadlock { rounds: u32 },

    #[error("Notarization deferred: {0}")]
    NotarizationDeferred(String),

    #[error("Run {run_id} wiped after collusion detection")]
    Wiped { run_id: Uuid },

    #[error("Agent {agent_id} not cleared for {classification}")]
    Unauthorized {
        agent_id: String,
        classification: CriticalityIndex,
    },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sub-agent error: {0}")]
    Agent(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WardenError {
    /// Map a pipeline error to the run status it produces.
    pub fn run_status(&self) -> RunStatus {
        match self {
            WardenError::Wiped { .. } => RunStatus::Wiped,
            WardenError::MalformedIntent(_) => RunStatus::Failed(FailureKind::MalformedIntent),
            WardenError::UnshardableIntent(_) => RunStatus::Failed(FailureKind::UnshardableIntent),
            WardenError::AuditQuorumFailure { .. } => {
                RunStatus::Escalated(FailureKind::AuditQuorumFailure)
            }
            WardenError::SynthesisDeadlock { .. } => {
                RunStatus::Escalated(FailureKind::SynthesisDeadlock)
            }
            WardenError::NotarizationDeferred(_) => {
                RunStatus::Failed(FailureKind::NotarizationDeferred)
            }
            _ => RunStatus::Failed(FailureKind::Aborted),
        }
    }

    /// `true` for errors that hand the run to human review.
    pub fn requires_review(&self) -> bool {
        matches!(self.run_status(), RunStatus::Escalated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payload: &str) -> IntentRequest {
        IntentRequest {
            payload: payload.to_string(),
            domain: None,
            requester: "operator".to_string(),
            severity: Some(2),
            likelihood: Some(3),
            emergency: false,
            constraints: vec![],
        }
    }

    #[test]
    fn criticality_index_serializes_as_ci_label() {
        let json = serde_json::to_string(&CriticalityIndex::Ci5).unwrap();
        assert_eq!(json, "\"CI-5\"");
        let back: CriticalityIndex = serde_json::from_str("\"CI-3\"").unwrap();
        assert_eq!(back, CriticalityIndex::Ci3);
        assert_eq!(CriticalityIndex::Ci4.to_string(), "CI-4");
    }

    #[test]
    fn criticality_index_from_level_rejects_out_of_range() {
        assert_eq!(CriticalityIndex::from_level(1), Some(CriticalityIndex::Ci1));
        assert_eq!(CriticalityIndex::from_level(0), None);
        assert_eq!(CriticalityIndex::from_level(6), None);
    }

    #[test]
    fn alarp_bands() {
        assert_eq!(AlarpStatus::from_score(6), AlarpStatus::BroadlyAcceptable);
        assert_eq!(AlarpStatus::from_score(7), AlarpStatus::TolerableIfAlarp);
        assert_eq!(AlarpStatus::from_score(15), AlarpStatus::TolerableIfAlarp);
        assert_eq!(AlarpStatus::from_score(16), AlarpStatus::Unacceptable);
    }

    #[test]
    fn mode_orders_standard_below_critical() {
        assert!(Mode::Standard < Mode::Critical);
    }

    #[test]
    fn domain_detection_prefers_mathematics_on_more_hits() {
        assert_eq!(
            Domain::detect("Prove the theorem with a proof by induction"),
            Domain::Mathematics
        );
        assert_eq!(Domain::detect("Design a bracket"), Domain::Engineering);
        assert_eq!(Domain::detect("hello"), Domain::Engineering);
    }

    #[test]
    fn intent_accept_keeps_declared_domain() {
        let mut req = request("Prove the theorem");
        req.domain = Some(Domain::Law);
        let intent = Intent::accept(req);
        assert_eq!(intent.domain(), Domain::Law);
        assert_eq!(intent.severity(), Some(2));
        assert!(!intent.declared_emergency());
    }

    #[test]
    fn intent_request_defaults_optional_fields() {
        let req: IntentRequest =
            serde_json::from_str(r#"{"payload":"Design a bridge.","requester":"ops"}"#).unwrap();
        assert!(req.severity.is_none());
        assert!(!req.emergency);
        assert!(req.constraints.is_empty());
    }

    #[test]
    fn constraint_uses_tagged_representation() {
        let json = serde_json::to_string(&Constraint::Forbid("detonate".into())).unwrap();
        assert_eq!(json, r#"{"kind":"forbid","value":"detonate"}"#);
    }

    #[test]
    fn shard_debug_hides_sealed_bytes() {
        let shard = Shard {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            agent_id: "agent-1".into(),
            sealed: vec![0xAB; 12],
        };
        let dbg = format!("{shard:?}");
        assert!(dbg.contains("<12 bytes>"));
    }

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Wiped.is_terminal());
        assert!(RunStatus::Escalated(FailureKind::SynthesisDeadlock).is_terminal());
    }

    #[test]
    fn error_maps_to_run_status() {
        assert_eq!(
            WardenError::Wiped { run_id: Uuid::nil() }.run_status(),
            RunStatus::Wiped
        );
        assert_eq!(
            WardenError::MalformedIntent("x".into()).run_status(),
            RunStatus::Failed(FailureKind::MalformedIntent)
        );
        let deadlock = WardenError::SynthesisDeadlock { rounds: 3 };
        assert!(deadlock.requires_review());
        assert!(!WardenError::UnshardableIntent("x".into()).requires_review());
    }

    #[test]
    fn warden_error_display() {
        let err = WardenError::AuditQuorumFailure {
            accepted: 1,
            required: 2,
        };
        assert!(err.to_string().contains("1 accepted"));
    }

    #[test]
    fn run_status_roundtrip() {
        let status = RunStatus::Escalated(FailureKind::AuditQuorumFailure);
        let json = serde_json::to_string(&status).unwrap();
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
