//! Sub-agent executors.
//!
//! A [`SubAgent`] receives the plaintext of exactly one fragment and answers
//! with an [`AgentReport`].  It never sees the shard id of a sibling, the
//! master plan, or the run's other outputs.
//!
//! | Executor | Use |
//! |---|---|
//! | [`HttpAgent`] | OpenAI-compatible chat-completions endpoint (e.g. Ollama) |
//! | [`DigestAgent`] | Offline deterministic agent for dry runs |
//! | [`ScriptedAgent`] | Canned replies, optional delay or failure |
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_runtime::agent::{AgentPool, HttpAgent};
//!
//! let mut pool = AgentPool::new();
//! pool.register(HttpAgent::new("analyst-1", "http://localhost:11434", "llama3"));
//! assert!(pool.contains("analyst-1"));
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use warden_types::{AgentReport, Proposal, WardenError};

/// Number of features every built-in executor reports.
pub const FEATURE_DIMENSION: usize = 16;

/// Instructions sent with every fragment to a model-backed agent.
pub const AGENT_INSTRUCTIONS: &str = "\
You are one examiner in a panel reviewing part of a task. You only see a \
fragment of it. Propose a single concrete action for the fragment, explain \
it in one or two sentences, and rate the risk of the action between 0 \
(harmless) and 1 (catastrophic). Answer with JSON only.";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum AgentError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The model answered with something other than a proposal.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The agent declined the fragment.
    #[error("Agent refused: {0}")]
    Refused(String),
}

impl From<AgentError> for WardenError {
    fn from(err: AgentError) -> Self {
        WardenError::Agent(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait and pool
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SubAgent: Send + Sync {
    fn id(&self) -> &str;

    /// Examine one fragment.
    async fn examine(&self, fragment: &str) -> Result<AgentReport, AgentError>;
}

/// Registered sub-agents keyed by identity.
#[derive(Clone, Default)]
pub struct AgentPool {
    agents: BTreeMap<String, Arc<dyn SubAgent>>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent`, replacing any agent with the same id.
    pub fn register(&mut self, agent: impl SubAgent + 'static) {
        self.register_shared(Arc::new(agent));
    }

    pub fn register_shared(&mut self, agent: Arc<dyn SubAgent>) {
        self.agents.insert(agent.id().to_string(), agent);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SubAgent>> {
        self.agents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Map `text` to [`FEATURE_DIMENSION`] values in `[0, 1]` via SHA-256.
///
/// Distinct texts give effectively uncorrelated vectors; identical texts give
/// identical vectors.
pub fn digest_features(text: &str) -> Vec<f64> {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .take(FEATURE_DIMENSION)
        .map(|b| f64::from(*b) / 255.0)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpAgent
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: Role,
    content: String,
}

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// A sub-agent backed by an OpenAI-compatible `/v1/chat/completions`
/// endpoint.
///
/// The [`Proposal`] JSON Schema is sent as `response_format` so the model is
/// forced into a typed reply.  Features are derived locally from the reply
/// text.
pub struct HttpAgent {
    id: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn messages(fragment: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: Role::System,
                content: AGENT_INSTRUCTIONS.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: fragment.to_string(),
            },
        ]
    }
}

/// Parse a model reply into a report.
fn parse_reply(content: &str) -> Result<AgentReport, AgentError> {
    let proposal: Proposal = serde_json::from_str(content.trim())
        .map_err(|e| AgentError::BadResponse(format!("not a proposal: {e}")))?;
    if !(0.0..=1.0).contains(&proposal.risk) {
        return Err(AgentError::BadResponse(format!(
            "risk {} outside [0, 1]",
            proposal.risk
        )));
    }
    let features = digest_features(&format!("{}\n{}", proposal.action, proposal.rationale));
    Ok(AgentReport { proposal, features })
}

#[async_trait]
impl SubAgent for HttpAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn examine(&self, fragment: &str) -> Result<AgentReport, AgentError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let schema =
            serde_json::to_value(schema_for!(Proposal)).unwrap_or(serde_json::Value::Null);
        let messages = Self::messages(fragment);
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: false,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: schema,
            },
        };

        let started = Instant::now();
        let response: ChatResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(agent = %self.id, elapsed_ms = started.elapsed().as_millis() as u64, "model replied");

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AgentError::BadResponse("empty choices array".into()))?;
        parse_reply(&content)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Offline executors
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic offline agent: always proposes `action` at `risk`, with
/// features derived from its own id and the fragment it saw.
pub struct DigestAgent {
    id: String,
    action: String,
    risk: f64,
}

impl DigestAgent {
    pub fn new(id: impl Into<String>, action: impl Into<String>, risk: f64) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            risk,
        }
    }
}

#[async_trait]
impl SubAgent for DigestAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn examine(&self, fragment: &str) -> Result<AgentReport, AgentError> {
        let units = fragment.lines().filter(|l| !l.trim().is_empty()).count();
        Ok(AgentReport {
            proposal: Proposal {
                action: self.action.clone(),
                rationale: format!("{} reviewed {units} unit(s)", self.id),
                risk: self.risk,
            },
            features: digest_features(&format!("{}:{fragment}", self.id)),
        })
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Report(AgentReport),
    Fail(String),
}

/// Agent with a canned reply.  Records every fragment it is shown.
pub struct ScriptedAgent {
    id: String,
    reply: Reply,
    delay: Option<Duration>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(id: impl Into<String>, report: AgentReport) -> Self {
        Self {
            id: id.into(),
            reply: Reply::Report(report),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand for a report built from its parts.
    pub fn proposing(
        id: impl Into<String>,
        action: impl Into<String>,
        risk: f64,
        features: Vec<f64>,
    ) -> Self {
        Self::new(
            id,
            AgentReport {
                proposal: Proposal {
                    action: action.into(),
                    rationale: "scripted".to_string(),
                    risk,
                },
                features,
            },
        )
    }

    /// An agent that always refuses.
    pub fn failing(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reply: Reply::Fail(reason.into()),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fragments shown to this agent so far.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SubAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn examine(&self, fragment: &str) -> Result<AgentReport, AgentError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(fragment.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Reply::Report(report) => Ok(report.clone()),
            Reply::Fail(reason) => Err(AgentError::Refused(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_features_are_stable_and_bounded() {
        let a = digest_features("vent the east loop");
        assert_eq!(a.len(), FEATURE_DIMENSION);
        assert_eq!(a, digest_features("vent the east loop"));
        assert_ne!(a, digest_features("vent the west loop"));
        assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn parse_reply_accepts_proposal_json() {
        let report =
            parse_reply(r#"{"action":"hold","rationale":"nothing to do","risk":0.1}"#).unwrap();
        assert_eq!(report.proposal.action, "hold");
        assert_eq!(report.features.len(), FEATURE_DIMENSION);
    }

    #[test]
    fn parse_reply_rejects_out_of_range_risk() {
        let err = parse_reply(r#"{"action":"hold","rationale":"","risk":1.5}"#).unwrap_err();
        assert!(matches!(err, AgentError::BadResponse(_)));
    }

    #[test]
    fn parse_reply_rejects_prose() {
        assert!(parse_reply("I think we should hold.").is_err());
    }

    #[test]
    fn proposal_schema_lists_fields() {
        let schema = serde_json::to_value(schema_for!(Proposal)).unwrap().to_string();
        assert!(schema.contains("action"));
        assert!(schema.contains("rationale"));
        assert!(schema.contains("risk"));
    }

    #[test]
    fn messages_carry_instructions_then_fragment() {
        let msgs = HttpAgent::messages("Close valve 3.");
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].content, "Close valve 3.");
        let json = serde_json::to_string(&msgs[0]).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn pool_replaces_agents_with_same_id() {
        let mut pool = AgentPool::new();
        pool.register(DigestAgent::new("a", "hold", 0.1));
        pool.register(DigestAgent::new("a", "vent", 0.2));
        pool.register(DigestAgent::new("b", "hold", 0.1));
        assert_eq!(pool.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn digest_agent_features_depend_on_fragment() {
        let agent = DigestAgent::new("a", "hold", 0.1);
        let one = agent.examine("Close valve 3.").await.unwrap();
        let two = agent.examine("Open valve 4.").await.unwrap();
        assert_eq!(one.proposal.action, "hold");
        assert_ne!(one.features, two.features);
    }

    #[tokio::test]
    async fn scripted_agent_records_fragments_and_fails_on_request() {
        let agent = ScriptedAgent::proposing("s", "hold", 0.2, vec![0.1, 0.2]);
        agent.examine("first").await.unwrap();
        assert_eq!(agent.seen(), vec!["first".to_string()]);

        let refusing = ScriptedAgent::failing("f", "offline");
        assert!(matches!(
            refusing.examine("x").await,
            Err(AgentError::Refused(_))
        ));
    }
}
