//! `warden-runtime` – Pipeline Execution
//!
//! Drives intents through the governance pipeline on Tokio.
//!
//! # Modules
//!
//! - [`pipeline`] – [`Pipeline`][pipeline::Pipeline]: the staged
//!   orchestrator.  Owns the per-run mode latch, spawns one task per shard,
//!   screens outputs for collusion and wipes the run on a positive verdict.
//! - [`service`] – [`KernelService`][service::KernelService]: submission,
//!   status and the audit journal.
//! - [`agent`] – the [`SubAgent`][agent::SubAgent] trait, an
//!   OpenAI-compatible [`HttpAgent`][agent::HttpAgent] and offline executors.
//! - [`accountability`] – [`Notary`][accountability::Notary]: notarization
//!   with bounded exponential backoff and a durable deferred queue.
//! - [`registry`] – per-run status channels and the journal ring.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] with optional
//!   OTLP export.

pub mod accountability;
pub mod agent;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod telemetry;

pub use accountability::{
    DigestSink, NotarizationOutcome, NotarizationSink, Notary, ReplayReport, SinkError,
};
pub use agent::{AgentError, AgentPool, DigestAgent, HttpAgent, ScriptedAgent, SubAgent};
pub use pipeline::{Components, Pipeline};
pub use registry::RunRegistry;
pub use service::KernelService;
pub use telemetry::{TracerProviderGuard, init_tracing};
