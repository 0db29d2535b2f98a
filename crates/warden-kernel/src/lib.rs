//! `warden-kernel` – Risk Gating & Resolution
//!
//! The synchronous core of the governance kernel.  Nothing in this crate
//! spawns tasks or talks to the network; `warden-runtime` drives these pieces
//! in order and owns all concurrency.
//!
//! # Modules
//!
//! - [`policy`] – [`Policy`][policy::Policy]: the read-only configuration,
//!   including the 5×5 ALARP matrix, with startup validation.
//! - [`sanity`] – [`SanityFilter`][sanity::SanityFilter]: rejects
//!   too-short payloads and injection patterns.
//! - [`risk_classifier`] – [`RiskClassifier`][risk_classifier::RiskClassifier]:
//!   maps declared severity and likelihood onto a
//!   [`CriticalityIndex`][warden_types::CriticalityIndex]; semantic triggers
//!   raise an intent to `CI-5`.
//! - [`mode_selector`] – [`select_mode`][mode_selector::select_mode] and the
//!   monotonic [`ModeLatch`][mode_selector::ModeLatch].
//! - [`intake_gate`] – [`IntakeGate`][intake_gate::IntakeGate]: sanity,
//!   classification and mode selection in one call.
//! - [`clearance`] – [`ClearanceRegistry`][clearance::ClearanceRegistry]:
//!   which agents may work at which classification.
//! - [`sharding`] – k-of-k blind sharding with sealed fragments and
//!   per-agent [`AgentHandle`][sharding::AgentHandle]s.
//! - [`collusion`] – [`CollusionDetector`][collusion::CollusionDetector]:
//!   pairwise correlation screening of sub-agent outputs.
//! - [`audit`] – [`AuditStage`][audit::AuditStage]: shield checks, quorum
//!   and escalation.
//! - [`synthesis`] – [`SynthesisStage`][synthesis::SynthesisStage]: weighted
//!   vote (standard) or propose/rebut (critical).
//! - [`reputation`] – the injectable [`ReputationStore`][reputation::ReputationStore].
//! - [`vault`] – the [`ShardVault`][vault::ShardVault] with tombstoning
//!   discard.
//! - [`containment`] – the unlock-only
//!   [`ContainmentInterface`][containment::ContainmentInterface].
//! - [`fingerprint`] – SHA-256 fingerprints and logic hashes.

pub mod audit;
pub mod clearance;
pub mod collusion;
pub mod containment;
pub mod fingerprint;
pub mod intake_gate;
pub mod mode_selector;
pub mod policy;
pub mod reputation;
pub mod risk_classifier;
pub mod sanity;
pub mod sharding;
pub mod synthesis;
pub mod vault;

pub use audit::{Assignment, AuditStage, ShieldCheck};
pub use clearance::ClearanceRegistry;
pub use collusion::CollusionDetector;
pub use containment::{ContainmentInterface, LoggingContainment, RecordingContainment};
pub use intake_gate::{Admission, IntakeGate};
pub use mode_selector::{ModeLatch, select_mode};
pub use policy::{Policy, ReputationReset};
pub use reputation::{InMemoryReputation, ReputationHandle, ReputationStore};
pub use risk_classifier::RiskClassifier;
pub use sanity::SanityFilter;
pub use sharding::{AgentHandle, MasterPlan, ShardPlan};
pub use synthesis::{Resolved, SynthesisStage};
pub use vault::{DiscardReport, InMemoryShardVault, ShardVault};
