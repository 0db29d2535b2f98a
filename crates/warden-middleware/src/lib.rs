//! `warden-middleware` – Event Routing
//!
//! Carries kernel events to whoever is listening (CLI, operators, audit
//! sinks) without the pipeline caring who that is.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
