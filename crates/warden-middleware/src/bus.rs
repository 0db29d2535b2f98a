//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber receives
//! every message and a slow subscriber never blocks the pipeline.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::RunLifecycle`] | Stage transitions, mode escalations, run completion |
//! | [`Topic::SecurityIncidents`] | Collusion wipes |
//! | [`Topic::Escalations`] | Runs handed to human review |
//! | [`Topic::Accountability`] | Anchors and deferred notarizations |
//!
//! Every event routed to a topic is also copied to the firehose returned by
//! [`EventBus::subscribe_all`].

use tokio::sync::broadcast;
use tracing::{trace, warn};
use warden_types::{Event, EventPayload, WardenError};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    RunLifecycle,
    SecurityIncidents,
    Escalations,
    Accountability,
}

impl Topic {
    /// The lane an event belongs on.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::StageEntered { .. }
            | EventPayload::ModeEscalated { .. }
            | EventPayload::RunFinished { .. } => Topic::RunLifecycle,
            EventPayload::SecurityIncident(_) => Topic::SecurityIncidents,
            EventPayload::EscalationRequired { .. } => Topic::Escalations,
            EventPayload::NotarizationDeferred { .. } | EventPayload::Anchored { .. } => {
                Topic::Accountability
            }
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    run_lifecycle: broadcast::Sender<Event>,
    security_incidents: broadcast::Sender<Event>,
    escalations: broadcast::Sender<Event>,
    accountability: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus.  `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity);
        let (run_lifecycle, _) = broadcast::channel(capacity);
        let (security_incidents, _) = broadcast::channel(capacity);
        let (escalations, _) = broadcast::channel(capacity);
        let (accountability, _) = broadcast::channel(capacity);
        Self {
            firehose,
            run_lifecycle,
            security_incidents,
            escalations,
            accountability,
        }
    }

    /// Publish `event` to `topic` and the firehose.
    ///
    /// Returns the number of topic receivers handed the event.
    ///
    /// # Errors
    ///
    /// [`WardenError::Channel`] when nobody is subscribed to `topic`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, WardenError> {
        // The firehose is best effort; an empty firehose is normal.
        let _ = self.firehose.send(event.clone());
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| WardenError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Route `event` to the topic its payload belongs on.  Having no
    /// subscribers is not an error here.
    pub fn emit(&self, event: Event) -> usize {
        let topic = Topic::for_payload(&event.payload);
        match self.publish_to(topic, event) {
            Ok(n) => n,
            Err(_) => {
                trace!(?topic, "event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event on every topic.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.firehose.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::RunLifecycle => &self.run_lifecycle,
            Topic::SecurityIncidents => &self.security_incidents,
            Topic::Escalations => &self.escalations,
            Topic::Accountability => &self.accountability,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to one [`Topic`] or to the firehose.
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.
    /// * `Err(RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Like [`recv`](Self::recv) but skips over lag; `None` once the bus is
    /// closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// `None` for the firehose.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}
