//! Containment interface – the kernel's only line to physical execution.
//!
//! The kernel emits [`ContainmentSignal::Unlock`] when a decision is cleared
//! for execution and [`ContainmentSignal::NoSignal`] otherwise.  It never
//! locks anything.  Hardware behind this interface fails open if the kernel
//! stops responding; that policy lives with the hardware, not here.

use std::sync::Mutex;

use tracing::info;
use uuid::Uuid;
use warden_types::{ContainmentSignal, WardenError};

pub trait ContainmentInterface: Send + Sync {
    fn signal(&self, run_id: Uuid, signal: ContainmentSignal) -> Result<(), WardenError>;
}

/// Writes every signal to the log and does nothing else.
#[derive(Debug, Default)]
pub struct LoggingContainment;

impl ContainmentInterface for LoggingContainment {
    fn signal(&self, run_id: Uuid, signal: ContainmentSignal) -> Result<(), WardenError> {
        info!(%run_id, ?signal, "containment signal");
        Ok(())
    }
}

/// Keeps every signal in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingContainment {
    signals: Mutex<Vec<(Uuid, ContainmentSignal)>>,
}

impl RecordingContainment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<(Uuid, ContainmentSignal)> {
        self.signals.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Signals emitted for one run.
    pub fn for_run(&self, run_id: Uuid) -> Vec<ContainmentSignal> {
        self.signals()
            .into_iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, s)| s)
            .collect()
    }
}

impl ContainmentInterface for RecordingContainment {
    fn signal(&self, run_id: Uuid, signal: ContainmentSignal) -> Result<(), WardenError> {
        self.signals
            .lock()
            .map_err(|_| WardenError::Storage("containment log poisoned".to_string()))?
            .push((run_id, signal));
        Ok(())
    }
}
