use crate::types::{RunEvent, RunId};

/// Notification sink using a tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn run_launched(&self, run_id: RunId, graph: impl Into<String>) {
        self.publish(RunEvent::RunLaunched {
            run_id,
            graph: graph.into(),
        });
    }

    pub fn node_produced(&self, run_id: RunId, node_type: impl Into<String>, step: usize) {
        self.publish(RunEvent::NodeProduced {
            run_id,
            node_type: node_type.into(),
            step,
        });
    }

    pub fn question_asked(&self, run_id: RunId, question: impl Into<String>) {
        self.publish(RunEvent::QuestionAsked {
            run_id,
            question: question.into(),
        });
    }

    pub fn input_delivered(&self, run_id: RunId) {
        self.publish(RunEvent::InputDelivered { run_id });
    }

    pub fn run_completed(&self, run_id: RunId, steps: usize) {
        self.publish(RunEvent::RunCompleted { run_id, steps });
    }

    pub fn run_failed(&self, run_id: RunId, error: impl Into<String>) {
        self.publish(RunEvent::RunFailed {
            run_id,
            error: error.into(),
        });
    }

    pub fn run_cancelled(&self, run_id: RunId) {
        self.publish(RunEvent::RunCancelled { run_id });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
