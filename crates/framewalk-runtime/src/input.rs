use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::event::EventBus;
use framewalk_core::traits::InputPort;
use framewalk_core::types::{RunId, RunState};

use crate::registry::SharedRecord;

/// A question published to collaborators while its run is `Waiting`.
#[derive(Debug, Clone)]
pub struct PendingQuestion {
    pub run_id: RunId,
    pub question: String,
    pub asked_at: DateTime<Utc>,
}

/// Result of routing a response to a waiting run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// The response resolved this run's pending question.
    Delivered(RunId),
    /// No run with that identity is waiting (late or stale delivery).
    NotPending,
    /// No identity was given and more than one run is waiting.
    Ambiguous(usize),
}

/// Routes human responses to suspended runs via single-use oneshot
/// channels. One pending question per run at most; a delivered response
/// resolves exactly one run.
pub struct InputBroker {
    pending: Mutex<HashMap<RunId, (PendingQuestion, oneshot::Sender<String>)>>,
    event_bus: Arc<EventBus>,
}

impl InputBroker {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            event_bus,
        }
    }

    /// Register a question, publish it, and return the receiver to await.
    pub async fn ask(&self, run_id: RunId, question: String) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();

        self.event_bus.question_asked(run_id.clone(), question.clone());

        let entry = PendingQuestion {
            run_id: run_id.clone(),
            question,
            asked_at: Utc::now(),
        };
        self.pending.lock().await.insert(run_id, (entry, tx));
        rx
    }

    /// Route a response. With `target = None` the response goes to the
    /// single waiting run, if there is exactly one.
    pub async fn deliver(&self, target: Option<&RunId>, response: &str) -> DeliverOutcome {
        let mut pending = self.pending.lock().await;

        let key = match target {
            Some(id) => {
                if pending.contains_key(id) {
                    id.clone()
                } else {
                    return DeliverOutcome::NotPending;
                }
            }
            None => match pending.len() {
                0 => return DeliverOutcome::NotPending,
                1 => match pending.keys().next() {
                    Some(id) => id.clone(),
                    None => return DeliverOutcome::NotPending,
                },
                n => return DeliverOutcome::Ambiguous(n),
            },
        };

        if let Some((_question, tx)) = pending.remove(&key) {
            self.event_bus.input_delivered(key.clone());
            // Ignore send error (receiver may have been dropped by a timeout)
            let _ = tx.send(response.to_string());
            DeliverOutcome::Delivered(key)
        } else {
            DeliverOutcome::NotPending
        }
    }

    /// Drop a pending question without resolving it. Used on cancellation
    /// and timeout; a later delivery for this run is `NotPending`.
    pub async fn discard(&self, run_id: &RunId) -> bool {
        self.pending.lock().await.remove(run_id).is_some()
    }

    /// All currently pending questions.
    pub async fn pending_questions(&self) -> Vec<PendingQuestion> {
        self.pending
            .lock()
            .await
            .values()
            .map(|(q, _)| q.clone())
            .collect()
    }

    pub async fn question_for(&self, run_id: &RunId) -> Option<String> {
        self.pending
            .lock()
            .await
            .get(run_id)
            .map(|(q, _)| q.question.clone())
    }
}

/// Per-run [`InputPort`]: suspends the run's dependency resolution until
/// a response is routed to it, the wait times out, or the run is
/// cancelled. Flips the run record between `Waiting` and `Running`.
pub struct RunInputPort {
    run_id: RunId,
    broker: Arc<InputBroker>,
    record: SharedRecord,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl RunInputPort {
    pub fn new(
        run_id: RunId,
        broker: Arc<InputBroker>,
        record: SharedRecord,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            run_id,
            broker,
            record,
            cancel,
            timeout,
        }
    }
}

impl InputPort for RunInputPort {
    fn ask(&self, question: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            debug!(run_id = %self.run_id, question = %question, "Run waiting for input");
            let rx = self
                .broker
                .ask(self.run_id.clone(), question.clone())
                .await;

            {
                let mut record = self.record.lock().await;
                record.state = RunState::Waiting;
                record.question = Some(question);
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(FramewalkError::Cancelled),
                response = wait_with_timeout(rx, self.timeout) => response,
            };

            match result {
                Ok(response) => {
                    let mut record = self.record.lock().await;
                    record.state = RunState::Running;
                    record.question = None;
                    debug!(run_id = %self.run_id, "Input received, run resumed");
                    Ok(response)
                }
                Err(e) => {
                    // The question is dead either way; never resolvable later.
                    self.broker.discard(&self.run_id).await;
                    self.record.lock().await.question = None;
                    Err(e)
                }
            }
        })
    }
}

async fn wait_with_timeout(
    rx: oneshot::Receiver<String>,
    timeout: Option<Duration>,
) -> Result<String> {
    let wait = async { rx.await.map_err(|_| FramewalkError::InputClosed) };
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => Err(FramewalkError::InputTimeout(limit.as_secs())),
        },
        None => wait.await,
    }
}
