use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use framewalk_core::config::RuntimeConfig;
use framewalk_core::error::FramewalkError;
use framewalk_core::event::EventBus;
use framewalk_core::traits::{DecisionPort, TraceSink};
use framewalk_core::types::{
    FieldMap, NodeInstance, ResolvePorts, RunId, RunState, RunSummary, Trace,
};
use framewalk_graph::{GraphExecutor, GraphSpec};

use crate::input::{DeliverOutcome, InputBroker, RunInputPort};
use crate::process::RunExecHost;

/// Lifecycle record for one run. Retained after completion for
/// inspection until explicitly archived.
#[derive(Debug)]
pub struct RunRecord {
    pub id: RunId,
    pub graph: String,
    pub state: RunState,
    /// Snapshot mirror of the executor-owned trace.
    pub trace: Trace,
    /// The pending question while `Waiting`.
    pub question: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunRecord {
    fn new(id: RunId, graph: String) -> Self {
        Self {
            id,
            graph,
            state: RunState::Pending,
            trace: Trace::new(),
            question: None,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            graph: self.graph.clone(),
            state: self.state,
            steps: self.trace.len(),
            question: self.question.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }
}

pub type SharedRecord = Arc<Mutex<RunRecord>>;

/// Full snapshot of one run, as returned by [`RunRegistry::status`].
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub id: RunId,
    pub graph: String,
    pub state: RunState,
    pub trace: Trace,
    pub question: Option<String>,
    pub error: Option<String>,
}

struct RecordSink {
    record: SharedRecord,
}

impl TraceSink for RecordSink {
    fn append(&self, _run_id: RunId, instance: NodeInstance) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record.lock().await.trace.push(instance);
        })
    }
}

struct RunHandle {
    record: SharedRecord,
    cancel: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Tracks every concurrent run, multiplexes input delivery to the right
/// pending one, and exposes lifecycle queries. Runs never share trace,
/// dep cache, or a waiting primitive; every mutation here is keyed by
/// run identity.
pub struct RunRegistry {
    runs: Mutex<HashMap<RunId, Arc<RunHandle>>>,
    broker: Arc<InputBroker>,
    port: Arc<dyn DecisionPort>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl RunRegistry {
    pub fn new(
        port: Arc<dyn DecisionPort>,
        event_bus: Arc<EventBus>,
        config: RuntimeConfig,
    ) -> Self {
        let broker = Arc::new(InputBroker::new(event_bus.clone()));
        Self {
            runs: Mutex::new(HashMap::new()),
            broker,
            port,
            event_bus,
            config,
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn broker(&self) -> &Arc<InputBroker> {
        &self.broker
    }

    /// Launch a run of `graph` with the start node's caller-supplied
    /// plain fields. Returns immediately with the run identity; the run
    /// itself proceeds as a background task.
    pub async fn launch(&self, graph: Arc<GraphSpec>, start_fields: FieldMap) -> RunId {
        let run_id = RunId::new();
        let record: SharedRecord = Arc::new(Mutex::new(RunRecord::new(
            run_id.clone(),
            graph.name().to_string(),
        )));
        let cancel = CancellationToken::new();

        let ports = ResolvePorts {
            input: Arc::new(RunInputPort::new(
                run_id.clone(),
                self.broker.clone(),
                record.clone(),
                cancel.clone(),
                self.config.input_timeout(),
            )),
            exec: Arc::new(RunExecHost::new(run_id.clone(), cancel.clone())),
        };

        let executor = GraphExecutor::new(
            run_id.clone(),
            graph.clone(),
            self.port.clone(),
            ports,
            self.event_bus.clone(),
            self.config.max_iterations,
        )
        .with_sink(Arc::new(RecordSink {
            record: record.clone(),
        }))
        .with_cancel(cancel.clone());

        info!(run_id = %run_id, graph = %graph.name(), "Launching graph run");
        self.event_bus.run_launched(run_id.clone(), graph.name());

        let task_record = record.clone();
        let task_bus = self.event_bus.clone();
        let task_id = run_id.clone();
        let join = tokio::spawn(async move {
            task_record.lock().await.state = RunState::Running;

            match executor.run(start_fields).await {
                Ok(result) => {
                    let mut rec = task_record.lock().await;
                    rec.state = RunState::Done;
                    rec.finished_at = Some(Utc::now());
                    task_bus.run_completed(task_id, result.trace.len());
                }
                Err(failure) => {
                    let mut rec = task_record.lock().await;
                    rec.finished_at = Some(Utc::now());
                    rec.question = None;
                    match failure.error {
                        FramewalkError::Cancelled => {
                            rec.state = RunState::Cancelled;
                            task_bus.run_cancelled(task_id);
                        }
                        error => {
                            warn!(run_id = %task_id, error = %error, "Run failed");
                            rec.state = RunState::Failed;
                            rec.error = Some(error.to_string());
                            task_bus.run_failed(task_id, error.to_string());
                        }
                    }
                }
            }
        });

        let handle = Arc::new(RunHandle {
            record,
            cancel,
            join: Mutex::new(Some(join)),
        });
        self.runs.lock().await.insert(run_id.clone(), handle);
        run_id
    }

    /// Route a human response to a waiting run. `target = None` means
    /// "the only waiting run".
    pub async fn deliver(&self, target: Option<&RunId>, response: &str) -> DeliverOutcome {
        self.broker.deliver(target, response).await
    }

    /// Cancel a run by identity. The pending input primitive, if any, is
    /// discarded without resolving, and any external process the run
    /// started is terminated. Returns false for unknown or already
    /// finished runs.
    pub async fn cancel(&self, run_id: &RunId) -> bool {
        let handle = match self.runs.lock().await.get(run_id) {
            Some(h) => h.clone(),
            None => return false,
        };
        if handle.record.lock().await.state.is_final() {
            return false;
        }

        info!(run_id = %run_id, "Cancelling run");
        handle.cancel.cancel();
        self.broker.discard(run_id).await;
        true
    }

    /// Summaries of all tracked runs, oldest first.
    pub async fn list(&self) -> Vec<RunSummary> {
        let handles: Vec<Arc<RunHandle>> = self.runs.lock().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.record.lock().await.summary());
        }
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Current state, trace snapshot, and pending question of one run.
    pub async fn status(&self, run_id: &RunId) -> Option<RunStatus> {
        let handle = self.runs.lock().await.get(run_id).cloned()?;
        let record = handle.record.lock().await;
        Some(RunStatus {
            id: record.id.clone(),
            graph: record.graph.clone(),
            state: record.state,
            trace: record.trace.clone(),
            question: record.question.clone(),
            error: record.error.clone(),
        })
    }

    /// Block until a run's task finishes. Returns false for unknown runs.
    pub async fn wait(&self, run_id: &RunId) -> bool {
        let handle = match self.runs.lock().await.get(run_id) {
            Some(h) => h.clone(),
            None => return false,
        };
        let join = handle.join.lock().await.take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(run_id = %run_id, error = %e, "Run task panicked");
            }
        }
        true
    }

    /// Evict a finished run's record. Returns false while the run is
    /// still in flight.
    pub async fn archive(&self, run_id: &RunId) -> bool {
        let mut runs = self.runs.lock().await;
        let Some(handle) = runs.get(run_id).cloned() else {
            return false;
        };
        if !handle.record.lock().await.state.is_final() {
            return false;
        }
        runs.remove(run_id);
        true
    }
}
