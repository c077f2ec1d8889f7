use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::event::EventBus;
use framewalk_core::traits::{DecisionPort, TraceSink};
use framewalk_core::types::{FieldMap, FillRequest, NodeInstance, ResolvePorts, RunId, Trace};

use crate::resolver::{DepCache, Resolver};
use crate::schema::{GraphSpec, NodeSchema};

/// A run that aborted, with the trace accumulated up to the failure so
/// the caller can see how far it got.
#[derive(Debug)]
pub struct ExecutionError {
    pub error: FramewalkError,
    pub trace: Trace,
}

impl ExecutionError {
    pub fn new(error: FramewalkError, trace: Trace) -> Self {
        Self { error, trace }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} trace entries)", self.error, self.trace.len())
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A run that reached a terminal node.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Full trace; the last entry is the terminal instance.
    pub trace: Trace,
    /// Loop iterations consumed after the start node.
    pub iterations: usize,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

/// Walks a graph from its start node to a terminal node.
///
/// One executor drives exactly one run: the trace and dep cache are
/// allocated fresh in [`run`](GraphExecutor::run) and owned by that call
/// alone. Every decision-port call and dependency resolution is raced
/// against the run's cancellation token.
pub struct GraphExecutor {
    run_id: RunId,
    graph: Arc<GraphSpec>,
    port: Arc<dyn DecisionPort>,
    ports: ResolvePorts,
    event_bus: Arc<EventBus>,
    sink: Option<Arc<dyn TraceSink>>,
    cancel: CancellationToken,
    max_iterations: usize,
}

impl GraphExecutor {
    pub fn new(
        run_id: RunId,
        graph: Arc<GraphSpec>,
        port: Arc<dyn DecisionPort>,
        ports: ResolvePorts,
        event_bus: Arc<EventBus>,
        max_iterations: usize,
    ) -> Self {
        Self {
            run_id,
            graph,
            port,
            ports,
            event_bus,
            sink: None,
            cancel: CancellationToken::new(),
            max_iterations,
        }
    }

    /// Mirror every appended instance into a sink (e.g. the run record).
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drive this run from an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the graph to a terminal node.
    ///
    /// `start_fields` are the caller-supplied plain fields of the start
    /// node; its dependency fields are resolved here, never LM-filled.
    pub async fn run(
        &self,
        start_fields: FieldMap,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let mut trace = Trace::new();
        let mut cache = DepCache::new();

        match self.drive(&mut trace, &mut cache, start_fields).await {
            Ok(iterations) => {
                let total_elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    run_id = %self.run_id,
                    graph = %self.graph.name(),
                    steps = trace.len(),
                    total_elapsed_ms,
                    "Graph run complete"
                );
                Ok(ExecutionResult {
                    trace,
                    iterations,
                    total_elapsed_ms,
                })
            }
            Err(error) => {
                warn!(
                    run_id = %self.run_id,
                    graph = %self.graph.name(),
                    steps = trace.len(),
                    error = %error,
                    "Graph run aborted"
                );
                Err(ExecutionError::new(error, trace))
            }
        }
    }

    async fn drive(
        &self,
        trace: &mut Trace,
        cache: &mut DepCache,
        start_fields: FieldMap,
    ) -> Result<usize> {
        let resolver = Resolver::new(&self.graph, self.ports.clone());

        let mut current = self
            .build_start(&resolver, trace, cache, start_fields)
            .await?;
        self.record(trace, &current).await;

        let mut iterations = 0usize;
        loop {
            let schema = self.graph.schema(current.type_name())?.clone();
            if schema.is_terminal() {
                return Ok(iterations);
            }
            if self.cancel.is_cancelled() {
                return Err(FramewalkError::Cancelled);
            }

            iterations += 1;
            if iterations > self.max_iterations {
                return Err(FramewalkError::MaxIterationsExceeded(self.max_iterations));
            }

            let next = if let Some(logic) = schema.transition() {
                debug!(
                    run_id = %self.run_id,
                    node_type = %schema.name(),
                    "Invoking custom transition logic"
                );
                let produced = self
                    .race_cancel(logic.next(current.clone(), trace.clone()))
                    .await?;
                match produced {
                    None => return Ok(iterations),
                    Some(instance) => self.admit_custom(&schema, instance)?,
                }
            } else {
                let chosen = self.choose_successor(&schema, &current).await?;
                self.fill_node(&resolver, &chosen, trace, cache).await?
            };

            self.record(trace, &next).await;
            current = next;
        }
    }

    /// Construct the start instance from caller-supplied plain fields
    /// plus resolved dependency fields.
    async fn build_start(
        &self,
        resolver: &Resolver<'_>,
        trace: &Trace,
        cache: &mut DepCache,
        start_fields: FieldMap,
    ) -> Result<NodeInstance> {
        let schema = self.graph.start_schema().clone();
        let classification = self.graph.classification(schema.name())?;
        for field in &classification.plain {
            if !start_fields.contains_key(field) {
                return Err(FramewalkError::MissingStartField {
                    node: schema.name().to_string(),
                    field: field.clone(),
                });
            }
        }

        let mut fields = start_fields;
        let resolved = self
            .race_cancel(resolver.resolve_fields(&schema, trace, cache))
            .await?;
        fields.extend(resolved);
        schema.validate_instance(&fields)?;
        Ok(NodeInstance::new(schema.name(), fields))
    }

    /// Pick the next node type. `choose` is skipped entirely when there
    /// is exactly one declared successor.
    async fn choose_successor(
        &self,
        schema: &NodeSchema,
        current: &NodeInstance,
    ) -> Result<String> {
        let candidates = schema.successors().to_vec();
        if candidates.len() == 1 {
            return Ok(candidates.into_iter().next().unwrap_or_default());
        }

        let chosen = self
            .race_cancel(self.port.choose(candidates.clone(), current.fields().clone()))
            .await?;
        if !candidates.contains(&chosen) {
            return Err(FramewalkError::ChoiceNotCandidate {
                chosen,
                candidates: candidates.join(", "),
            });
        }
        debug!(run_id = %self.run_id, chosen = %chosen, "Successor chosen");
        Ok(chosen)
    }

    /// Resolve the chosen type's dependency/recall fields, then have the
    /// decision port produce its plain fields.
    async fn fill_node(
        &self,
        resolver: &Resolver<'_>,
        type_name: &str,
        trace: &Trace,
        cache: &mut DepCache,
    ) -> Result<NodeInstance> {
        let schema = self.graph.schema(type_name)?.clone();
        let resolved = self
            .race_cancel(resolver.resolve_fields(&schema, trace, cache))
            .await?;

        let mut fields = resolved.clone();
        if !schema.plain_decls().is_empty() {
            let request = FillRequest {
                type_name: type_name.to_string(),
                fields: schema.plain_decls(),
                inputs: resolved,
            };
            let plain = self.race_cancel(self.port.fill(request)).await?;
            fields.extend(plain);
        }
        schema.validate_instance(&fields)?;
        Ok(NodeInstance::new(type_name, fields))
    }

    /// A custom-transition instance must name a declared successor and
    /// satisfy that successor's schema.
    fn admit_custom(&self, schema: &NodeSchema, instance: NodeInstance) -> Result<NodeInstance> {
        if !schema
            .successors()
            .iter()
            .any(|s| s == instance.type_name())
        {
            return Err(FramewalkError::ChoiceNotCandidate {
                chosen: instance.type_name().to_string(),
                candidates: schema.successors().join(", "),
            });
        }
        let next_schema = self.graph.schema(instance.type_name())?;
        next_schema.validate_instance(instance.fields())?;
        Ok(instance)
    }

    async fn record(&self, trace: &mut Trace, instance: &NodeInstance) {
        trace.push(instance.clone());
        if let Some(ref sink) = self.sink {
            sink.append(self.run_id.clone(), instance.clone()).await;
        }
        self.event_bus
            .node_produced(self.run_id.clone(), instance.type_name(), trace.len());
        debug!(
            run_id = %self.run_id,
            node_type = %instance.type_name(),
            step = trace.len(),
            "Node appended to trace"
        );
    }

    /// Race a suspension point against cancellation.
    async fn race_cancel<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FramewalkError::Cancelled),
            result = fut => result,
        }
    }
}
