use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Decision port — selects and populates the next node type.
/// Backed by a language model in production; both operations are
/// suspension points and may take arbitrarily long.
pub trait DecisionPort: Send + Sync + 'static {
    /// Select exactly one successor type from `candidates`, given the
    /// resolved fields of the current node. The result must be a member
    /// of `candidates`.
    fn choose(&self, candidates: Vec<String>, context: FieldMap) -> BoxFuture<'_, Result<String>>;

    /// Produce values for the plain fields declared in the request.
    /// Returned values must satisfy each field's declared type.
    fn fill(&self, request: FillRequest) -> BoxFuture<'_, Result<FieldMap>>;
}

/// A registered callable producing one dependency field value.
///
/// `depends_on` is a static declaration: it names the callables whose
/// resolved values this one consumes, and is what the graph builder
/// analyses for cycles. The resolver guarantees every declared upstream
/// value is present in `DepInputs::values` before `resolve` is invoked.
pub trait DepCallable: Send + Sync + 'static {
    /// Callable identity, the dep-cache key.
    fn name(&self) -> &str;

    /// Names of callables this one depends on.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Produce the value. Invoked at most once per run.
    fn resolve(&self, inputs: DepInputs) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Human-input port — the suspension point for a run.
/// `ask` blocks cooperatively until a response is routed to this run,
/// the wait times out, or the run is cancelled.
pub trait InputPort: Send + Sync + 'static {
    fn ask(&self, question: String) -> BoxFuture<'_, Result<String>>;
}

/// External-process port for dependency callables. Implementations must
/// terminate the child if the owning run is cancelled mid-execution.
pub trait ExecHost: Send + Sync + 'static {
    /// Run a command to completion and return its stdout.
    fn run_command(&self, program: String, args: Vec<String>) -> BoxFuture<'_, Result<String>>;
}

/// Custom transition logic a node type may declare instead of the
/// choose/fill path. Returns the next instance, or `None` for terminal.
pub trait TransitionLogic: Send + Sync + 'static {
    fn next(
        &self,
        current: NodeInstance,
        trace: Trace,
    ) -> BoxFuture<'_, Result<Option<NodeInstance>>>;
}

/// Receives a copy of every instance the executor appends, so the run
/// record can expose the trace while the run is still in flight.
pub trait TraceSink: Send + Sync + 'static {
    fn append(&self, run_id: RunId, instance: NodeInstance) -> BoxFuture<'_, ()>;
}
