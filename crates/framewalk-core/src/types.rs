use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short identity token for one concurrent graph run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        let full = Uuid::new_v4().simple().to_string();
        Self(full[..8].to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field values are JSON values; `FieldType` narrows what a field accepts.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Declared type of a node field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Bool,
    /// Any JSON value, including objects and arrays.
    Json,
}

impl FieldType {
    /// Structural check of a concrete value against this type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Json => true,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Json => "json",
        };
        write!(f, "{}", s)
    }
}

/// One fully-resolved context frame. Immutable once constructed; owned by
/// the trace that contains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    type_name: String,
    fields: FieldMap,
}

impl NodeInstance {
    pub fn new(type_name: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

/// Ordered, append-only sequence of node instances for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace(Vec<NodeInstance>);

impl Trace {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, instance: NodeInstance) {
        self.0.push(instance);
    }

    pub fn last(&self) -> Option<&NodeInstance> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[NodeInstance] {
        &self.0
    }

    /// Iterate newest-first, the order recall lookup scans in.
    pub fn iter_back(&self) -> impl Iterator<Item = &NodeInstance> {
        self.0.iter().rev()
    }
}

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Waiting,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Declaration of one plain field the decision port must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request for the decision port to populate the plain fields of a chosen
/// node type, given its already-resolved dependency/recall inputs.
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub type_name: String,
    pub fields: Vec<FieldDecl>,
    pub inputs: FieldMap,
}

/// Ports handed to dependency callables during resolution.
#[derive(Clone)]
pub struct ResolvePorts {
    pub input: Arc<dyn crate::traits::InputPort>,
    pub exec: Arc<dyn crate::traits::ExecHost>,
}

impl std::fmt::Debug for ResolvePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvePorts").finish_non_exhaustive()
    }
}

/// Arguments passed to a dependency callable: the resolved values of the
/// callables it declared, keyed by callable name, plus the run's ports.
#[derive(Debug, Clone)]
pub struct DepInputs {
    pub values: FieldMap,
    pub ports: ResolvePorts,
}

/// Run lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run was launched.
    RunLaunched { run_id: RunId, graph: String },
    /// The executor appended an instance to the trace.
    NodeProduced {
        run_id: RunId,
        node_type: String,
        step: usize,
    },
    /// A dependency callable asked for human input.
    QuestionAsked { run_id: RunId, question: String },
    /// A response was routed to a waiting run.
    InputDelivered { run_id: RunId },
    /// The run reached a terminal node.
    RunCompleted { run_id: RunId, steps: usize },
    /// The run aborted with an error.
    RunFailed { run_id: RunId, error: String },
    /// The run was cancelled.
    RunCancelled { run_id: RunId },
}

/// Snapshot of one run, as returned by registry queries.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: RunId,
    pub graph: String,
    pub state: RunState,
    pub steps: usize,
    pub question: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}
