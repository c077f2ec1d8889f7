use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramewalkError {
    // Configuration errors — detected at graph build, never mid-run
    #[error("Graph config error: {0}")]
    Config(String),

    #[error("Cyclic dependency chain: {chain}")]
    CyclicDependency { chain: String },

    #[error("Start node '{node}' declares recall field '{field}'")]
    RecallOnStart { node: String, field: String },

    #[error("Unknown dependency callable '{callable}' for {node}.{field}")]
    UnknownCallable {
        node: String,
        field: String,
        callable: String,
    },

    #[error("Node type '{node}' declares unknown successor '{successor}'")]
    UnknownSuccessor { node: String, successor: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Duplicate field '{field}' on node type '{node}'")]
    DuplicateField { node: String, field: String },

    // Resolution errors — abort the run, carry the partial trace
    #[error("Dependency '{callable}' failed for {node}.{field}: {message}")]
    DependencyFailed {
        node: String,
        field: String,
        callable: String,
        message: String,
    },

    #[error("Recall target not found for {node}.{field}")]
    RecallNotFound { node: String, field: String },

    #[error("Missing caller-supplied value for start field {node}.{field}")]
    MissingStartField { node: String, field: String },

    // Decision errors — same severity as resolution errors
    #[error("Decision port chose '{chosen}', not among candidates [{candidates}]")]
    ChoiceNotCandidate { chosen: String, candidates: String },

    #[error("Filled instance for '{node}' violates schema: {message}")]
    FillSchema { node: String, message: String },

    #[error("Decision port error: {0}")]
    Decision(String),

    // Executor errors
    #[error("Graph exceeded max iterations ({0})")]
    MaxIterationsExceeded(usize),

    // Suspension errors
    #[error("Run cancelled")]
    Cancelled,

    #[error("Timed out after {0}s waiting for input")]
    InputTimeout(u64),

    #[error("Input channel closed before a response arrived")]
    InputClosed,

    // External process errors
    #[error("External command failed: {0}")]
    Exec(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FramewalkError {
    /// Whether this error belongs to the build-time configuration class.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::CyclicDependency { .. }
                | Self::RecallOnStart { .. }
                | Self::UnknownCallable { .. }
                | Self::UnknownSuccessor { .. }
                | Self::UnknownNodeType(_)
                | Self::DuplicateField { .. }
        )
    }

    /// Errors that must pass through the resolver unwrapped, so the
    /// runtime can map them to their own run end states.
    pub fn is_suspension(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::InputTimeout(_) | Self::InputClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, FramewalkError>;
