pub mod input;
pub mod logging;
pub mod process;
pub mod registry;

pub use input::{DeliverOutcome, InputBroker, PendingQuestion, RunInputPort};
pub use process::RunExecHost;
pub use registry::{RunRecord, RunRegistry, RunStatus};
