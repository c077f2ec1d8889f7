pub mod classify;
pub mod executor;
pub mod resolver;
pub mod schema;

#[cfg(test)]
mod testutil;

pub use classify::{classify, FieldClassification};
pub use executor::{ExecutionError, ExecutionResult, GraphExecutor};
pub use resolver::{DepCache, Resolver};
pub use schema::{DependencyRegistry, FieldKind, FieldSpec, GraphBuilder, GraphSpec, NodeSchema};
