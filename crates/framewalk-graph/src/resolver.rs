use std::collections::HashMap;

use futures::future::BoxFuture;
use tracing::debug;

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::types::{DepInputs, FieldMap, FieldType, ResolvePorts, Trace};

use crate::schema::{GraphSpec, NodeSchema};

/// Per-run memo of resolved callable values, keyed by callable identity.
/// Created fresh for every run and never shared; a failed callable is
/// never cached.
#[derive(Debug, Default)]
pub struct DepCache {
    values: HashMap<String, serde_json::Value>,
}

impl DepCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, callable: &str) -> Option<&serde_json::Value> {
        self.values.get(callable)
    }

    pub fn insert(&mut self, callable: String, value: serde_json::Value) {
        self.values.insert(callable, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Produces concrete values for every dependency and recall field of a
/// node instance under construction.
pub struct Resolver<'a> {
    graph: &'a GraphSpec,
    ports: ResolvePorts,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a GraphSpec, ports: ResolvePorts) -> Self {
        Self { graph, ports }
    }

    /// Resolve all dependency and recall fields of `schema`.
    ///
    /// Dependency callables run recursively and memoized through the
    /// cache; independent callables resolve sequentially. Recall fields
    /// scan the trace newest-first for a field with matching name and
    /// type.
    pub async fn resolve_fields(
        &self,
        schema: &NodeSchema,
        trace: &Trace,
        cache: &mut DepCache,
    ) -> Result<FieldMap> {
        let classification = self.graph.classification(schema.name())?;
        let mut out = FieldMap::new();

        for (field, callable) in &classification.dependencies {
            let value = self
                .resolve_callable(callable.clone(), cache)
                .await
                .map_err(|e| wrap_dependency_error(e, schema.name(), field, callable))?;
            out.insert(field.clone(), value);
        }

        for (field, ty) in &classification.recalls {
            let value =
                recall_search(trace, field, *ty).ok_or_else(|| FramewalkError::RecallNotFound {
                    node: schema.name().to_string(),
                    field: field.clone(),
                })?;
            out.insert(field.clone(), value);
        }

        Ok(out)
    }

    /// Resolve one callable, resolving its declared upstreams first.
    /// A callable already in the cache is never invoked again this run.
    fn resolve_callable<'b>(
        &'b self,
        name: String,
        cache: &'b mut DepCache,
    ) -> BoxFuture<'b, Result<serde_json::Value>> {
        Box::pin(async move {
            if let Some(value) = cache.get(&name) {
                return Ok(value.clone());
            }

            let callable = self.graph.registry().get(&name).ok_or_else(|| {
                FramewalkError::Config(format!("callable '{}' not registered", name))
            })?;

            let mut values = FieldMap::new();
            for dep in callable.depends_on() {
                let value = self.resolve_callable(dep.clone(), &mut *cache).await?;
                values.insert(dep, value);
            }

            debug!(callable = %name, "Invoking dependency callable");
            let value = callable
                .resolve(DepInputs {
                    values,
                    ports: self.ports.clone(),
                })
                .await?;

            cache.insert(name, value.clone());
            Ok(value)
        })
    }
}

/// Scan the trace newest-first for an instance exposing `field` with a
/// value of the requested type.
fn recall_search(trace: &Trace, field: &str, ty: FieldType) -> Option<serde_json::Value> {
    trace
        .iter_back()
        .find_map(|instance| instance.get(field).filter(|v| ty.matches(v)).cloned())
}

/// Wrap a callable failure with the node type and field that triggered
/// it. Suspension and configuration errors pass through unwrapped so the
/// runtime can classify the run's end state.
fn wrap_dependency_error(
    error: FramewalkError,
    node: &str,
    field: &str,
    callable: &str,
) -> FramewalkError {
    if error.is_suspension() || error.is_config() {
        return error;
    }
    FramewalkError::DependencyFailed {
        node: node.to_string(),
        field: field.to_string(),
        callable: callable.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{GraphSpec, NodeSchema};
    use crate::testutil::{
        counting_callable, failing_callable, static_callable, summing_callable, test_ports,
    };
    use framewalk_core::types::{FieldMap, NodeInstance};

    #[tokio::test]
    async fn dependency_field_resolved() {
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("n").dependency("answer", FieldType::Number, "constant"))
            .callable(static_callable("constant", serde_json::json!(42)))
            .build()
            .unwrap();

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let fields = resolver
            .resolve_fields(graph.start_schema(), &Trace::new(), &mut cache)
            .await
            .unwrap();
        assert_eq!(fields["answer"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn callable_invoked_once_per_run() {
        let (counter, callable) = counting_callable("shared");
        let graph = GraphSpec::builder("g")
            .start_node(
                NodeSchema::new("n")
                    .dependency("a", FieldType::Number, "shared")
                    .dependency("b", FieldType::Number, "shared"),
            )
            .callable(callable)
            .build()
            .unwrap();

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();

        // Two fields on one node, then a second resolution pass with the
        // same cache — the callable still runs exactly once.
        resolver
            .resolve_fields(graph.start_schema(), &Trace::new(), &mut cache)
            .await
            .unwrap();
        resolver
            .resolve_fields(graph.start_schema(), &Trace::new(), &mut cache)
            .await
            .unwrap();

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chained_dependencies_resolve_upstream_first() {
        // total depends on base; base returns 10, total adds 1.
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("n").dependency("total", FieldType::Number, "total"))
            .callable(static_callable("base", serde_json::json!(10)))
            .callable(summing_callable("total", vec!["base".into()], 1))
            .build()
            .unwrap();

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let fields = resolver
            .resolve_fields(graph.start_schema(), &Trace::new(), &mut cache)
            .await
            .unwrap();
        assert_eq!(fields["total"], serde_json::json!(11));
        // Upstream value was memoized too.
        assert_eq!(cache.get("base"), Some(&serde_json::json!(10)));
    }

    #[tokio::test]
    async fn recall_finds_most_recent_match() {
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("start").successors_to(vec!["probe".into()]))
            .node(NodeSchema::new("probe").recall("goal", FieldType::Text))
            .build()
            .unwrap();

        let mut trace = Trace::new();
        let mut older = FieldMap::new();
        older.insert("goal".into(), serde_json::json!("old goal"));
        trace.push(NodeInstance::new("start", older));
        let mut newer = FieldMap::new();
        newer.insert("goal".into(), serde_json::json!("new goal"));
        trace.push(NodeInstance::new("start", newer));

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let schema = graph.schema("probe").unwrap().clone();
        let fields = resolver
            .resolve_fields(&schema, &trace, &mut cache)
            .await
            .unwrap();
        assert_eq!(fields["goal"], serde_json::json!("new goal"));
    }

    #[tokio::test]
    async fn recall_skips_type_mismatches() {
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("start").successors_to(vec!["probe".into()]))
            .node(NodeSchema::new("probe").recall("goal", FieldType::Text))
            .build()
            .unwrap();

        let mut trace = Trace::new();
        let mut text = FieldMap::new();
        text.insert("goal".into(), serde_json::json!("the text goal"));
        trace.push(NodeInstance::new("start", text));
        let mut numeric = FieldMap::new();
        numeric.insert("goal".into(), serde_json::json!(7));
        trace.push(NodeInstance::new("start", numeric));

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let schema = graph.schema("probe").unwrap().clone();
        let fields = resolver
            .resolve_fields(&schema, &trace, &mut cache)
            .await
            .unwrap();
        // The newest entry has the right name but the wrong type.
        assert_eq!(fields["goal"], serde_json::json!("the text goal"));
    }

    #[tokio::test]
    async fn recall_not_found_errors() {
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("start").successors_to(vec!["probe".into()]))
            .node(NodeSchema::new("probe").recall("missing", FieldType::Text))
            .build()
            .unwrap();

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let schema = graph.schema("probe").unwrap().clone();
        let err = resolver
            .resolve_fields(&schema, &Trace::new(), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FramewalkError::RecallNotFound { ref field, .. } if field == "missing"
        ));
    }

    #[tokio::test]
    async fn failure_wrapped_with_node_and_field() {
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("n").dependency("ctx", FieldType::Json, "boom"))
            .callable(failing_callable("boom", "backend unavailable"))
            .build()
            .unwrap();

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let err = resolver
            .resolve_fields(graph.start_schema(), &Trace::new(), &mut cache)
            .await
            .unwrap_err();

        match err {
            FramewalkError::DependencyFailed {
                node,
                field,
                callable,
                message,
            } => {
                assert_eq!(node, "n");
                assert_eq!(field, "ctx");
                assert_eq!(callable, "boom");
                assert!(message.contains("backend unavailable"));
            }
            other => panic!("expected DependencyFailed, got {:?}", other),
        }
        // Failures are never cached.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cancellation_passes_through_unwrapped() {
        let graph = GraphSpec::builder("g")
            .start_node(NodeSchema::new("n").dependency("ctx", FieldType::Json, "cancelled"))
            .callable(crate::testutil::cancelled_callable("cancelled"))
            .build()
            .unwrap();

        let resolver = Resolver::new(&graph, test_ports());
        let mut cache = DepCache::new();
        let err = resolver
            .resolve_fields(graph.start_schema(), &Trace::new(), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, FramewalkError::Cancelled));
    }
}
