use std::collections::HashMap;
use std::sync::Arc;

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::traits::{DepCallable, TransitionLogic};
use framewalk_core::types::{FieldDecl, FieldMap, FieldType};
use tracing::debug;

use crate::classify::{classify, FieldClassification};

/// How a field's value is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Supplied by the caller (start node) or generated by the decision port.
    Plain,
    /// Produced by a registered callable, cached per run.
    Dependency { callable: String },
    /// Found by backward search over the trace.
    Recall,
}

/// One declared field of a node type.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub kind: FieldKind,
    pub description: Option<String>,
}

/// Schema for one step of graph execution: fields, their classification,
/// and the statically declared successor set. Immutable once built.
#[derive(Clone)]
pub struct NodeSchema {
    name: String,
    description: Option<String>,
    fields: Vec<FieldSpec>,
    successors: Vec<String>,
    transition: Option<Arc<dyn TransitionLogic>>,
}

impl std::fmt::Debug for NodeSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("successors", &self.successors)
            .field("transition", &self.transition.is_some())
            .finish()
    }
}

impl NodeSchema {
    /// Create a new schema with no fields and no successors (terminal).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
            successors: Vec::new(),
            transition: None,
        }
    }

    /// Set the human-readable description.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Declare a plain field.
    pub fn plain(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            kind: FieldKind::Plain,
            description: None,
        });
        self
    }

    /// Declare a dependency field backed by a registered callable.
    pub fn dependency(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        callable: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            kind: FieldKind::Dependency {
                callable: callable.into(),
            },
            description: None,
        });
        self
    }

    /// Declare a recall field.
    pub fn recall(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            kind: FieldKind::Recall,
            description: None,
        });
        self
    }

    /// Declare the permissible successor types. Empty means terminal.
    pub fn successors_to(mut self, successors: Vec<String>) -> Self {
        self.successors = successors;
        self
    }

    /// Attach custom transition logic, bypassing choose/fill.
    pub fn with_transition(mut self, logic: Arc<dyn TransitionLogic>) -> Self {
        self.transition = Some(logic);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn successors(&self) -> &[String] {
        &self.successors
    }

    pub fn transition(&self) -> Option<&Arc<dyn TransitionLogic>> {
        self.transition.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.successors.is_empty()
    }

    /// Declarations of the plain fields, as sent to the decision port.
    pub fn plain_decls(&self) -> Vec<FieldDecl> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Plain)
            .map(|f| FieldDecl {
                name: f.name.clone(),
                ty: f.ty,
                description: f.description.clone(),
            })
            .collect()
    }

    /// Check a full field map against this schema: every declared field
    /// present with a matching type, and nothing undeclared.
    pub fn validate_instance(&self, fields: &FieldMap) -> Result<()> {
        for spec in &self.fields {
            match fields.get(&spec.name) {
                None => {
                    return Err(FramewalkError::FillSchema {
                        node: self.name.clone(),
                        message: format!("missing field '{}'", spec.name),
                    });
                }
                Some(value) if !spec.ty.matches(value) => {
                    return Err(FramewalkError::FillSchema {
                        node: self.name.clone(),
                        message: format!(
                            "field '{}' is not of type {} (got {})",
                            spec.name, spec.ty, value
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        for key in fields.keys() {
            if !self.fields.iter().any(|f| f.name == *key) {
                return Err(FramewalkError::FillSchema {
                    node: self.name.clone(),
                    message: format!("undeclared field '{}'", key),
                });
            }
        }
        Ok(())
    }
}

/// Registered dependency callables, keyed by identity.
#[derive(Default)]
pub struct DependencyRegistry {
    callables: HashMap<String, Arc<dyn DepCallable>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callable: Arc<dyn DepCallable>) {
        self.callables.insert(callable.name().to_string(), callable);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DepCallable>> {
        self.callables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }
}

/// Builder for a validated [`GraphSpec`].
pub struct GraphBuilder {
    name: String,
    start: Option<String>,
    schemas: Vec<NodeSchema>,
    registry: DependencyRegistry,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            schemas: Vec::new(),
            registry: DependencyRegistry::new(),
        }
    }

    /// Add the start node type.
    pub fn start_node(mut self, schema: NodeSchema) -> Self {
        self.start = Some(schema.name().to_string());
        self.schemas.push(schema);
        self
    }

    /// Add a non-start node type.
    pub fn node(mut self, schema: NodeSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Register a dependency callable.
    pub fn callable(mut self, callable: Arc<dyn DepCallable>) -> Self {
        self.registry.register(callable);
        self
    }

    /// Validate the declared topology and produce the schema registry.
    ///
    /// All configuration errors surface here, never mid-run: duplicate
    /// fields, unknown callables or successors, recall on the start node,
    /// and cyclic dependency chains.
    pub fn build(self) -> Result<GraphSpec> {
        let start = self
            .start
            .ok_or_else(|| FramewalkError::Config("graph has no start node".into()))?;

        let mut schemas: HashMap<String, Arc<NodeSchema>> = HashMap::new();
        let mut classifications: HashMap<String, FieldClassification> = HashMap::new();

        for schema in self.schemas {
            if schemas.contains_key(schema.name()) {
                return Err(FramewalkError::Config(format!(
                    "duplicate node type '{}'",
                    schema.name()
                )));
            }
            let classification = classify(&schema)?;
            classifications.insert(schema.name().to_string(), classification);
            schemas.insert(schema.name().to_string(), Arc::new(schema));
        }

        let mut dep_roots: Vec<String> = Vec::new();
        for schema in schemas.values() {
            for successor in schema.successors() {
                if !schemas.contains_key(successor) {
                    return Err(FramewalkError::UnknownSuccessor {
                        node: schema.name().to_string(),
                        successor: successor.clone(),
                    });
                }
            }
            for field in schema.fields() {
                if let FieldKind::Dependency { callable } = &field.kind {
                    if !self.registry.contains(callable) {
                        return Err(FramewalkError::UnknownCallable {
                            node: schema.name().to_string(),
                            field: field.name.clone(),
                            callable: callable.clone(),
                        });
                    }
                    dep_roots.push(callable.clone());
                }
            }
        }

        let start_schema = schemas
            .get(&start)
            .ok_or_else(|| FramewalkError::UnknownNodeType(start.clone()))?;
        for field in start_schema.fields() {
            if field.kind == FieldKind::Recall {
                return Err(FramewalkError::RecallOnStart {
                    node: start.clone(),
                    field: field.name.clone(),
                });
            }
        }

        check_cycles(&self.registry, &dep_roots)?;

        debug!(
            graph = %self.name,
            node_types = schemas.len(),
            "Graph built"
        );

        Ok(GraphSpec {
            name: self.name,
            start,
            schemas,
            classifications,
            registry: Arc::new(self.registry),
        })
    }
}

/// The schema registry for one graph: node types, their precomputed field
/// classifications, the start type, and the callable registry. Built once
/// at construction; a graph that fails validation is never usable.
pub struct GraphSpec {
    name: String,
    start: String,
    schemas: HashMap<String, Arc<NodeSchema>>,
    classifications: HashMap<String, FieldClassification>,
    registry: Arc<DependencyRegistry>,
}

impl GraphSpec {
    pub fn builder(name: impl Into<String>) -> GraphBuilder {
        GraphBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_schema(&self) -> &Arc<NodeSchema> {
        // Validated at build time
        &self.schemas[&self.start]
    }

    pub fn schema(&self, name: &str) -> Result<&Arc<NodeSchema>> {
        self.schemas
            .get(name)
            .ok_or_else(|| FramewalkError::UnknownNodeType(name.to_string()))
    }

    pub fn classification(&self, name: &str) -> Result<&FieldClassification> {
        self.classifications
            .get(name)
            .ok_or_else(|| FramewalkError::UnknownNodeType(name.to_string()))
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for GraphSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSpec")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("node_types", &self.schemas.len())
            .finish()
    }
}

/// Walk `depends_on` declarations from every root and reject cycles.
/// Static analysis only — callables are never invoked here.
fn check_cycles(registry: &DependencyRegistry, roots: &[String]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        registry: &DependencyRegistry,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let mut chain: Vec<&str> = stack
                    .iter()
                    .skip_while(|n| n.as_str() != name)
                    .map(String::as_str)
                    .collect();
                chain.push(name);
                return Err(FramewalkError::CyclicDependency {
                    chain: chain.join(" -> "),
                });
            }
            None => {}
        }

        let callable = registry.get(name).ok_or_else(|| {
            FramewalkError::Config(format!("callable depends on unregistered '{}'", name))
        })?;

        marks.insert(name.to_string(), Mark::Visiting);
        stack.push(name.to_string());
        for dep in callable.depends_on() {
            visit(&dep, registry, marks, stack)?;
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for root in roots {
        visit(root, registry, &mut marks, &mut stack)?;
    }
    Ok(())
}
