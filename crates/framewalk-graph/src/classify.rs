use std::collections::HashSet;

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::types::FieldType;

use crate::schema::{FieldKind, NodeSchema};

/// Field tagging for one node type: which fields are resolved from
/// callables, which from the trace, and which the decision port (or the
/// caller, for the start node) must supply.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldClassification {
    /// (field name, callable name) pairs.
    pub dependencies: Vec<(String, String)>,
    /// (field name, declared type) pairs, matched during backward search.
    pub recalls: Vec<(String, FieldType)>,
    /// Plain field names.
    pub plain: Vec<String>,
}

/// Classify every declared field of a node type.
///
/// Purely structural and idempotent: the same schema always classifies
/// identically. A field name declared more than once is a build-time
/// configuration error.
pub fn classify(schema: &NodeSchema) -> Result<FieldClassification> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = FieldClassification {
        dependencies: Vec::new(),
        recalls: Vec::new(),
        plain: Vec::new(),
    };

    for field in schema.fields() {
        if !seen.insert(&field.name) {
            return Err(FramewalkError::DuplicateField {
                node: schema.name().to_string(),
                field: field.name.clone(),
            });
        }
        match &field.kind {
            FieldKind::Dependency { callable } => out
                .dependencies
                .push((field.name.clone(), callable.clone())),
            FieldKind::Recall => out.recalls.push((field.name.clone(), field.ty)),
            FieldKind::Plain => out.plain.push(field.name.clone()),
        }
    }

    Ok(out)
}
