//! Flat table of type nodes addressed by [`TypeId`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::node::{TypeId, TypeNode};

/// Type metadata for one plan, indexed by [`TypeId`].
///
/// Graphs are validated on construction: every node has a known `kind` and
/// every reference points at an existing node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<TypeNode>")]
pub struct TypeGraph {
    types: Vec<TypeNode>,
}

impl TypeGraph {
    /// Build a graph from already-typed nodes, checking references.
    pub fn new(types: Vec<TypeNode>) -> Result<Self, TypeError> {
        let graph = Self { types };
        graph.check_references()?;
        Ok(graph)
    }

    /// Build a graph from raw JSON nodes.
    ///
    /// The `kind` discriminator is inspected before deserializing so that an
    /// unrecognized kind is reported by name instead of as a generic parse
    /// failure.
    pub fn from_values(values: &[Value]) -> Result<Self, TypeError> {
        let mut types = Vec::with_capacity(values.len());
        for (index, raw) in values.iter().enumerate() {
            let kind = raw
                .get("kind")
                .and_then(Value::as_str)
                .ok_or(TypeError::MissingKind { index })?;
            if !TypeNode::is_known_kind(kind) {
                return Err(TypeError::UnsupportedKind {
                    index,
                    kind: kind.to_string(),
                });
            }
            let node = serde_json::from_value::<TypeNode>(raw.clone()).map_err(|error| TypeError::Malformed {
                index,
                message: error.to_string(),
            })?;
            types.push(node);
        }
        Self::new(types)
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeNode> {
        self.types.get(id as usize)
    }

    /// Look up a node, failing with [`TypeError::UnknownType`] when absent.
    pub fn node(&self, id: TypeId) -> Result<&TypeNode, TypeError> {
        self.get(id).ok_or(TypeError::UnknownType { id })
    }

    /// Follow `optional` wrappers down to the first non-optional node.
    pub fn unwrap_optional(&self, id: TypeId) -> Result<&TypeNode, TypeError> {
        let mut current = self.node(id)?;
        let mut hops = 0usize;
        while let TypeNode::Optional { item, .. } = current {
            hops += 1;
            if hops > self.types.len() {
                return Err(TypeError::Malformed {
                    index: id as usize,
                    message: "optional wrappers form a cycle".to_string(),
                });
            }
            current = self.node(*item)?;
        }
        Ok(current)
    }

    /// Whether the node at `id`, ignoring optional wrappers, is a list.
    pub fn is_list(&self, id: TypeId) -> Result<bool, TypeError> {
        Ok(matches!(self.unwrap_optional(id)?, TypeNode::List { .. }))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeNode)> {
        self.types.iter().enumerate().map(|(index, node)| (index as TypeId, node))
    }

    fn check_references(&self) -> Result<(), TypeError> {
        for (id, node) in self.iter() {
            for target in node.references() {
                if self.get(target).is_none() {
                    return Err(TypeError::DanglingReference { from: id, target });
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<Vec<Value>> for TypeGraph {
    type Error = TypeError;

    fn try_from(values: Vec<Value>) -> Result<Self, Self::Error> {
        Self::from_values(&values)
    }
}

impl From<TypeGraph> for Vec<TypeNode> {
    fn from(graph: TypeGraph) -> Self {
        graph.types
    }
}

/// Errors raised while loading or querying type metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("type #{index} has no 'kind' discriminator")]
    MissingKind { index: usize },

    #[error("type #{index} has unsupported kind '{kind}'")]
    UnsupportedKind { index: usize, kind: String },

    #[error("type #{index} is malformed: {message}")]
    Malformed { index: usize, message: String },

    #[error("type #{from} references missing type #{target}")]
    DanglingReference { from: TypeId, target: TypeId },

    #[error("unknown type #{id}")]
    UnknownType { id: TypeId },
}
