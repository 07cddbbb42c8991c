//! Type node definitions.
//!
//! A [`TypeNode`] is the closed description of what a stage is expected to
//! produce. Nodes reference each other by [`TypeId`], an index into the
//! owning [`TypeGraph`](crate::TypeGraph).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index of a node inside a [`TypeGraph`](crate::TypeGraph).
pub type TypeId = u32;

/// Discriminated description of an expected output shape.
///
/// Serialized with an inline `kind` tag, for example
/// `{"kind": "integer", "minimum": 0}` or `{"kind": "list", "items": 3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeNode {
    Boolean,
    Integer(IntegerConstraints),
    UnsignedInteger(IntegerConstraints),
    Float(FloatConstraints),
    String(StringConstraints),
    Uuid,
    Email,
    Char,
    /// Nullable wrapper around `item`.
    Optional {
        item: TypeId,
        /// Value substituted when the wrapped value is absent.
        #[serde(default)]
        default_value: Option<Value>,
    },
    List {
        items: TypeId,
        #[serde(default)]
        min_items: Option<u32>,
        #[serde(default)]
        max_items: Option<u32>,
    },
    /// Object with ordered named properties.
    Struct {
        #[serde(default)]
        properties: IndexMap<String, TypeId>,
    },
    /// Value matching at least one of the variants.
    Union { variants: Vec<TypeId> },
    /// Value matching exactly one of the variants.
    Either { variants: Vec<TypeId> },
    /// Callable field; stages typed with a function resolve to its output.
    Function { input: TypeId, output: TypeId },
}

impl TypeNode {
    /// Every `kind` discriminator accepted when loading raw metadata.
    pub const KINDS: &'static [&'static str] = &[
        "boolean",
        "integer",
        "unsigned_integer",
        "float",
        "string",
        "uuid",
        "email",
        "char",
        "optional",
        "list",
        "struct",
        "union",
        "either",
        "function",
    ];

    /// The `kind` discriminator of this node.
    pub fn kind(&self) -> &'static str {
        match self {
            TypeNode::Boolean => "boolean",
            TypeNode::Integer(_) => "integer",
            TypeNode::UnsignedInteger(_) => "unsigned_integer",
            TypeNode::Float(_) => "float",
            TypeNode::String(_) => "string",
            TypeNode::Uuid => "uuid",
            TypeNode::Email => "email",
            TypeNode::Char => "char",
            TypeNode::Optional { .. } => "optional",
            TypeNode::List { .. } => "list",
            TypeNode::Struct { .. } => "struct",
            TypeNode::Union { .. } => "union",
            TypeNode::Either { .. } => "either",
            TypeNode::Function { .. } => "function",
        }
    }

    /// Whether `kind` names a known discriminator.
    pub fn is_known_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }

    /// Type ids referenced directly by this node.
    pub fn references(&self) -> Vec<TypeId> {
        match self {
            TypeNode::Optional { item, .. } => vec![*item],
            TypeNode::List { items, .. } => vec![*items],
            TypeNode::Struct { properties } => properties.values().copied().collect(),
            TypeNode::Union { variants } | TypeNode::Either { variants } => variants.clone(),
            TypeNode::Function { input, output } => vec![*input, *output],
            _ => Vec::new(),
        }
    }
}

/// Constraints shared by `integer` and `unsigned_integer`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegerConstraints {
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub exclusive_minimum: Option<i64>,
    pub exclusive_maximum: Option<i64>,
    pub multiple_of: Option<i64>,
    pub enumeration: Option<Vec<i64>>,
}

impl IntegerConstraints {
    /// Inclusive lower bound implied by `minimum` and `exclusive_minimum`.
    pub fn lower_bound(&self) -> Option<i64> {
        match (self.minimum, self.exclusive_minimum) {
            (Some(min), Some(x_min)) => Some(min.max(x_min.saturating_add(1))),
            (Some(min), None) => Some(min),
            (None, Some(x_min)) => Some(x_min.saturating_add(1)),
            (None, None) => None,
        }
    }

    /// Inclusive upper bound implied by `maximum` and `exclusive_maximum`.
    pub fn upper_bound(&self) -> Option<i64> {
        match (self.maximum, self.exclusive_maximum) {
            (Some(max), Some(x_max)) => Some(max.min(x_max.saturating_sub(1))),
            (Some(max), None) => Some(max),
            (None, Some(x_max)) => Some(x_max.saturating_sub(1)),
            (None, None) => None,
        }
    }
}

/// Constraints for `float`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatConstraints {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub multiple_of: Option<f64>,
    pub enumeration: Option<Vec<f64>>,
}

/// One side of a float range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatBound {
    pub value: f64,
    pub exclusive: bool,
}

impl FloatConstraints {
    /// Tighter of `minimum` and `exclusive_minimum`; exclusive wins a tie.
    pub fn lower_bound(&self) -> Option<FloatBound> {
        match (self.minimum, self.exclusive_minimum) {
            (Some(min), Some(x_min)) if x_min >= min => Some(FloatBound { value: x_min, exclusive: true }),
            (Some(min), _) => Some(FloatBound { value: min, exclusive: false }),
            (None, Some(x_min)) => Some(FloatBound { value: x_min, exclusive: true }),
            (None, None) => None,
        }
    }

    /// Tighter of `maximum` and `exclusive_maximum`; exclusive wins a tie.
    pub fn upper_bound(&self) -> Option<FloatBound> {
        match (self.maximum, self.exclusive_maximum) {
            (Some(max), Some(x_max)) if x_max <= max => Some(FloatBound { value: x_max, exclusive: true }),
            (Some(max), _) => Some(FloatBound { value: max, exclusive: false }),
            (None, Some(x_max)) => Some(FloatBound { value: x_max, exclusive: true }),
            (None, None) => None,
        }
    }
}

/// Constraints for `string`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringConstraints {
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub format: Option<StringFormat>,
    pub enumeration: Option<Vec<String>>,
}

/// Well-known string formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringFormat {
    Uuid,
    Email,
    Uri,
    Date,
    DateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_tagged_nodes() {
        let node: TypeNode = serde_json::from_value(json!({"kind": "integer", "minimum": 3})).expect("integer node");
        assert_eq!(
            node,
            TypeNode::Integer(IntegerConstraints {
                minimum: Some(3),
                ..Default::default()
            })
        );

        let node: TypeNode = serde_json::from_value(json!({"kind": "struct", "properties": {"id": 1, "name": 2}})).expect("struct node");
        assert_eq!(node.kind(), "struct");
        assert_eq!(node.references(), vec![1, 2]);
    }

    #[test]
    fn unit_kinds_parse_from_yaml() {
        let node: TypeNode = serde_yaml::from_str("kind: boolean").expect("boolean node");
        assert_eq!(node, TypeNode::Boolean);
        let node: TypeNode = serde_yaml::from_str("kind: string\nformat: date_time").expect("string node");
        assert_eq!(
            node,
            TypeNode::String(StringConstraints {
                format: Some(StringFormat::DateTime),
                ..Default::default()
            })
        );
    }

    #[test]
    fn every_variant_kind_is_listed() {
        let nodes = [
            TypeNode::Boolean,
            TypeNode::Integer(Default::default()),
            TypeNode::UnsignedInteger(Default::default()),
            TypeNode::Float(Default::default()),
            TypeNode::String(Default::default()),
            TypeNode::Uuid,
            TypeNode::Email,
            TypeNode::Char,
            TypeNode::Optional { item: 0, default_value: None },
            TypeNode::List {
                items: 0,
                min_items: None,
                max_items: None,
            },
            TypeNode::Struct {
                properties: IndexMap::new(),
            },
            TypeNode::Union { variants: vec![] },
            TypeNode::Either { variants: vec![] },
            TypeNode::Function { input: 0, output: 0 },
        ];
        for node in nodes {
            assert!(TypeNode::is_known_kind(node.kind()), "{} missing from KINDS", node.kind());
        }
        assert_eq!(TypeNode::KINDS.len(), 14);
    }

    #[test]
    fn integer_bounds_fold_exclusive_limits() {
        let constraints = IntegerConstraints {
            minimum: Some(0),
            exclusive_minimum: Some(4),
            exclusive_maximum: Some(10),
            ..Default::default()
        };
        assert_eq!(constraints.lower_bound(), Some(5));
        assert_eq!(constraints.upper_bound(), Some(9));
    }

    #[test]
    fn float_bounds_keep_exclusivity() {
        let constraints = FloatConstraints {
            minimum: Some(0.0),
            exclusive_minimum: Some(0.0),
            maximum: Some(1.0),
            exclusive_maximum: Some(2.0),
            ..Default::default()
        };
        assert_eq!(constraints.lower_bound(), Some(FloatBound { value: 0.0, exclusive: true }));
        assert_eq!(constraints.upper_bound(), Some(FloatBound { value: 1.0, exclusive: false }));
        assert_eq!(FloatConstraints::default().lower_bound(), None);
    }
}
