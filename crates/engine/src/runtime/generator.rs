//! Type-directed synthetic value generation.
//!
//! Aggregates come out structurally empty (a struct is `{}`, a list holds
//! only its `min_items` elements) because their members are stages of their
//! own. Scalars are drawn at random within the declared constraints.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Map as JsonMap, Number, Value};
use thiserror::Error;
use tg_types::{FloatBound, FloatConstraints, IntegerConstraints, StringConstraints, StringFormat, TypeError, TypeGraph, TypeId, TypeNode};

const DEFAULT_INTEGER_SPAN: i64 = 1000;
const DEFAULT_MAX_STRING_LENGTH: u32 = 16;
const MAX_DEPTH: usize = 32;
const FLOAT_ATTEMPTS: usize = 16;
/// 2000-01-01T00:00:00Z and 2040-01-01T00:00:00Z.
const TIMESTAMP_RANGE: (i64, i64) = (946_684_800, 2_208_988_800);

/// Failures while checking or generating a value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
    #[error("unsupported type kind '{kind}'")]
    Unsupported { kind: String },

    #[error("{kind} constraints cannot be satisfied: {reason}")]
    Unsatisfiable { kind: &'static str, reason: String },

    #[error("type nesting exceeds {} levels", MAX_DEPTH)]
    DepthExceeded,

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Verify every kind reachable from `root` can be generated.
///
/// Struct properties are not followed: they are separate stages.
pub fn check_generatable(types: &TypeGraph, root: TypeId) -> Result<(), GenerationError> {
    let mut pending = vec![root];
    let mut visited = HashSet::new();
    while let Some(id) = pending.pop() {
        if !visited.insert(id) {
            continue;
        }
        match types.node(id)? {
            TypeNode::Function { .. } => {
                return Err(GenerationError::Unsupported {
                    kind: "function".to_string(),
                });
            }
            TypeNode::Optional { item, .. } => pending.push(*item),
            TypeNode::List { items, .. } => pending.push(*items),
            TypeNode::Union { variants } | TypeNode::Either { variants } => pending.extend(variants.iter().copied()),
            TypeNode::Boolean
            | TypeNode::Integer(_)
            | TypeNode::UnsignedInteger(_)
            | TypeNode::Float(_)
            | TypeNode::String(_)
            | TypeNode::Uuid
            | TypeNode::Email
            | TypeNode::Char
            | TypeNode::Struct { .. } => {}
        }
    }
    Ok(())
}

/// Seeded or entropy-backed generator owned by one stage resolver.
#[derive(Debug, Clone)]
pub struct ValueGenerator {
    rng: ChaCha8Rng,
}

impl ValueGenerator {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Generator for one stage. With a runtime seed the stream depends only
    /// on the seed and the stage id, so repeated runs agree.
    pub fn for_stage(seed: Option<u64>, stage_id: &str) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed ^ stage_hash(stage_id)),
            None => Self::from_entropy(),
        }
    }

    pub fn generate(&mut self, types: &TypeGraph, id: TypeId) -> Result<Value, GenerationError> {
        self.generate_at(types, id, 0)
    }

    fn generate_at(&mut self, types: &TypeGraph, id: TypeId, depth: usize) -> Result<Value, GenerationError> {
        if depth > MAX_DEPTH {
            return Err(GenerationError::DepthExceeded);
        }
        let value = match types.node(id)? {
            TypeNode::Boolean => Value::Bool(self.rng.gen_bool(0.5)),
            TypeNode::Integer(constraints) => Value::from(self.integer(constraints, false)?),
            TypeNode::UnsignedInteger(constraints) => Value::from(self.integer(constraints, true)?),
            TypeNode::Float(constraints) => self.float(constraints)?,
            TypeNode::String(constraints) => Value::String(self.string(constraints)?),
            TypeNode::Uuid => Value::String(self.uuid()),
            TypeNode::Email => Value::String(self.email()),
            TypeNode::Char => Value::String(self.alphanumeric(1)),
            TypeNode::Optional { item, default_value } => {
                if self.rng.gen_bool(0.5) {
                    default_value.clone().unwrap_or(Value::Null)
                } else {
                    self.generate_at(types, *item, depth + 1)?
                }
            }
            TypeNode::List { items, min_items, max_items } => {
                let count = min_items.unwrap_or(0);
                if let Some(max) = max_items
                    && *max < count
                {
                    return Err(GenerationError::Unsatisfiable {
                        kind: "list",
                        reason: format!("min_items {count} exceeds max_items {max}"),
                    });
                }
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(self.generate_at(types, *items, depth + 1)?);
                }
                Value::Array(values)
            }
            TypeNode::Struct { .. } => Value::Object(JsonMap::new()),
            TypeNode::Union { variants } | TypeNode::Either { variants } => {
                let Some(variant) = variants.choose(&mut self.rng).copied() else {
                    return Err(GenerationError::Unsatisfiable {
                        kind: "union",
                        reason: "no variants declared".to_string(),
                    });
                };
                self.generate_at(types, variant, depth + 1)?
            }
            TypeNode::Function { .. } => {
                return Err(GenerationError::Unsupported {
                    kind: "function".to_string(),
                });
            }
        };
        Ok(value)
    }

    fn integer(&mut self, constraints: &IntegerConstraints, unsigned: bool) -> Result<i64, GenerationError> {
        let kind = if unsigned { "unsigned_integer" } else { "integer" };
        if let Some(choices) = constraints.enumeration.as_deref().filter(|choices| !choices.is_empty()) {
            let allowed: Vec<i64> = choices.iter().copied().filter(|value| !unsigned || *value >= 0).collect();
            return allowed.choose(&mut self.rng).copied().ok_or_else(|| GenerationError::Unsatisfiable {
                kind,
                reason: "no non-negative enumeration value".to_string(),
            });
        }

        let (low, high) = match (constraints.lower_bound(), constraints.upper_bound()) {
            (Some(low), Some(high)) => (low, high),
            (Some(low), None) => (low, low.saturating_add(DEFAULT_INTEGER_SPAN)),
            (None, Some(high)) => (high.saturating_sub(DEFAULT_INTEGER_SPAN), high),
            (None, None) => (if unsigned { 0 } else { -DEFAULT_INTEGER_SPAN }, DEFAULT_INTEGER_SPAN),
        };
        let low = if unsigned { low.max(0) } else { low };
        if low > high {
            return Err(GenerationError::Unsatisfiable {
                kind,
                reason: format!("empty range {low}..={high}"),
            });
        }

        match constraints.multiple_of.filter(|step| *step != 0) {
            None => Ok(self.rng.gen_range(low..=high)),
            Some(step) => {
                let step = i128::from(step).abs();
                let first = -((-i128::from(low)).div_euclid(step));
                let last = i128::from(high).div_euclid(step);
                if first > last {
                    return Err(GenerationError::Unsatisfiable {
                        kind,
                        reason: format!("no multiple of {step} in {low}..={high}"),
                    });
                }
                let pick = self.rng.gen_range(first..=last) * step;
                i64::try_from(pick).map_err(|error| GenerationError::Unsatisfiable {
                    kind,
                    reason: error.to_string(),
                })
            }
        }
    }

    fn float(&mut self, constraints: &FloatConstraints) -> Result<Value, GenerationError> {
        let unsatisfiable = |reason: String| GenerationError::Unsatisfiable { kind: "float", reason };
        if let Some(choices) = constraints.enumeration.as_deref().filter(|choices| !choices.is_empty()) {
            let pick = choices.choose(&mut self.rng).copied().unwrap_or_default();
            return Number::from_f64(pick)
                .map(Value::Number)
                .ok_or_else(|| unsatisfiable("enumeration holds a non-finite value".to_string()));
        }

        let range = FloatRange::from_constraints(constraints);
        if !(range.low.is_finite() && range.high.is_finite()) || range.is_empty() {
            return Err(unsatisfiable(format!("empty range {range}")));
        }

        let multiples = match constraints.multiple_of.filter(|step| *step > 0.0) {
            Some(step) => {
                let mut first = (range.low / step).ceil() as i64;
                if range.low_exclusive && first as f64 * step <= range.low {
                    first = first.saturating_add(1);
                }
                let mut last = (range.high / step).floor() as i64;
                if range.high_exclusive && last as f64 * step >= range.high {
                    last = last.saturating_sub(1);
                }
                if first > last {
                    return Err(unsatisfiable(format!("no multiple of {step} in {range}")));
                }
                Some((step, first, last))
            }
            None => None,
        };

        for _ in 0..FLOAT_ATTEMPTS {
            let candidate = match multiples {
                Some((step, first, last)) => self.rng.gen_range(first..=last) as f64 * step,
                None => {
                    // Interpolate instead of `gen_range(low..high)`: `high - low` may overflow.
                    let t: f64 = self.rng.gen_range(0.0..1.0);
                    range.low * (1.0 - t) + range.high * t
                }
            };
            if range.contains(candidate) {
                return Number::from_f64(candidate)
                    .map(Value::Number)
                    .ok_or_else(|| unsatisfiable(format!("generated non-finite value {candidate}")));
            }
        }

        let midpoint = range.low / 2.0 + range.high / 2.0;
        if multiples.is_none() && range.contains(midpoint) {
            return Number::from_f64(midpoint)
                .map(Value::Number)
                .ok_or_else(|| unsatisfiable(format!("generated non-finite value {midpoint}")));
        }
        Err(unsatisfiable(format!("no representable value in {range}")))
    }

    fn string(&mut self, constraints: &StringConstraints) -> Result<String, GenerationError> {
        if let Some(choices) = constraints.enumeration.as_deref().filter(|choices| !choices.is_empty()) {
            return Ok(choices.choose(&mut self.rng).cloned().unwrap_or_default());
        }
        if let Some(format) = constraints.format {
            return Ok(match format {
                StringFormat::Uuid => self.uuid(),
                StringFormat::Email => self.email(),
                StringFormat::Uri => format!("https://{}.example.com/{}", self.alphanumeric(8).to_lowercase(), self.alphanumeric(6)),
                StringFormat::Date => self.timestamp()?.date_naive().to_string(),
                StringFormat::DateTime => self.timestamp()?.to_rfc3339_opts(SecondsFormat::Secs, true),
            });
        }

        let min = constraints.min_length.unwrap_or_else(|| constraints.max_length.map_or(1, |max| max.min(1)));
        let max = constraints.max_length.unwrap_or(min.max(DEFAULT_MAX_STRING_LENGTH));
        if min > max {
            return Err(GenerationError::Unsatisfiable {
                kind: "string",
                reason: format!("min_length {min} exceeds max_length {max}"),
            });
        }
        let length = self.rng.gen_range(min..=max) as usize;
        Ok(self.alphanumeric(length))
    }

    fn uuid(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
    }

    fn email(&mut self) -> String {
        format!("{}@example.com", self.alphanumeric(10).to_lowercase())
    }

    fn alphanumeric(&mut self, length: usize) -> String {
        (0..length).map(|_| char::from(self.rng.sample(Alphanumeric))).collect()
    }

    fn timestamp(&mut self) -> Result<DateTime<chrono::Utc>, GenerationError> {
        let seconds = self.rng.gen_range(TIMESTAMP_RANGE.0..TIMESTAMP_RANGE.1);
        DateTime::from_timestamp(seconds, 0).ok_or_else(|| GenerationError::Unsatisfiable {
            kind: "string",
            reason: format!("timestamp {seconds} out of range"),
        })
    }
}

/// Float sampling interval with per-side exclusivity.
#[derive(Debug, Clone, Copy)]
struct FloatRange {
    low: f64,
    high: f64,
    low_exclusive: bool,
    high_exclusive: bool,
}

impl FloatRange {
    /// Missing sides default to a span of `DEFAULT_INTEGER_SPAN` around the other side.
    fn from_constraints(constraints: &FloatConstraints) -> Self {
        let span = DEFAULT_INTEGER_SPAN as f64;
        let (low, high) = match (constraints.lower_bound(), constraints.upper_bound()) {
            (Some(low), Some(high)) => (low, high),
            (Some(low), None) => (low, FloatBound { value: low.value + span, exclusive: false }),
            (None, Some(high)) => (FloatBound { value: high.value - span, exclusive: false }, high),
            (None, None) => (
                FloatBound { value: -span, exclusive: false },
                FloatBound { value: span, exclusive: false },
            ),
        };
        Self {
            low: low.value,
            high: high.value,
            low_exclusive: low.exclusive,
            high_exclusive: high.exclusive,
        }
    }

    fn is_empty(&self) -> bool {
        self.low > self.high || (self.low == self.high && (self.low_exclusive || self.high_exclusive))
    }

    fn contains(&self, value: f64) -> bool {
        let above = if self.low_exclusive { value > self.low } else { value >= self.low };
        let below = if self.high_exclusive { value < self.high } else { value <= self.high };
        value.is_finite() && above && below
    }
}

impl std::fmt::Display for FloatRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = if self.low_exclusive { '(' } else { '[' };
        let close = if self.high_exclusive { ')' } else { ']' };
        write!(f, "{open}{}, {}{close}", self.low, self.high)
    }
}

/// FNV-1a over the stage id.
fn stage_hash(stage_id: &str) -> u64 {
    stage_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(nodes: Value) -> TypeGraph {
        serde_json::from_value(nodes).expect("type graph")
    }

    #[test]
    fn boolean_always_yields_boolean() {
        let types = graph(json!([{"kind": "boolean"}]));
        let mut generator = ValueGenerator::seeded(7);
        for _ in 0..64 {
            assert!(generator.generate(&types, 0).expect("boolean").is_boolean());
        }
    }

    #[test]
    fn scalars_honour_constraints() {
        let types = graph(json!([
            {"kind": "integer", "minimum": 10, "exclusive_maximum": 20, "multiple_of": 3},
            {"kind": "unsigned_integer", "maximum": 5},
            {"kind": "string", "min_length": 4, "max_length": 4},
            {"kind": "string", "enumeration": ["red", "blue"]},
            {"kind": "float", "minimum": 0.5, "maximum": 0.75},
            {"kind": "char"}
        ]));
        let mut generator = ValueGenerator::seeded(11);
        for _ in 0..32 {
            let integer = generator.generate(&types, 0).expect("integer").as_i64().expect("i64");
            assert!([12, 15, 18].contains(&integer), "got {integer}");

            let unsigned = generator.generate(&types, 1).expect("unsigned").as_i64().expect("i64");
            assert!((0..=5).contains(&unsigned));

            assert_eq!(generator.generate(&types, 2).expect("string").as_str().map(str::len), Some(4));

            let color = generator.generate(&types, 3).expect("enum");
            assert!(color == json!("red") || color == json!("blue"));

            let float = generator.generate(&types, 4).expect("float").as_f64().expect("f64");
            assert!((0.5..=0.75).contains(&float));

            assert_eq!(generator.generate(&types, 5).expect("char").as_str().map(|text| text.chars().count()), Some(1));
        }
    }

    #[test]
    fn formatted_strings_parse_back() {
        let types = graph(json!([
            {"kind": "uuid"},
            {"kind": "email"},
            {"kind": "string", "format": "date"},
            {"kind": "string", "format": "date_time"}
        ]));
        let mut generator = ValueGenerator::seeded(3);

        let id = generator.generate(&types, 0).expect("uuid");
        let parsed = uuid::Uuid::parse_str(id.as_str().expect("text")).expect("valid uuid");
        assert_eq!(parsed.get_version_num(), 4);

        let email = generator.generate(&types, 1).expect("email");
        assert!(email.as_str().expect("text").ends_with("@example.com"));

        let date = generator.generate(&types, 2).expect("date");
        assert!(chrono::NaiveDate::parse_from_str(date.as_str().expect("text"), "%Y-%m-%d").is_ok());

        let stamp = generator.generate(&types, 3).expect("date time");
        assert!(DateTime::parse_from_rfc3339(stamp.as_str().expect("text")).is_ok());
    }

    #[test]
    fn aggregates_are_structurally_empty() {
        let types = graph(json!([
            {"kind": "struct", "properties": {"name": 1}},
            {"kind": "string"},
            {"kind": "list", "items": 1},
            {"kind": "list", "items": 3, "min_items": 2},
            {"kind": "boolean"}
        ]));
        let mut generator = ValueGenerator::seeded(5);
        assert_eq!(generator.generate(&types, 0).expect("struct"), json!({}));
        assert_eq!(generator.generate(&types, 2).expect("list"), json!([]));
        let sized = generator.generate(&types, 3).expect("sized list");
        let items = sized.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Value::is_boolean));
    }

    #[test]
    fn optional_yields_inner_value_or_default() {
        let types = graph(json!([
            {"kind": "optional", "item": 1, "default_value": 9},
            {"kind": "integer", "minimum": 100, "maximum": 200}
        ]));
        let mut generator = ValueGenerator::seeded(9);
        for _ in 0..32 {
            let value = generator.generate(&types, 0).expect("optional").as_i64().expect("number");
            assert!(value == 9 || (100..=200).contains(&value));
        }
    }

    #[test]
    fn function_kind_is_unsupported() {
        let types = graph(json!([
            {"kind": "list", "items": 1},
            {"kind": "function", "input": 2, "output": 2},
            {"kind": "struct"}
        ]));
        assert_eq!(
            check_generatable(&types, 0),
            Err(GenerationError::Unsupported {
                kind: "function".to_string()
            })
        );
        assert!(check_generatable(&types, 2).is_ok());
        let error = ValueGenerator::seeded(1).generate(&types, 1).expect_err("function");
        assert!(error.to_string().contains("'function'"));
    }

    #[test]
    fn same_seed_and_stage_repeat() {
        let types = graph(json!([{"kind": "string"}]));
        let first = ValueGenerator::for_stage(Some(42), "user.name").generate(&types, 0).expect("first");
        let second = ValueGenerator::for_stage(Some(42), "user.name").generate(&types, 0).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn float_range_wider_than_f64_span_still_generates() {
        let types = graph(json!([{"kind": "float", "minimum": -1e308, "maximum": 1e308}]));
        let mut generator = ValueGenerator::seeded(17);
        for _ in 0..64 {
            let value = generator.generate(&types, 0).expect("wide float").as_f64().expect("f64");
            assert!((-1e308..=1e308).contains(&value));
        }
    }

    #[test]
    fn float_exclusive_bounds_are_never_generated() {
        let types = graph(json!([
            {"kind": "float", "exclusive_minimum": 0.0, "maximum": 1.0, "multiple_of": 0.5},
            {"kind": "float", "minimum": 0.0, "exclusive_maximum": 1.0},
            {"kind": "float", "exclusive_minimum": 0.0, "maximum": 0.0},
            {"kind": "float", "exclusive_minimum": 0.0, "exclusive_maximum": 0.5, "multiple_of": 0.5}
        ]));
        let mut generator = ValueGenerator::seeded(21);
        for _ in 0..200 {
            let stepped = generator.generate(&types, 0).expect("stepped").as_f64().expect("f64");
            assert!(stepped == 0.5 || stepped == 1.0, "got {stepped}");

            let open_top = generator.generate(&types, 1).expect("half open").as_f64().expect("f64");
            assert!((0.0..1.0).contains(&open_top), "got {open_top}");
        }
        assert!(matches!(generator.generate(&types, 2), Err(GenerationError::Unsatisfiable { kind: "float", .. })));
        assert!(matches!(generator.generate(&types, 3), Err(GenerationError::Unsatisfiable { kind: "float", .. })));
    }

    #[test]
    fn zero_max_length_yields_empty_string() {
        let types = graph(json!([{"kind": "string", "max_length": 0}]));
        assert_eq!(ValueGenerator::seeded(2).generate(&types, 0).expect("empty string"), json!(""));
    }

    #[test]
    fn most_negative_step_does_not_overflow() {
        let types = graph(json!([{"kind": "integer", "minimum": -10, "maximum": 10, "multiple_of": i64::MIN}]));
        assert_eq!(ValueGenerator::seeded(4).generate(&types, 0).expect("zero is the only multiple"), json!(0));
    }

    #[test]
    fn contradictory_constraints_are_reported() {
        let types = graph(json!([
            {"kind": "integer", "minimum": 5, "maximum": 1},
            {"kind": "string", "min_length": 8, "max_length": 2}
        ]));
        let mut generator = ValueGenerator::seeded(0);
        assert!(matches!(generator.generate(&types, 0), Err(GenerationError::Unsatisfiable { kind: "integer", .. })));
        assert!(matches!(generator.generate(&types, 1), Err(GenerationError::Unsatisfiable { kind: "string", .. })));
    }
}
