//! Compiled requirement queries.
//!
//! A [`Requirements`] spec is compiled once into a [`Query`]: a conjunction
//! of per-field predicates. Unknown `$`-operators and malformed operands are
//! rejected here, before any matching happens; matching itself is
//! deterministic and side-effect free.

use crate::error::{ReslockError, Result};
use crate::requirements::Requirements;
use crate::resource::ResourceRecord;
use regex::Regex;
use serde_json::Value;

/// Recognized predicate operators inside one predicate object.
#[derive(Debug, Clone)]
enum Op {
    /// `$exists`: field presence (true) or absence (false).
    Exists(bool),
    /// `$in`: field must be present and its value a member of the list.
    In(Vec<Value>),
    /// `$nin`: field absent, or its value not a member of the list.
    Nin(Vec<Value>),
    /// `$regex`: field present, textual, and matched (substring search).
    Regex(Regex),
}

/// Predicate attached to one requirement key.
#[derive(Debug, Clone)]
enum Predicate {
    /// Deep value equality; the field must be present.
    Literal(Value),
    /// One or more operators, all of which must pass.
    Ops(Vec<Op>),
}

#[derive(Debug, Clone)]
struct Clause {
    key: String,
    predicate: Predicate,
}

/// A compiled requirement specification, ready for matching.
#[derive(Debug, Clone)]
pub struct Query {
    clauses: Vec<Clause>,
}

const RECOGNIZED_OPS: [&str; 4] = ["$exists", "$in", "$nin", "$regex"];

impl Query {
    /// Compile a requirement spec.
    ///
    /// An object value containing any `$`-prefixed key is a predicate
    /// object; every key inside it must then be one of `$exists`, `$in`,
    /// `$nin`, `$regex` with a well-typed operand. An object value with no
    /// `$`-keys is an ordinary literal matched by deep equality.
    pub fn compile(requirements: &Requirements) -> Result<Self> {
        let mut clauses = Vec::with_capacity(requirements.fields().len());
        for (key, value) in requirements.fields() {
            let predicate = match value {
                Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                    let mut ops = Vec::with_capacity(map.len());
                    for (op, operand) in map {
                        ops.push(compile_op(op, operand)?);
                    }
                    Predicate::Ops(ops)
                }
                other => Predicate::Literal(other.clone()),
            };
            clauses.push(Clause {
                key: key.clone(),
                predicate,
            });
        }
        Ok(Self { clauses })
    }

    /// Whether the record satisfies every clause of this query.
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }

    /// Filter an inventory snapshot down to the matching candidates.
    pub fn filter<'a>(&self, records: &'a [ResourceRecord]) -> Vec<&'a ResourceRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

fn compile_op(op: &str, operand: &Value) -> Result<Op> {
    match op {
        "$exists" => match operand {
            Value::Bool(b) => Ok(Op::Exists(*b)),
            other => Err(ReslockError::Parse(format!(
                "unsupported $exists value: {other}"
            ))),
        },
        "$in" => match operand {
            Value::Array(items) => Ok(Op::In(items.clone())),
            other => Err(ReslockError::Parse(format!(
                "unsupported $in value: {other}"
            ))),
        },
        "$nin" => match operand {
            Value::Array(items) => Ok(Op::Nin(items.clone())),
            other => Err(ReslockError::Parse(format!(
                "unsupported $nin value: {other}"
            ))),
        },
        "$regex" => match operand {
            Value::String(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    ReslockError::Parse(format!("invalid $regex pattern '{pattern}': {e}"))
                })?;
                Ok(Op::Regex(regex))
            }
            other => Err(ReslockError::Parse(format!(
                "unsupported $regex value: {other}"
            ))),
        },
        unknown => Err(ReslockError::Parse(format!(
            "unsupported operator: {unknown} (expected one of {})",
            RECOGNIZED_OPS.join(", ")
        ))),
    }
}

impl Clause {
    fn matches(&self, record: &ResourceRecord) -> bool {
        match &self.predicate {
            Predicate::Literal(expected) => record.get(&self.key) == Some(expected),
            Predicate::Ops(ops) => ops.iter().all(|op| op.matches(&self.key, record)),
        }
    }
}

impl Op {
    fn matches(&self, key: &str, record: &ResourceRecord) -> bool {
        match self {
            Op::Exists(expected) => record.contains(key) == *expected,
            Op::In(items) => match record.get(key) {
                Some(value) => items.contains(value),
                None => false,
            },
            Op::Nin(items) => match record.get(key) {
                Some(value) => !items.contains(value),
                None => true,
            },
            // Substring search, not a full-string anchor. Non-textual field
            // values never match.
            Op::Regex(regex) => record
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_match(text)),
        }
    }
}
