//! Field projection policies for shaping records before persistence.
//!
//! Every record that lands on disk passes through exactly one policy:
//! keep everything, keep everything non-null, or build a fresh document
//! from an explicit ordered field list. The explicit form is the only one
//! that can rename or reorder fields.

use serde_json::{Map, Value};

use crate::path::{FieldPath, InvalidPathError};

/// A single projection entry: a compiled path plus the key it lands
/// under in the output document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    path: FieldPath,
    alias: String,
}

impl Field {
    /// Parses a pick-list entry: either `"path"` or `"path as alias"`.
    pub fn parse(entry: &str) -> Result<Self, InvalidPathError> {
        match split_alias(entry) {
            Some((path, alias)) => Self::aliased(path, alias),
            None => Self::named(entry),
        }
    }

    /// A field keyed by its path's final segment.
    pub fn named(path: &str) -> Result<Self, InvalidPathError> {
        let path = FieldPath::compile(path)?;
        let alias = path.last_segment().to_owned();
        Ok(Self { path, alias })
    }

    /// A field explicitly renamed to `alias`.
    pub fn aliased(path: &str, alias: &str) -> Result<Self, InvalidPathError> {
        Ok(Self {
            path: FieldPath::compile(path)?,
            alias: alias.trim().to_owned(),
        })
    }
}

/// Splits `"path as alias"` on the first whitespace-delimited `as`.
fn split_alias(entry: &str) -> Option<(&str, &str)> {
    let mut from = 0;
    while let Some(rel) = entry[from..].find("as") {
        let start = from + rel;
        let end = start + 2;
        let before = entry[..start].chars().last();
        let after = entry[end..].chars().next();
        if before.is_some_and(char::is_whitespace) && after.is_some_and(char::is_whitespace) {
            return Some((entry[..start].trim_end(), entry[end..].trim_start()));
        }
        from = end;
    }
    None
}

/// How a record is shaped before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum PickPolicy {
    /// Shallow copy of every field.
    All,
    /// Shallow copy excluding null-valued fields.
    NotNull,
    /// A fresh document holding exactly the listed fields, in list order.
    Explicit(Vec<Field>),
}

impl PickPolicy {
    pub fn apply(&self, record: &Value) -> Value {
        match self {
            PickPolicy::All => record.clone(),
            PickPolicy::NotNull => match record.as_object() {
                Some(map) => Value::Object(
                    map.iter()
                        .filter(|(_, value)| !value.is_null())
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect(),
                ),
                None => record.clone(),
            },
            PickPolicy::Explicit(fields) => {
                let mut out = Map::new();
                for field in fields {
                    // an absent source value leaves the alias out entirely
                    if let Some(value) = field.path.evaluate(record) {
                        out.insert(field.alias.clone(), value.clone());
                    }
                }
                Value::Object(out)
            }
        }
    }
}
