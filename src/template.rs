//! String templates with `{path}` placeholders.
//!
//! A template compiles into alternating literal text and field paths and
//! is evaluated against a record to produce interpolated output, used for
//! URLs and output file paths. Braces do not nest and cannot be escaped;
//! an empty template is a valid pure literal.

use serde_json::Value;

use crate::path::{FieldPath, InvalidPathError};

/// A compiled template. Holds `resolvers.len() + 1` literal segments so
/// evaluation is a plain interleave.
#[derive(Debug, Clone)]
pub struct Template {
    literals: Vec<String>,
    resolvers: Vec<FieldPath>,
}

impl Template {
    /// Compiles a template string, extracting each `{...}` placeholder
    /// (shortest match, at least one character inside) as a field path.
    pub fn compile(template: &str) -> Result<Self, InvalidPathError> {
        let mut literals = Vec::new();
        let mut resolvers = Vec::new();
        let mut rest = template;
        while let Some((open, close)) = next_placeholder(rest) {
            literals.push(rest[..open].to_owned());
            resolvers.push(FieldPath::compile(&rest[open + 1..close])?);
            rest = &rest[close + 1..];
        }
        literals.push(rest.to_owned());
        Ok(Self { literals, resolvers })
    }

    /// Interpolates the template against `data` in source order.
    pub fn evaluate(&self, data: &Value) -> String {
        let mut out = self.literals[0].clone();
        for (resolver, literal) in self.resolvers.iter().zip(&self.literals[1..]) {
            out.push_str(&stringify(resolver.evaluate(data)));
            out.push_str(literal);
        }
        out
    }
}

/// Renders a resolved value into template output. The rule, applied
/// everywhere a template is evaluated: an absent value renders as
/// `undefined` and a null as `null` (so a broken placeholder is visible
/// in the produced path or URL instead of silently vanishing); strings
/// render raw, numbers and booleans via their display form, and
/// arrays/objects as compact JSON.
fn stringify(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_owned(),
        Some(Value::Null) => "null".to_owned(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Finds the next placeholder: the first `{`, closed by the first `}`
/// that leaves at least one character between them. Returns byte offsets
/// of both braces.
fn next_placeholder(s: &str) -> Option<(usize, usize)> {
    let open = s.find('{')?;
    let tail = &s[open + 1..];
    let (rel, _) = tail.char_indices().skip(1).find(|&(_, c)| c == '}')?;
    Some((open, open + 1 + rel))
}
