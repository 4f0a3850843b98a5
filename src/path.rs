//! Dotted/bracketed field paths over JSON records.
//!
//! A path string like `summaryDTO.measurements[0].value` compiles once
//! into a reusable accessor and is then evaluated against many records.
//! Bracket segments are rewritten to dot segments before splitting, so
//! `a[0].b` and `a.0.b` compile to the same path.

use serde_json::Value;

/// A path expression with no usable segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPathError(pub String);

impl std::fmt::Display for InvalidPathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid path: '{}'", self.0)
    }
}

impl std::error::Error for InvalidPathError {}

/// A compiled field path: an ordered list of key/index segments.
///
/// Compilation is the only step that can fail; evaluation always
/// produces a value or reports it absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Compiles a path string. Segments are split on `.` after bracket
    /// rewriting, trimmed, and kept only if they contain at least one
    /// word character (ASCII letter, digit, or underscore).
    pub fn compile(path: &str) -> Result<Self, InvalidPathError> {
        let normalized = rewrite_brackets(path);
        let segments: Vec<String> = normalized
            .split('.')
            .map(str::trim)
            .filter(|segment| segment.chars().any(is_word_char))
            .map(str::to_owned)
            .collect();
        if segments.is_empty() {
            return Err(InvalidPathError(path.to_owned()));
        }
        Ok(Self { segments })
    }

    /// The last segment of the path, used as the default projection alias.
    pub fn last_segment(&self) -> &str {
        // compile guarantees at least one segment
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Walks the path through `data`. Returns `None` when a step lands on
    /// nothing; a `null` reached along the way short-circuits and is
    /// returned as the result instead of failing.
    pub fn evaluate<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        let mut current = data;
        for segment in &self.segments {
            if current.is_null() {
                return Some(current);
            }
            current = step(current, segment)?;
        }
        Some(current)
    }
}

/// One resolution step: arrays resolve integer segments as indexes
/// (negative counts from the end), everything else resolves by key.
fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    if let Value::Array(items) = value {
        if let Ok(index) = segment.parse::<i64>() {
            let index = if index < 0 {
                index + items.len() as i64
            } else {
                index
            };
            return usize::try_from(index).ok().and_then(|i| items.get(i));
        }
    }
    value.get(segment)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrites every `[expr]` (at least one character inside, shortest
/// match) into `.expr`. Text without a matching close bracket is left
/// untouched.
fn rewrite_brackets(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('[') {
        let inner_start = open + 1;
        let tail = &rest[inner_start..];
        let close_rel = tail
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == ']')
            .map(|(i, _)| i);
        match close_rel {
            Some(rel) => {
                out.push_str(&rest[..open]);
                out.push('.');
                out.push_str(&tail[..rel]);
                rest = &rest[inner_start + rel + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}
