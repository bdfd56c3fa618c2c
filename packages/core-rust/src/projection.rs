//! Projection capability used by reads and mutations that carry a query.
//!
//! The store never interprets a query itself; it hands the query string and
//! the value being returned to a [`Projection`] supplied by the embedding
//! layer. [`FieldSelection`] is a small built-in implementation.

use serde_json::{Map, Value};

use crate::path::FieldPath;

/// Extracts a sub-view of a record document.
///
/// Used as `Arc<dyn Projection>`.
pub trait Projection: Send + Sync {
    /// Applies `query` to `value`.
    ///
    /// # Errors
    ///
    /// Returns an error when the query cannot be applied; the store reports
    /// it to the caller as `InvalidQuery`.
    fn project(&self, query: &str, value: &Value) -> anyhow::Result<Value>;
}

/// Selects field paths listed in the query, separated by whitespace or commas.
///
/// `"amount status raw.sub"` turns a record document into
/// `{"amount": .., "status": .., "raw": {"sub": ..}}`. Paths that do not
/// resolve are omitted. A path that indexes into an array selects the whole
/// enclosing array, so `raw.items[1]` yields `{"raw": {"items": [..]}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldSelection;

impl Projection for FieldSelection {
    fn project(&self, query: &str, value: &Value) -> anyhow::Result<Value> {
        let paths = query
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(FieldPath::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if paths.is_empty() {
            anyhow::bail!("query selects no fields");
        }

        let mut selected = Value::Object(Map::new());
        for path in &paths {
            let target = enclosing_array(path, value).unwrap_or_else(|| path.clone());
            if let Some(found) = target.lookup(value) {
                target.assign(&mut selected, found.clone())?;
            }
        }
        Ok(selected)
    }
}

/// Outermost proper prefix of `path` that resolves to an array in `value`.
fn enclosing_array(path: &FieldPath, value: &Value) -> Option<FieldPath> {
    (1..path.depth())
        .filter_map(|len| FieldPath::from_segments(path.segments()[..len].iter().cloned()).ok())
        .find(|prefix| matches!(prefix.lookup(value), Some(Value::Array(_))))
}
