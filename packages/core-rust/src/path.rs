//! Dotted field paths over record documents.
//!
//! A [`FieldPath`] addresses a value inside the JSON form of a record:
//! `raw.items[0].sku` is the segment list `raw`, `items`, `0`, `sku`.
//! Numeric segments index arrays; everything else indexes objects.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// One dot-separated part: a name followed by optional `[n]` indices.
fn part_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^\[\]]*)((?:\[\d+\])*)$").unwrap_or_else(|e| panic!("bad pattern: {e}"))
    })
}

fn index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap_or_else(|e| panic!("bad pattern: {e}")))
}

/// A validated, non-empty path into a record document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses a dotted path such as `raw.sub` or `raw.items[2].sku`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for an empty path, an empty segment, or
    /// malformed bracket syntax.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        if path.is_empty() {
            return Err(StoreError::invalid_path(path, "path is empty"));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            let captures = part_pattern()
                .captures(part)
                .ok_or_else(|| StoreError::invalid_path(path, "malformed index brackets"))?;
            let name = captures.get(1).map_or("", |m| m.as_str());
            let indices = captures.get(2).map_or("", |m| m.as_str());

            if name.is_empty() && (indices.is_empty() || segments.is_empty()) {
                return Err(StoreError::invalid_path(path, "empty path segment"));
            }
            if !name.is_empty() {
                segments.push(name.to_string());
            }
            for index in index_pattern().captures_iter(indices) {
                segments.push(index[1].to_string());
            }
        }

        Ok(Self { segments })
    }

    /// Builds a path from explicit segments, without any dot splitting.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` when there are no segments or any is empty.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let path = Self { segments };
        if path.segments.is_empty() {
            return Err(StoreError::invalid_path("", "path is empty"));
        }
        if path.segments.iter().any(String::is_empty) {
            return Err(StoreError::invalid_path(path.to_string(), "empty path segment"));
        }
        Ok(path)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The top-level field this path lives under.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Segments below the root.
    #[must_use]
    pub fn tail(&self) -> &[String] {
        &self.segments[1..]
    }

    #[must_use]
    pub fn leaf(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// The enclosing path, or `None` for a top-level path.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Resolves the path against `document`.
    #[must_use]
    pub fn lookup<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        lookup_in(document, &self.segments)
    }

    /// Writes `value` at the path, creating intermediate objects as needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` when a non-numeric segment meets an array or an
    /// index lies beyond the end of an array.
    pub fn assign(&self, document: &mut Value, value: Value) -> Result<(), StoreError> {
        assign_in(document, &self.segments, value, self)
    }

    /// Removes the value at the path, returning it if it was present.
    pub fn remove(&self, document: &mut Value) -> Option<Value> {
        let (leaf, parents) = self.segments.split_last()?;
        match lookup_in_mut(document, parents)? {
            Value::Object(map) => map.remove(leaf),
            Value::Array(items) => {
                let index = leaf.parse::<usize>().ok()?;
                (index < items.len()).then(|| items.remove(index))
            }
            _ => None,
        }
    }
}

fn lookup_in<'a>(document: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn lookup_in_mut<'a>(document: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i)),
            _ => None,
        })
}

fn assign_in(
    target: &mut Value,
    segments: &[String],
    value: Value,
    path: &FieldPath,
) -> Result<(), StoreError> {
    let Some((segment, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };

    match target {
        Value::Object(map) => {
            let slot = map.entry(segment.clone()).or_insert(Value::Null);
            assign_in(slot, rest, value, path)
        }
        Value::Array(items) => {
            let index = segment.parse::<usize>().map_err(|_| {
                StoreError::invalid_path(path.to_string(), format!("{segment:?} indexes an array"))
            })?;
            if index > items.len() {
                return Err(StoreError::invalid_path(
                    path.to_string(),
                    format!("index {index} is past the end of an array of {}", items.len()),
                ));
            }
            if index == items.len() {
                items.push(Value::Null);
            }
            assign_in(&mut items[index], rest, value, path)
        }
        other => {
            *other = Value::Object(Map::new());
            assign_in(other, segments, value, path)
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn parse_splits_dots_and_brackets() {
        assert_eq!(path("raw").segments(), ["raw"]);
        assert_eq!(path("raw.sub").segments(), ["raw", "sub"]);
        assert_eq!(path("raw.items[2].sku").segments(), ["raw", "items", "2", "sku"]);
        assert_eq!(path("raw.grid[1][0]").segments(), ["raw", "grid", "1", "0"]);
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for bad in ["", "raw.", ".raw", "raw..sub", "raw[x]", "raw[1", "[0]"] {
            assert!(
                matches!(FieldPath::parse(bad), Err(StoreError::InvalidPath { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn from_segments_keeps_dots_literal() {
        let p = FieldPath::from_segments(["raw", "a.b"]).unwrap();
        assert_eq!(p.depth(), 2);
        assert_eq!(p.leaf(), "a.b");
        assert!(FieldPath::from_segments(Vec::<String>::new()).is_err());
        assert!(FieldPath::from_segments(["raw", ""]).is_err());
    }

    #[test]
    fn parent_and_root() {
        let p = path("raw.a.b");
        assert_eq!(p.root(), "raw");
        assert_eq!(p.tail(), ["a", "b"]);
        assert_eq!(p.parent().unwrap(), path("raw.a"));
        assert!(path("raw").parent().is_none());
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let doc = json!({"raw": {"items": [{"sku": "A"}, {"sku": "B"}]}});
        assert_eq!(path("raw.items[1].sku").lookup(&doc), Some(&json!("B")));
        assert_eq!(path("raw.items.0.sku").lookup(&doc), Some(&json!("A")));
        assert_eq!(path("raw.items[5]").lookup(&doc), None);
        assert_eq!(path("raw.missing.deep").lookup(&doc), None);
    }

    #[test]
    fn assign_creates_intermediates() {
        let mut doc = json!({"raw": null});
        path("raw.a.b").assign(&mut doc, json!(1)).unwrap();
        assert_eq!(doc, json!({"raw": {"a": {"b": 1}}}));
    }

    #[test]
    fn assign_preserves_siblings() {
        let mut doc = json!({"a": {"x": 1}});
        path("a.y").assign(&mut doc, json!(2)).unwrap();
        assert_eq!(doc, json!({"a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn assign_into_arrays() {
        let mut doc = json!({"items": [1, 2]});
        path("items[0]").assign(&mut doc, json!(10)).unwrap();
        path("items[2]").assign(&mut doc, json!(30)).unwrap();
        assert_eq!(doc, json!({"items": [10, 2, 30]}));

        assert!(path("items[9]").assign(&mut doc, json!(0)).is_err());
        assert!(path("items.name").assign(&mut doc, json!(0)).is_err());
    }

    #[test]
    fn assign_replaces_scalars_with_objects() {
        let mut doc = json!({"raw": 5});
        path("raw.sub").assign(&mut doc, json!(true)).unwrap();
        assert_eq!(doc, json!({"raw": {"sub": true}}));
    }

    #[test]
    fn remove_returns_removed_value() {
        let mut doc = json!({"raw": {"sub": 5, "other": 1}, "list": [1, 2, 3]});
        assert_eq!(path("raw.sub").remove(&mut doc), Some(json!(5)));
        assert_eq!(path("list[1]").remove(&mut doc), Some(json!(2)));
        assert_eq!(path("raw.nope").remove(&mut doc), None);
        assert_eq!(doc, json!({"raw": {"other": 1}, "list": [1, 3]}));
    }

    #[test]
    fn display_round_trips_dotted_form() {
        assert_eq!(path("raw.items[2]").to_string(), "raw.items.2");
    }
}
