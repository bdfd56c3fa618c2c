//! Path-addressed updates and the merge patches they produce.
//!
//! An [`UpdateSpec`] describes what a caller wants changed. Resolving it
//! against the current record document yields a [`Patch`]: the set of
//! top-level fields that change, each carrying its full merged value so that
//! untouched siblings under the same field survive the write.

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::path::FieldPath;
use crate::record::Record;

/// One path or a list of paths, as accepted by reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    Single(FieldPath),
    Many(Vec<FieldPath>),
}

impl PathSpec {
    /// Parses a single dotted path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` when the path is malformed.
    pub fn single(path: &str) -> Result<Self, StoreError> {
        FieldPath::parse(path).map(Self::Single)
    }

    /// Parses a list of dotted paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` when the list is empty or any path is malformed.
    pub fn many<I, S>(paths: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = paths
            .into_iter()
            .map(|p| FieldPath::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if paths.is_empty() {
            return Err(StoreError::invalid_path("", "path list is empty"));
        }
        Ok(Self::Many(paths))
    }

    /// Reads the value(s) addressed by this spec, substituting `default`
    /// (or null) for anything that does not resolve.
    ///
    /// A single path yields a single value; a path list yields an array in
    /// the same order.
    #[must_use]
    pub fn extract(&self, document: &Value, default: Option<&Value>) -> Value {
        let resolve = |path: &FieldPath| {
            path.lookup(document)
                .or(default)
                .cloned()
                .unwrap_or(Value::Null)
        };
        match self {
            Self::Single(path) => resolve(path),
            Self::Many(paths) => Value::Array(paths.iter().map(resolve).collect()),
        }
    }
}

impl From<FieldPath> for PathSpec {
    fn from(path: FieldPath) -> Self {
        Self::Single(path)
    }
}

/// What a `set` call changes.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Replace each listed top-level field wholesale.
    WholeObject(Map<String, Value>),
    /// Write one value at one path.
    SinglePath(FieldPath, Value),
    /// Write `values[i]` at `paths[i]`.
    MultiPath(Vec<FieldPath>, Vec<Value>),
}

impl UpdateSpec {
    /// Builds a spec from an untyped payload and an optional path spec.
    ///
    /// Without a path `data` must be an object; with a path list it must be
    /// an array of the same length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUpdateData` when `data` does not fit the path shape.
    pub fn from_parts(data: Value, path: Option<PathSpec>) -> Result<Self, StoreError> {
        match (path, data) {
            (None, Value::Object(fields)) => Ok(Self::WholeObject(fields)),
            (None, other) => Err(StoreError::invalid_update(format!(
                "expected an object without a path, got {}",
                kind_of(&other)
            ))),
            (Some(PathSpec::Single(path)), value) => Ok(Self::SinglePath(path, value)),
            (Some(PathSpec::Many(paths)), Value::Array(values)) => Ok(Self::MultiPath(paths, values)),
            (Some(PathSpec::Many(_)), other) => Err(StoreError::invalid_update(format!(
                "expected an array of values for a path list, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Resolves the spec against the current record document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUpdateData` for an empty object or mismatched
    /// path/value lists, and `InvalidPath` when a path cannot be written.
    pub fn compute_patch(&self, current: &Value) -> Result<Patch, StoreError> {
        match self {
            Self::WholeObject(fields) => {
                if fields.is_empty() {
                    return Err(StoreError::invalid_update("update object has no fields"));
                }
                Ok(Patch {
                    fields: fields.clone(),
                })
            }
            Self::SinglePath(path, value) => {
                let mut patch = Patch::default();
                patch.merge_path(current, path, value.clone())?;
                Ok(patch)
            }
            Self::MultiPath(paths, values) => {
                if paths.len() != values.len() {
                    return Err(StoreError::invalid_update(format!(
                        "{} paths but {} values",
                        paths.len(),
                        values.len()
                    )));
                }
                if paths.is_empty() {
                    return Err(StoreError::invalid_update("path list is empty"));
                }
                let mut patch = Patch::default();
                for (path, value) in paths.iter().zip(values) {
                    patch.merge_path(current, path, value.clone())?;
                }
                Ok(patch)
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Top-level field replacements produced by the path-update engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: Map<String, Value>,
}

impl Patch {
    /// Builds a patch that replaces exactly the given top-level fields.
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builds the patch that removes the value at `path`.
    ///
    /// The parent of `path` is copied from `current`, the leaf is dropped from
    /// the copy, and the copy is written back at the parent path. Removing a
    /// leaf that is not present still yields a (no-op) patch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for top-level paths and `KeyNotFound` when the
    /// parent does not resolve to an object or array.
    pub fn removing(current: &Value, path: &FieldPath) -> Result<Self, StoreError> {
        let Some(parent) = path.parent() else {
            return Err(StoreError::invalid_path(
                path.to_string(),
                "top-level fields cannot be deleted",
            ));
        };

        let mut parent_value = match parent.lookup(current) {
            Some(value @ (Value::Object(_) | Value::Array(_))) => value.clone(),
            _ => {
                return Err(StoreError::KeyNotFound {
                    path: parent.to_string(),
                })
            }
        };

        let leaf = FieldPath::from_segments([path.leaf()])?;
        if leaf.remove(&mut parent_value).is_none() {
            tracing::debug!(path = %path, "delete target absent; writing parent unchanged");
        }

        let mut patch = Self::default();
        patch.merge_path(current, &parent, parent_value)?;
        Ok(patch)
    }

    /// Folds one path write into the patch, seeding the touched top-level
    /// field from the patch itself or from `current`.
    fn merge_path(
        &mut self,
        current: &Value,
        path: &FieldPath,
        value: Value,
    ) -> Result<(), StoreError> {
        let root = path.root().to_string();
        let mut seed = match self.fields.remove(&root) {
            Some(pending) => pending,
            None => current.get(&root).cloned().unwrap_or(Value::Null),
        };
        let rest = path.tail();
        if rest.is_empty() {
            seed = value;
        } else {
            FieldPath::from_segments(rest.iter().cloned())?.assign(&mut seed, value)?;
        }
        self.fields.insert(root, seed);
        Ok(())
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Produces the record that results from applying the patch.
    ///
    /// Immutable fields may only be "written" with their current value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUpdateData` for immutable-field changes, unknown fields
    /// or type mismatches, and `InvalidStatus` for an out-of-set status.
    pub fn apply_to(&self, record: &Record) -> Result<Record, StoreError> {
        let mut document = record.to_document();
        for field in Record::IMMUTABLE_FIELDS {
            if let Some(value) = self.fields.get(field) {
                if document.get(field) != Some(value) {
                    return Err(StoreError::invalid_update(format!("{field} cannot be changed")));
                }
            }
        }

        if let Value::Object(map) = &mut document {
            for (field, value) in &self.fields {
                map.insert(field.clone(), value.clone());
            }
        }
        Record::from_document(document)
    }
}
