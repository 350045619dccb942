//! Execution context: a JSON object addressed by dot-separated paths.
//!
//! Reads walk nested objects (and arrays, by numeric segment). Writes create
//! missing intermediate objects and replace any non-object value sitting on
//! the path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable state threaded through the steps of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Read the value at `path`. Empty paths and missing segments yield `None`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at `path`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        if let Some((parent, leaf)) = self.parent_mut(path) {
            parent.insert(leaf.to_string(), value);
        }
    }

    /// Like [`Context::set`], but `None` leaves the leaf absent while still
    /// creating the intermediate objects.
    pub fn set_or_clear(&mut self, path: &str, value: Option<Value>) {
        if let Some((parent, leaf)) = self.parent_mut(path) {
            match value {
                Some(v) => {
                    parent.insert(leaf.to_string(), v);
                }
                None => {
                    parent.remove(leaf);
                }
            }
        }
    }

    /// Shallow merge: each top-level key of `assign` replaces the context's.
    pub fn merge(&mut self, assign: &Map<String, Value>) {
        for (key, value) in assign {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Walk to the object that owns the last segment of `path`, replacing
    /// anything that is not an object along the way.
    fn parent_mut<'a>(&mut self, path: &'a str) -> Option<(&mut Map<String, Value>, &'a str)> {
        if path.is_empty() {
            return None;
        }
        let (parents, leaf) = match path.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, path),
        };
        let mut current = &mut self.0;
        if let Some(parents) = parents {
            for segment in parents.split('.') {
                let slot = current
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                let Value::Object(next) = slot else {
                    return None;
                };
                current = next;
            }
        }
        Some((current, leaf))
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
