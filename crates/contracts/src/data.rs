//! DataObject - ordered key/value payload and path addressing
//!
//! Payloads are `serde_json` maps with insertion order preserved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Ordered key -> value payload
pub type DataObject = Map<String, Value>;

/// A single payload value
pub type DataItem = Value;

/// One step of a `JsonPath`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Path into a nested `DataObject`
///
/// String form is dotted keys with optional indices: `obj.list[0].key`.
/// Always starts with a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Path to a single top-level key (the key is taken literally, dots included)
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Key(key.into())],
        }
    }

    /// Parse the dotted string form
    ///
    /// A backslash escapes the next character, so `a\.b` is the single key `a.b`.
    pub fn parse(path: &str) -> Result<Self, CoreError> {
        let invalid =
            |reason: String| CoreError::config_parse(format!("invalid path '{path}': {reason}"));
        let mut segments = Vec::new();
        let mut key = String::new();
        // set right after `]`, where only `.` or `[` may follow
        let mut closed = false;
        let mut chars = path.chars();

        while let Some(c) = chars.next() {
            match c {
                '.' | '[' => {
                    if !closed {
                        if key.is_empty() {
                            return Err(invalid("empty key".into()));
                        }
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                    closed = false;
                    if c == '[' {
                        let mut digits = String::new();
                        loop {
                            match chars.next() {
                                Some(']') => break,
                                Some(d) => digits.push(d),
                                None => return Err(invalid("unclosed index".into())),
                            }
                        }
                        segments.push(PathSegment::Index(parse_index(&digits).map_err(invalid)?));
                        closed = true;
                    }
                }
                _ if closed => return Err(invalid(format!("unexpected '{c}' after index"))),
                '\\' => key.push(
                    chars
                        .next()
                        .ok_or_else(|| invalid("dangling escape".into()))?,
                ),
                _ => key.push(c),
            }
        }

        if !closed {
            if key.is_empty() {
                return Err(invalid("empty key".into()));
            }
            segments.push(PathSegment::Key(key));
        }

        Ok(Self { segments })
    }

    /// Extend with a nested key
    pub fn then_key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    /// Extend with a list index
    pub fn then_index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }
}

impl FromStr for JsonPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    for c in key.chars() {
                        if matches!(c, '.' | '[' | ']' | '\\') {
                            f.write_str("\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                }
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Largest list index a path may address
pub const MAX_PATH_INDEX: usize = 4096;

fn parse_index(digits: &str) -> Result<usize, String> {
    let index = digits
        .parse::<usize>()
        .map_err(|e| format!("bad index '{digits}': {e}"))?;
    if index > MAX_PATH_INDEX {
        return Err(format!("index {index} exceeds {MAX_PATH_INDEX}"));
    }
    Ok(index)
}

/// Path-based access on `DataObject`
pub trait DataObjectExt {
    /// Value at `path`, if every step exists
    fn extract(&self, path: &JsonPath) -> Option<&DataItem>;

    /// Write `value` at `path`, creating missing objects/lists along the way
    ///
    /// Indices above `MAX_PATH_INDEX` are not written.
    fn build_path(&mut self, path: &JsonPath, value: DataItem);
}

impl DataObjectExt for DataObject {
    fn extract(&self, path: &JsonPath) -> Option<&DataItem> {
        let (first, rest) = path.segments.split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };

        rest.iter()
            .try_fold(self.get(key)?, |current, segment| match segment {
                PathSegment::Key(key) => current.as_object()?.get(key),
                PathSegment::Index(index) => current.as_array()?.get(*index),
            })
    }

    fn build_path(&mut self, path: &JsonPath, value: DataItem) {
        let Some((PathSegment::Key(key), rest)) = path.segments.split_first() else {
            return;
        };
        let slot = self.entry(key.clone()).or_insert(Value::Null);
        put(slot, rest, value);
    }
}

fn put(target: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };

    match head {
        PathSegment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let slot = map.entry(key.clone()).or_insert(Value::Null);
                put(slot, rest, value);
            }
        }
        PathSegment::Index(index) => {
            if *index > MAX_PATH_INDEX {
                return;
            }
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Value::Array(items) = target {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                put(&mut items[*index], rest, value);
            }
        }
    }
}

/// String form of a value as used by equality filters
///
/// Strings compare by content, missing values as `"null"`, everything else
/// by its JSON rendering.
pub fn stringify(value: Option<&DataItem>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}
