//! Field mapping definitions and builder

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{keys, JsonPath};

/// Inputs of a single mapping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MappingParameters {
    /// Source path in the original payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<JsonPath>,

    /// Stringified source value must equal this for the mapping to apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Literal value written instead of the source value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_to: Option<Value>,
}

/// One configured mapping: where to write, and what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingOperation {
    pub destination: JsonPath,
    #[serde(flatten)]
    pub parameters: MappingParameters,
}

/// A builder argument is one literal key; use `JsonPath::parse` for nesting
impl From<&str> for JsonPath {
    fn from(key: &str) -> Self {
        JsonPath::key(key)
    }
}

/// Builder for a dispatcher's mapping list
///
/// ```
/// use contracts::Mappings;
///
/// let mut mappings = Mappings::new();
/// mappings.map_from("page", "screen");
/// mappings.map_constant("purchase", "event").if_value_equals_at("event_name", "buy");
/// mappings.keep("user_id");
/// assert_eq!(mappings.build().len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Mappings {
    operations: Vec<MappingOperation>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the value at `source` to `destination`
    pub fn map_from(
        &mut self,
        source: impl Into<JsonPath>,
        destination: impl Into<JsonPath>,
    ) -> MappingOptions<'_> {
        self.push(MappingOperation {
            destination: destination.into(),
            parameters: MappingParameters {
                reference: Some(source.into()),
                ..Default::default()
            },
        })
    }

    /// Write a literal value to `destination`
    pub fn map_constant(
        &mut self,
        value: impl Into<Value>,
        destination: impl Into<JsonPath>,
    ) -> MappingOptions<'_> {
        self.push(MappingOperation {
            destination: destination.into(),
            parameters: MappingParameters {
                map_to: Some(value.into()),
                ..Default::default()
            },
        })
    }

    /// Keep `key` under the same name
    pub fn keep(&mut self, key: impl Into<JsonPath>) -> MappingOptions<'_> {
        let key = key.into();
        self.map_from(key.clone(), key)
    }

    /// Emit `name` as the dispatcher command
    pub fn map_command(&mut self, name: impl Into<String>) -> MappingOptions<'_> {
        self.map_constant(Value::String(name.into()), keys::COMMAND_NAME)
    }

    pub fn build(self) -> Vec<MappingOperation> {
        self.operations
    }

    fn push(&mut self, operation: MappingOperation) -> MappingOptions<'_> {
        self.operations.push(operation);
        let last = self.operations.len() - 1;
        MappingOptions {
            operation: &mut self.operations[last],
        }
    }
}

/// Conditions on the most recently added mapping
pub struct MappingOptions<'a> {
    operation: &'a mut MappingOperation,
}

impl MappingOptions<'_> {
    /// Apply only when the source value stringifies to `value`
    pub fn if_value_equals(self, value: impl Into<String>) -> Self {
        self.operation.parameters.filter = Some(value.into());
        self
    }

    /// Apply only when the value at `path` stringifies to `value`
    ///
    /// `path` becomes the mapping's source.
    pub fn if_value_equals_at(self, path: impl Into<JsonPath>, value: impl Into<String>) -> Self {
        self.operation.parameters.reference = Some(path.into());
        self.operation.parameters.filter = Some(value.into());
        self
    }

    /// Apply only to dispatches of type event
    pub fn for_all_events(self) -> Self {
        self.if_value_equals_at(keys::EVENT_TYPE, "event")
    }

    /// Apply only to dispatches of type view
    pub fn for_all_views(self) -> Self {
        self.if_value_equals_at(keys::EVENT_TYPE, "view")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_operations() {
        let mut mappings = Mappings::new();
        mappings.map_from("a", "b");
        mappings.map_command("track").for_all_events();
        let ops = mappings.build();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].parameters.reference, Some(JsonPath::key("a")));
        assert_eq!(ops[0].destination, JsonPath::key("b"));
        assert_eq!(ops[1].destination, JsonPath::key(keys::COMMAND_NAME));
        assert_eq!(ops[1].parameters.map_to, Some(json!("track")));
        assert_eq!(ops[1].parameters.reference, Some(JsonPath::key(keys::EVENT_TYPE)));
        assert_eq!(ops[1].parameters.filter.as_deref(), Some("event"));
    }

    #[test]
    fn test_keep_maps_to_itself() {
        let mut mappings = Mappings::new();
        mappings.keep("user");
        let ops = mappings.build();
        assert_eq!(ops[0].parameters.reference.as_ref(), Some(&ops[0].destination));
    }

    #[test]
    fn test_operation_deserializes_flat() {
        let op: MappingOperation = serde_json::from_value(json!({
            "destination": "obj.list[0]",
            "reference": "a",
            "filter": "10"
        }))
        .unwrap();

        assert_eq!(op.destination, JsonPath::parse("obj.list[0]").unwrap());
        assert_eq!(op.parameters.reference, Some(JsonPath::key("a")));
        assert_eq!(op.parameters.filter.as_deref(), Some("10"));
        assert_eq!(op.parameters.map_to, None);
    }

    #[test]
    fn test_dotted_builder_key_survives_serialization() {
        let mut mappings = Mappings::new();
        mappings.map_from("user.id", "ids[0]");
        let ops = mappings.build();

        let json = serde_json::to_value(&ops[0]).unwrap();
        assert_eq!(json["reference"], json!("user\\.id"));

        let back: MappingOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, ops[0]);
        assert_eq!(back.parameters.reference, Some(JsonPath::key("user.id")));
    }
}
