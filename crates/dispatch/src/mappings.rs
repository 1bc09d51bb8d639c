//! MappingsEngine - per-dispatcher payload remapping

use std::collections::BTreeMap;

use contracts::{stringify, DataItem, DataObject, DataObjectExt, Dispatch, MappingOperation};
use pubsub::Observable;
use serde_json::Value;
use tokio::sync::watch;

/// Rewrites dispatch payloads according to each dispatcher's mappings
#[derive(Clone)]
pub struct MappingsEngine {
    mappings: Observable<BTreeMap<String, Vec<MappingOperation>>>,
}

impl MappingsEngine {
    pub fn new(mappings: Observable<BTreeMap<String, Vec<MappingOperation>>>) -> Self {
        Self { mappings }
    }

    /// Engine over a mapping table that never changes
    pub fn fixed(mappings: BTreeMap<String, Vec<MappingOperation>>) -> Self {
        let (_, rx) = watch::channel(mappings);
        Self::new(rx)
    }

    /// Remap `dispatch` for `dispatcher_id`
    ///
    /// Dispatchers without mappings receive the dispatch unchanged.
    pub fn map(&self, dispatcher_id: &str, mut dispatch: Dispatch) -> Dispatch {
        let payload = {
            let mappings = self.mappings.borrow();
            match mappings.get(dispatcher_id) {
                Some(operations) if !operations.is_empty() => apply(operations, dispatch.payload()),
                _ => return dispatch,
            }
        };
        dispatch.replace(payload);
        dispatch
    }
}

/// Build a fresh payload from `payload` by applying `operations` in order
///
/// Fields no operation mentions are dropped.
pub fn apply(operations: &[MappingOperation], payload: &DataObject) -> DataObject {
    let mut result = DataObject::new();
    for operation in operations {
        let Some(value) = mapped_value(operation, payload) else {
            continue;
        };

        let value = if operation.parameters.map_to.is_some() {
            combine(result.extract(&operation.destination).cloned(), value)
        } else {
            value
        };
        result.build_path(&operation.destination, value);
    }
    result
}

fn mapped_value(operation: &MappingOperation, payload: &DataObject) -> Option<DataItem> {
    let parameters = &operation.parameters;
    let extracted = parameters
        .reference
        .as_ref()
        .and_then(|path| payload.extract(path));

    if let Some(filter) = &parameters.filter {
        if stringify(extracted) != *filter {
            return None;
        }
    }

    parameters.map_to.clone().or_else(|| extracted.cloned())
}

/// Merge a literal into whatever an earlier mapping wrote at the same place
fn combine(existing: Option<DataItem>, incoming: DataItem) -> DataItem {
    match existing {
        None | Some(Value::Null) => incoming,
        Some(Value::Array(mut items)) => {
            items.push(incoming);
            Value::Array(items)
        }
        Some(other) => Value::Array(vec![other, incoming]),
    }
}
