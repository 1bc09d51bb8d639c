//! Dispatch - the unit of tracked data flowing through the pipeline

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::DataObject;

/// Standard payload keys added on creation
pub mod keys {
    pub const EVENT_NAME: &str = "event_name";
    pub const EVENT_TYPE: &str = "event_type";
    pub const REQUEST_UUID: &str = "request_uuid";
    pub const TIMESTAMP: &str = "timestamp_epoch_ms";
    pub const COMMAND_NAME: &str = "command_name";
}

/// Kind of tracked call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchType {
    Event,
    View,
}

impl DispatchType {
    pub fn friendly_name(&self) -> &'static str {
        match self {
            DispatchType::Event => "event",
            DispatchType::View => "view",
        }
    }
}

/// A tracked event with a stable id and a mutable payload
///
/// The id never changes; the payload may be extended by transformers or
/// replaced wholesale by mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    id: String,
    timestamp: i64,
    payload: DataObject,
}

impl Dispatch {
    /// Create a new dispatch with a fresh id and the standard keys populated
    pub fn new(event_name: impl Into<String>, dispatch_type: DispatchType, data: DataObject) -> Self {
        let id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();

        let mut payload = data;
        payload.insert(keys::EVENT_NAME.into(), Value::String(event_name.into()));
        payload.insert(
            keys::EVENT_TYPE.into(),
            Value::String(dispatch_type.friendly_name().into()),
        );
        payload.insert(keys::REQUEST_UUID.into(), Value::String(id.clone()));
        payload.insert(keys::TIMESTAMP.into(), Value::from(timestamp));

        Self {
            id,
            timestamp,
            payload,
        }
    }

    /// Rebuild a dispatch read back from storage
    pub fn restore(id: impl Into<String>, payload: DataObject, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation time, epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &DataObject {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut DataObject {
        &mut self.payload
    }

    pub fn into_payload(self) -> DataObject {
        self.payload
    }

    /// Event name, if the payload still carries one
    pub fn event_name(&self) -> Option<&str> {
        self.payload.get(keys::EVENT_NAME).and_then(Value::as_str)
    }

    pub fn dispatch_type(&self) -> Option<DispatchType> {
        match self.payload.get(keys::EVENT_TYPE).and_then(Value::as_str) {
            Some("event") => Some(DispatchType::Event),
            Some("view") => Some(DispatchType::View),
            _ => None,
        }
    }

    /// Merge `data` into the payload, overwriting existing keys
    pub fn add_all(&mut self, data: DataObject) {
        for (key, value) in data {
            self.payload.insert(key, value);
        }
    }

    /// Replace the whole payload, keeping id and timestamp
    pub fn replace(&mut self, payload: DataObject) {
        self.payload = payload;
    }

    /// Short label for logs: `<first 5 chars of id>-<event name>`
    pub fn log_description(&self) -> String {
        let prefix: String = self.id.chars().take(5).collect();
        format!("{}-{}", prefix, self.event_name().unwrap_or_default())
    }
}

/// Outcome of `track`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Durably queued, not necessarily delivered
    Accepted,
    Dropped,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Accepted => "accepted",
            TrackStatus::Dropped => "dropped",
        }
    }
}

/// Result reported for every tracked dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    pub dispatch: Dispatch,
    pub status: TrackStatus,
    pub info: String,
}

impl TrackResult {
    pub fn accepted(dispatch: Dispatch, info: impl Into<String>) -> Self {
        Self {
            dispatch,
            status: TrackStatus::Accepted,
            info: info.into(),
        }
    }

    pub fn dropped(dispatch: Dispatch, info: impl Into<String>) -> Self {
        Self {
            dispatch,
            status: TrackStatus::Dropped,
            info: info.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == TrackStatus::Accepted
    }
}
