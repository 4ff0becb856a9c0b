//! Messages and events as they travel over a topic.
//!
//! On the wire a message is a UTF-8 JSON document with exactly two top-level
//! fields, `type` and `data`. `data` is an open-ended JSON object; the bus
//! never looks inside it, handlers are responsible for validating its shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A typed message published onto a topic.
///
/// `message_type` is the routing key handlers are resolved by. It cannot be
/// changed after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: Map<String, Value>,
}

/// The output of handling a message. An event is republished onto the same
/// topic and is indistinguishable from a message on the wire.
pub type Event = Message;

impl Message {
    /// Create a message with empty `data`.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            data: Map::new(),
        }
    }

    /// Add or replace one `data` entry. Insertion order is kept.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Build a message whose `data` is the serialized form of `payload`.
    ///
    /// Fails when `payload` does not serialize to a JSON object.
    pub fn from_data<T: Serialize>(
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let data = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "message data must be an object, got {other}"
                )));
            }
        };
        Ok(Self {
            message_type: message_type.into(),
            data,
        })
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Read `data` back as a typed payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
