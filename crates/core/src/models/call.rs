//! Normalized call trees.
//!
//! A [`NormalizedCall`] is the decoded, serializable form of a runtime call.
//! Only its flattened JSON form is ever persisted.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

/// A decoded call with its arguments in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCall {
    /// `section.method`, e.g. `utility.batch`.
    pub method: String,
    /// `0x`-prefixed pallet and call index bytes.
    pub call_index: String,
    pub args: Vec<(String, ArgValue)>,
}

/// One argument value of a [`NormalizedCall`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Scalar(serde_json::Value),
    List(Vec<ArgValue>),
    Call(Box<NormalizedCall>),
    /// Bytes that were kept as-is because they could not be decoded.
    Opaque(Vec<u8>),
}

impl NormalizedCall {
    /// Number of call levels in this tree, counting itself.
    pub fn depth(&self) -> usize {
        1 + self
            .args
            .iter()
            .map(|(_, value)| value.call_depth())
            .max()
            .unwrap_or(0)
    }

    /// Look up an argument by name.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// JSON object of the arguments only.
    pub fn args_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.args
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "method": self.method,
            "callIndex": self.call_index,
            "args": self.args_json(),
        })
    }
}

impl ArgValue {
    fn call_depth(&self) -> usize {
        match self {
            ArgValue::Call(call) => call.depth(),
            ArgValue::List(items) => items.iter().map(ArgValue::call_depth).max().unwrap_or(0),
            ArgValue::Scalar(_) | ArgValue::Opaque(_) => 0,
        }
    }

    /// Plain text rendering used for `dest, value` style arguments.
    ///
    /// Strings are rendered without quotes, everything else as compact JSON.
    pub fn display(&self) -> String {
        match self {
            ArgValue::Scalar(serde_json::Value::String(s)) => s.clone(),
            other => other.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ArgValue::Scalar(value) => value.clone(),
            ArgValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ArgValue::to_json).collect())
            }
            ArgValue::Call(call) => call.to_json(),
            ArgValue::Opaque(bytes) => serde_json::Value::String(format!("0x{}", hex::encode(bytes))),
        }
    }
}

struct ArgsMap<'a>(&'a [(String, ArgValue)]);

impl Serialize for ArgsMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for NormalizedCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NormalizedCall", 3)?;
        state.serialize_field("method", &self.method)?;
        state.serialize_field("callIndex", &self.call_index)?;
        state.serialize_field("args", &ArgsMap(&self.args))?;
        state.end()
    }
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArgValue::Scalar(value) => value.serialize(serializer),
            ArgValue::List(items) => items.serialize(serializer),
            ArgValue::Call(call) => call.serialize(serializer),
            ArgValue::Opaque(bytes) => serializer.serialize_str(&format!("0x{}", hex::encode(bytes))),
        }
    }
}
