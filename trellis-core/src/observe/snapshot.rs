//! Snapshots of observed state.
//!
//! Exporting reads every field without registering dependencies, so taking
//! a snapshot inside a watcher does not subscribe it to the whole tree.
//! `Undefined` fields are left out, non-finite numbers become `null` and a
//! value that contains itself is rejected.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, Serializer};

use super::{List, Object, Value};
use crate::error::SnapshotError;
use crate::reactive::ReactiveContext;

impl Value {
    /// Build a value from JSON. Containers are fresh and unobserved.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect::<List>())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect::<Object>(),
            ),
        }
    }

    /// Parse JSON text into a value. Containers are fresh and unobserved.
    pub fn from_json_str(input: &str) -> Result<Value, SnapshotError> {
        Ok(Value::from_json(serde_json::from_str(input)?))
    }

    /// Export the value as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, SnapshotError> {
        let _quiet = ReactiveContext::untracked();
        let mut ancestors = Vec::new();
        export(self, &mut ancestors)
    }

    /// Export the value as MessagePack, with named fields.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, SnapshotError> {
        let json = self.to_json()?;
        Ok(rmp_serde::to_vec_named(&json)?)
    }
}

fn export(value: &Value, ancestors: &mut Vec<usize>) -> Result<serde_json::Value, SnapshotError> {
    let json = match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number(*n),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Object(object) => {
            let id = enter(object.container_id(), ancestors)?;
            let mut fields = serde_json::Map::new();
            for key in object.keys() {
                let field = object.get(&key);
                if field.is_undefined() {
                    continue;
                }
                fields.insert(key, export(&field, ancestors)?);
            }
            leave(id, ancestors);
            serde_json::Value::Object(fields)
        }
        Value::List(list) => {
            let id = enter(list.container_id(), ancestors)?;
            let items = list
                .iter()
                .map(|item| export(&item, ancestors))
                .collect::<Result<Vec<_>, _>>()?;
            leave(id, ancestors);
            serde_json::Value::Array(items)
        }
    };
    Ok(json)
}

fn enter(id: usize, ancestors: &mut Vec<usize>) -> Result<usize, SnapshotError> {
    if ancestors.contains(&id) {
        return Err(SnapshotError::Cycle);
    }
    ancestors.push(id);
    Ok(id)
}

fn leave(id: usize, ancestors: &mut Vec<usize>) {
    debug_assert_eq!(ancestors.last(), Some(&id));
    ancestors.pop();
}

fn number(n: f64) -> serde_json::Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    if !n.is_finite() {
        serde_json::Value::Null
    } else if n.fract() == 0.0 && n.abs() <= MAX_EXACT {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}
