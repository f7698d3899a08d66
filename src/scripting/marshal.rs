/// `scripting/marshal.rs` — Lua ↔ JSON conversion at the sandbox boundary
///
/// Everything a script hands to the host (store reads aside, which go the
/// other way) is converted to `serde_json::Value` first. Functions, userdata
/// and threads have no JSON form and are rejected.

use mlua::{Lua, Result as LuaResult, Table, Value};
use thiserror::Error;

/// Nesting beyond this is treated as a cycle.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("cannot encode value of type {0}")]
    Unsupported(&'static str),
    #[error("cannot encode table key of type {0}")]
    UnsupportedKey(&'static str),
    #[error("cannot encode table nested deeper than 64 levels")]
    TooDeep,
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<MarshalError> for mlua::Error {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Lua(inner) => inner,
            other => mlua::Error::external(other),
        }
    }
}

pub fn lua_to_json(value: &Value) -> Result<serde_json::Value, MarshalError> {
    to_json(value, 0)
}

fn to_json(value: &Value, depth: usize) -> Result<serde_json::Value, MarshalError> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(i) => Ok(serde_json::json!(i)),
        Value::Number(n) => Ok(serde_json::json!(n)),
        Value::String(s) => Ok(serde_json::Value::String(s.to_string_lossy())),
        Value::Table(t) => {
            if depth >= MAX_DEPTH {
                return Err(MarshalError::TooDeep);
            }
            table_to_json(t, depth + 1)
        }
        other => Err(MarshalError::Unsupported(other.type_name())),
    }
}

fn table_to_json(t: &Table, depth: usize) -> Result<serde_json::Value, MarshalError> {
    let pairs = t
        .clone()
        .pairs::<Value, Value>()
        .collect::<LuaResult<Vec<_>>>()?;

    // Sequence check: exactly the keys 1..=n.
    let len = t.raw_len();
    let is_array = pairs.len() == len
        && pairs
            .iter()
            .all(|(k, _)| matches!(k, Value::Integer(n) if *n >= 1 && (*n as usize) <= len));

    if is_array {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            let item: Value = t.raw_get(i)?;
            items.push(to_json(&item, depth)?);
        }
        return Ok(serde_json::Value::Array(items));
    }

    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        let key = match &k {
            Value::String(s) => s.to_string_lossy(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Boolean(b) => b.to_string(),
            other => return Err(MarshalError::UnsupportedKey(other.type_name())),
        };
        map.insert(key, to_json(&v, depth)?);
    }
    Ok(serde_json::Value::Object(map))
}

pub fn json_to_lua(lua: &Lua, val: &serde_json::Value) -> LuaResult<Value> {
    match val {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s.as_str())?)),
        serde_json::Value::Array(arr) => {
            let t = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                t.set(i + 1, json_to_lua(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
        serde_json::Value::Object(obj) => {
            let t = lua.create_table()?;
            for (k, v) in obj {
                t.set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
    }
}

pub fn encode(value: &Value) -> Result<String, MarshalError> {
    Ok(serde_json::to_string(&lua_to_json(value)?)?)
}

pub fn decode(lua: &Lua, text: &str) -> Result<Value, MarshalError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(json_to_lua(lua, &json)?)
}

/// Text as-is, anything else as JSON.
pub fn display_string(value: &Value) -> Result<String, MarshalError> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy()),
        other => encode(other),
    }
}
