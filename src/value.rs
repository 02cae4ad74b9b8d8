//! Runtime Values
//!
//! Data handed to templates. Besides plain JSON-like data a value may be a
//! callable [`Function`] or a [`Deferred`] producer whose result is not yet
//! available; [`resolve`] drives both down to a concrete value.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::error::{Result, TemplateError};

pub type Map = BTreeMap<String, Value>;

type NativeFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;
type Producer = dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A function callable from template expressions.
#[derive(Clone)]
pub struct Function(Arc<NativeFn>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Function(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }
}

/// A value that must be awaited before use. Each resolution starts a fresh
/// future, so one deferred can be shared by many renders.
#[derive(Clone)]
pub struct Deferred(Arc<Producer>);

impl Deferred {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Deferred(Arc::new(move || f().boxed()))
    }

    pub fn resolve(&self) -> BoxFuture<'static, Result<Value>> {
        (self.0)()
    }
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Function(Function),
    Deferred(Deferred),
}

impl Value {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Value::Function(Function::new(f))
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Value::Deferred(Deferred::new(f))
    }

    /// Convert any serializable data through its JSON form.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Deferred(_) => "deferred",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Deferred(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) if s.trim().is_empty() => Some(0.0),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
            _ => None,
        }
    }

    /// `value.name` access. Missing fields read as null, reading through
    /// null is an error.
    pub fn member(&self, name: &str) -> Result<Value> {
        match self {
            Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
            Value::Array(items) if name == "length" => Ok(Value::Number(items.len() as f64)),
            Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Null => Err(TemplateError::runtime(format!(
                "Cannot read property '{}' of null",
                name
            ))),
            _ => Ok(Value::Null),
        }
    }

    /// `value[key]` access.
    pub fn index(&self, key: &Value) -> Result<Value> {
        match (self, key) {
            (Value::Array(items), Value::Number(n)) => Ok(as_position(*n)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null)),
            (Value::String(s), Value::Number(n)) => Ok(as_position(*n)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)),
            (Value::Null, key) => Err(TemplateError::runtime(format!(
                "Cannot read property '{}' of null",
                key
            ))),
            (_, key) => self.member(&key.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null | Value::Function(_) | Value::Deferred(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                Json::Number(serde_json::Number::from(*n as i64))
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn as_position(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

/// Keep resolving until the value is concrete: deferreds are awaited and
/// functions are invoked as zero-argument thunks, re-checking after each step.
pub async fn resolve(mut value: Value) -> Result<Value> {
    while value.is_pending() {
        value = match value {
            Value::Deferred(deferred) => deferred.resolve().await?,
            Value::Function(function) => function.call(&[])?,
            concrete => concrete,
        };
    }
    Ok(value)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.is_infinite() => {
                write!(f, "{}", if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            // -0 prints as 0
            Value::Number(n) if *n == 0.0 => f.write_str("0"),
            Value::Number(n) if n.abs() >= 1e21 || n.abs() < 1e-6 => {
                let text = format!("{:e}", n);
                match text.split_once('e') {
                    Some((mantissa, exp)) if !exp.starts_with('-') => {
                        write!(f, "{}e+{}", mantissa, exp)
                    }
                    _ => f.write_str(&text),
                }
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Function(_) => f.write_str("[function]"),
            Value::Deferred(_) => f.write_str("[deferred]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(map) => f.debug_map().entries(map).finish(),
            Value::Function(_) => f.write_str("Function"),
            Value::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::Deferred(a), Value::Deferred(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
