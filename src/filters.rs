//! Filter Registry
//!
//! Named transforms for the `<%=: value | name:args %>` shorthand. A
//! template binds the filters it names when it is compiled, so registering
//! a filter later never changes an already compiled template.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::error::{Result, TemplateError};
use crate::value::Value;

pub type Filter = Arc<dyn Fn(Value, &[Value]) -> Result<Value> + Send + Sync>;

lazy_static! {
    static ref GLOBAL_FILTERS: RwLock<FilterRegistry> = RwLock::new(FilterRegistry::new());
}

/// Add a filter to the process-wide registry. Renderers created afterwards
/// see it; existing renderers keep their snapshot.
pub fn register_global<F>(name: impl Into<String>, filter: F)
where
    F: Fn(Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    GLOBAL_FILTERS.write().register(name, filter);
}

#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
}

impl FilterRegistry {
    /// A registry with no filters at all.
    pub fn empty() -> Self {
        Self { filters: HashMap::new() }
    }

    /// A registry holding the built-in filters.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("reverse", reverse);
        registry.register("first", first);
        registry.register("last", last);
        registry.register("capitalize", capitalize);
        registry.register("upcase", upcase);
        registry.register("downcase", downcase);
        registry.register("length", length);
        registry.register("map", map);
        registry.register("get", get);
        registry.register("join", join);
        registry.register("sort", sort);
        registry.register("truncate", truncate);
        registry.register("append", append);
        registry.register("prepend", prepend);
        registry.register("replace", replace);
        registry.register("json", json);
        registry
    }

    /// Snapshot of the process-wide registry.
    pub fn global() -> Self {
        GLOBAL_FILTERS.read().clone()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    /// Add every filter of `other`, replacing same-named entries.
    pub fn merge(&mut self, other: &FilterRegistry) {
        for (name, filter) in &other.filters {
            self.filters.insert(name.clone(), filter.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}

fn arg(args: &[Value], i: usize) -> Option<&Value> {
    args.get(i).filter(|v| !matches!(v, Value::Null))
}

fn expect_array(name: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(TemplateError::runtime(format!(
            "filter \"{}\" expects an array, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn reverse(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(match value {
        Value::Array(mut items) => {
            items.reverse();
            Value::Array(items)
        }
        other => Value::String(other.to_string().chars().rev().collect()),
    })
}

fn first(value: Value, _args: &[Value]) -> Result<Value> {
    let found = match &value {
        Value::Array(items) => items.first().cloned(),
        Value::String(s) => s.chars().next().map(|c| Value::String(c.to_string())),
        other => {
            return Err(TemplateError::runtime(format!(
                "filter \"first\" expects a sequence, got {}",
                other.type_name()
            )))
        }
    };
    found.ok_or_else(|| TemplateError::runtime("filter \"first\" applied to an empty sequence"))
}

fn last(value: Value, _args: &[Value]) -> Result<Value> {
    let found = match &value {
        Value::Array(items) => items.last().cloned(),
        Value::String(s) => s.chars().last().map(|c| Value::String(c.to_string())),
        other => {
            return Err(TemplateError::runtime(format!(
                "filter \"last\" expects a sequence, got {}",
                other.type_name()
            )))
        }
    };
    found.ok_or_else(|| TemplateError::runtime("filter \"last\" applied to an empty sequence"))
}

fn capitalize(value: Value, _args: &[Value]) -> Result<Value> {
    let text = value.to_string();
    let mut chars = text.chars();
    let out = match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    Ok(Value::String(out))
}

fn upcase(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(value.to_string().to_uppercase()))
}

fn downcase(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(value.to_string().to_lowercase()))
}

fn length(value: Value, _args: &[Value]) -> Result<Value> {
    let len = match &value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => other.to_string().chars().count(),
    };
    Ok(Value::Number(len as f64))
}

fn map(value: Value, args: &[Value]) -> Result<Value> {
    let key = arg(args, 0)
        .map(|k| k.to_string())
        .ok_or_else(|| TemplateError::runtime("filter \"map\" requires a property name"))?;
    let items = expect_array("map", value)?;
    let projected = items
        .iter()
        .map(|item| item.member(&key))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(projected))
}

fn get(value: Value, args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Some(key) => value.index(key),
        None => Err(TemplateError::runtime("filter \"get\" requires a property name")),
    }
}

fn join(value: Value, args: &[Value]) -> Result<Value> {
    let sep = arg(args, 0).map(|s| s.to_string()).unwrap_or_else(|| ",".to_string());
    let items = expect_array("join", value)?;
    let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    Ok(Value::String(parts.join(&sep)))
}

fn sort(value: Value, _args: &[Value]) -> Result<Value> {
    let mut items = expect_array("sort", value)?;
    items.sort_by(|a, b| match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    });
    Ok(Value::Array(items))
}

fn truncate(value: Value, args: &[Value]) -> Result<Value> {
    let text = value.to_string();
    let len = arg(args, 0)
        .and_then(Value::as_number)
        .ok_or_else(|| TemplateError::runtime("filter \"truncate\" requires a length"))?;
    let len = if len < 0.0 { 0 } else { len as usize };
    if text.chars().count() <= len {
        return Ok(Value::String(text));
    }
    let mut out: String = text.chars().take(len).collect();
    if let Some(suffix) = arg(args, 1) {
        out.push_str(&suffix.to_string());
    }
    Ok(Value::String(out))
}

fn append(value: Value, args: &[Value]) -> Result<Value> {
    let tail = arg(args, 0).map(|v| v.to_string()).unwrap_or_default();
    Ok(Value::String(value.to_string() + &tail))
}

fn prepend(value: Value, args: &[Value]) -> Result<Value> {
    let head = arg(args, 0).map(|v| v.to_string()).unwrap_or_default();
    Ok(Value::String(head + &value.to_string()))
}

fn replace(value: Value, args: &[Value]) -> Result<Value> {
    let from = arg(args, 0)
        .map(|v| v.to_string())
        .ok_or_else(|| TemplateError::runtime("filter \"replace\" requires a pattern"))?;
    let to = arg(args, 1).map(|v| v.to_string()).unwrap_or_default();
    Ok(Value::String(value.to_string().replace(&from, &to)))
}

fn json(value: Value, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(serde_json::to_string(&value.to_json())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(name: &str, value: impl Into<Value>, args: &[Value]) -> Result<Value> {
        let registry = FilterRegistry::new();
        let filter = registry.get(name).expect("built-in filter");
        filter(value.into(), args)
    }

    #[test]
    fn test_chain_left_to_right() {
        let registry = FilterRegistry::new();
        let items = Value::from(vec!["foo", "bar", "baz"]);
        let out = ["reverse", "first", "reverse", "capitalize"]
            .iter()
            .try_fold(items, |acc, name| registry.get(name).unwrap()(acc, &[]))
            .unwrap();
        assert_eq!(out, Value::from("Zab"));
    }

    #[test]
    fn test_first_on_empty_fails() {
        let err = apply("first", Value::Array(vec![]), &[]).unwrap_err();
        assert!(err.is_runtime());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(apply("truncate", "World", &[3.into()]).unwrap(), Value::from("Wor"));
        assert_eq!(
            apply("truncate", "Testing", &[2.into(), "...".into()]).unwrap(),
            Value::from("Te...")
        );
        assert_eq!(
            apply("truncate", "Testing", &[10.into(), "...".into()]).unwrap(),
            Value::from("Testing")
        );
    }

    #[test]
    fn test_map_and_join() {
        let users = Value::from(json!([{"name": "tobi"}, {"name": "loki"}, {"name": "jane"}]));
        let names = apply("map", users, &["name".into()]).unwrap();
        assert_eq!(apply("join", names.clone(), &[", ".into()]).unwrap(), Value::from("tobi, loki, jane"));
        assert_eq!(apply("join", names, &[]).unwrap(), Value::from("tobi,loki,jane"));
    }

    #[test]
    fn test_register_and_merge() {
        let mut extra = FilterRegistry::empty();
        extra.register("shout", |v, _| Ok(Value::String(format!("{}!", v))));

        let mut registry = FilterRegistry::new();
        assert!(!registry.contains("shout"));
        registry.merge(&extra);
        assert!(registry.contains("shout"));
        assert!(registry.contains("truncate"));
    }

    #[test]
    fn test_global_registry_snapshot() {
        let before = FilterRegistry::global();
        register_global("exclaim", |v, _| Ok(Value::String(format!("{}!", v))));
        assert!(!before.contains("exclaim"));
        assert!(FilterRegistry::global().contains("exclaim"));
    }

    #[test]
    fn test_json_and_sort() {
        let sorted = apply("sort", vec![3, 1, 2], &[]).unwrap();
        assert_eq!(sorted, Value::from(vec![1, 2, 3]));
        assert_eq!(apply("json", sorted, &[]).unwrap(), Value::from("[1,2,3]"));
    }
}
