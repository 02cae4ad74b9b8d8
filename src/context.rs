//! Render Context

use crate::value::{Map, Value};

/// Data visible to one render. `locals` take precedence over `data` when a
/// name exists in both.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub locals: Map,
    pub data: Map,
    /// Receiver reachable as `this`.
    pub scope: Option<Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.locals.insert(name.into(), value.into());
        self
    }

    pub fn with_data(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<Value>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals.get(name).or_else(|| self.data.get(name))
    }

    /// Everything reachable by name, as the object bound to `locals`.
    pub fn merged(&self) -> Value {
        let mut merged = self.data.clone();
        for (name, value) in &self.locals {
            merged.insert(name.clone(), value.clone());
        }
        Value::Object(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locals_override_data() {
        let context = Context::new()
            .with_data("name", "from data")
            .with_data("title", "Home")
            .with_local("name", "from locals");

        assert_eq!(context.lookup("name"), Some(&Value::from("from locals")));
        assert_eq!(context.lookup("title"), Some(&Value::from("Home")));
        assert_eq!(context.lookup("missing"), None);
        assert_eq!(context.merged().member("name").unwrap(), Value::from("from locals"));
    }
}
