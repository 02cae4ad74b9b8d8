//! Engine Settings
//!
//! Loaded from JSON or built in code. Filters and `scope` functions cannot
//! come from JSON; set them on the struct directly.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::error::Result;
use crate::filters::FilterRegistry;
use crate::render::DEFAULT_VIEW_EXT;
use crate::syntax::{Delimiters, DEFAULT_CLOSE, DEFAULT_OPEN};
use crate::value::{Map, Value};

pub const DEFAULT_LAYOUT: &str = "layout";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Directory views resolve against. Required by the engine.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub cache: bool,
    /// `true` selects the default layout, `false` or `null` disables it.
    #[serde(default = "default_layout", deserialize_with = "deserialize_layout")]
    pub layout: Option<String>,
    #[serde(default = "default_view_ext", deserialize_with = "deserialize_view_ext")]
    pub view_ext: String,
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_close")]
    pub close: String,
    #[serde(default, deserialize_with = "deserialize_map")]
    pub locals: Map,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub compile_debug: bool,
    #[serde(default = "default_true")]
    pub write_resp: bool,
    #[serde(default, deserialize_with = "deserialize_scope")]
    pub scope: Option<Value>,
    #[serde(skip, default = "FilterRegistry::empty")]
    pub filters: FilterRegistry,
}

fn default_true() -> bool { true }
fn default_layout() -> Option<String> { Some(DEFAULT_LAYOUT.to_string()) }
fn default_view_ext() -> String { DEFAULT_VIEW_EXT.to_string() }
fn default_open() -> String { DEFAULT_OPEN.to_string() }
fn default_close() -> String { DEFAULT_CLOSE.to_string() }

#[derive(Deserialize)]
#[serde(untagged)]
enum LayoutSetting {
    Name(String),
    Enabled(bool),
}

fn deserialize_layout<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LayoutSetting>::deserialize(deserializer)? {
        Some(LayoutSetting::Name(name)) => Some(name),
        Some(LayoutSetting::Enabled(true)) => default_layout(),
        Some(LayoutSetting::Enabled(false)) | None => None,
    })
}

fn deserialize_view_ext<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(normalize_view_ext(&String::deserialize(deserializer)?))
}

fn deserialize_map<'de, D>(deserializer: D) -> std::result::Result<Map, D::Error>
where
    D: Deserializer<'de>,
{
    let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
}

fn deserialize_scope<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Value>::deserialize(deserializer)?.map(Value::from))
}

/// `"html"` and `".html"` both mean `.html`; empty stays empty.
pub fn normalize_view_ext(view_ext: &str) -> String {
    if view_ext.is_empty() || view_ext.starts_with('.') {
        view_ext.to_string()
    } else {
        format!(".{}", view_ext)
    }
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn delimiters(&self) -> Delimiters {
        Delimiters::new(self.open.as_str(), self.close.as_str())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: None,
            cache: true,
            layout: default_layout(),
            view_ext: default_view_ext(),
            open: default_open(),
            close: default_close(),
            locals: Map::new(),
            debug: false,
            compile_debug: true,
            write_resp: true,
            scope: None,
            filters: FilterRegistry::empty(),
        }
    }
}
