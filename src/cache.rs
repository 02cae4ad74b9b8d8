//! Template Cache - compiled templates and raw sources
//!
//! Entries are created on first miss and live until [`TemplateCache::clear`].
//! Nothing is invalidated automatically when files change.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::compiler::CompiledTemplate;
use crate::error::Result;

lazy_static! {
    static ref GLOBAL_CACHE: Arc<TemplateCache> = Arc::new(TemplateCache::new());
}

pub struct TemplateCache {
    compiled: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
    sources: RwLock<HashMap<String, String>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self {
            compiled: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide cache shared by default renderers.
    pub fn global() -> Arc<TemplateCache> {
        GLOBAL_CACHE.clone()
    }

    pub fn get(&self, filename: &str) -> Option<Arc<CompiledTemplate>> {
        self.compiled.read().get(filename).cloned()
    }

    /// Fetch the template compiled under `filename`, compiling it with
    /// `compile` on a miss. The write lock is held while compiling so a key
    /// is never compiled twice.
    pub fn get_or_compile<F>(&self, filename: &str, compile: F) -> Result<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> Result<CompiledTemplate>,
    {
        if let Some(template) = self.get(filename) {
            tracing::debug!(filename, "compiled template cache hit");
            return Ok(template);
        }

        let mut compiled = self.compiled.write();
        if let Some(template) = compiled.get(filename) {
            return Ok(template.clone());
        }
        tracing::debug!(filename, "compiled template cache miss");
        let template = Arc::new(compile()?);
        compiled.insert(filename.to_string(), template.clone());
        Ok(template)
    }

    /// Fetch raw source text under `key`, reading it with `read` on a miss.
    pub fn get_or_read<F>(&self, key: &str, read: F) -> Result<String>
    where
        F: FnOnce() -> std::io::Result<String>,
    {
        if let Some(text) = self.sources.read().get(key) {
            return Ok(text.clone());
        }

        let mut sources = self.sources.write();
        if let Some(text) = sources.get(key) {
            return Ok(text.clone());
        }
        tracing::debug!(key, "source cache miss");
        let text = read()?;
        sources.insert(key.to_string(), text.clone());
        Ok(text)
    }

    pub fn compiled_len(&self) -> usize {
        self.compiled.read().len()
    }

    pub fn sources_len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn clear(&self) {
        self.compiled.write().clear();
        self.sources.write().clear();
        tracing::debug!("template cache cleared");
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}
