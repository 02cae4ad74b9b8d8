//! Render Orchestrator
//!
//! Fetches or compiles a template, runs it against a fresh context and
//! optionally wraps the output in a layout.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::TemplateCache;
use crate::compiler::{self, CompileOptions, CompiledTemplate};
use crate::context::Context;
use crate::error::{Result, TemplateError};
use crate::escape::Escaper;
use crate::filters::FilterRegistry;
use crate::loader::{FsLoader, Loader};
use crate::syntax::{Delimiters, ParseOptions};
use crate::value::{Map, Value};

pub const DEFAULT_VIEW_EXT: &str = ".html";

/// Options for one render call.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Cache key and base for include resolution.
    pub filename: Option<String>,
    pub root: Option<PathBuf>,
    pub view_ext: String,
    pub cache: bool,
    pub delimiters: Delimiters,
    pub locals: Map,
    /// Top-level fields. Shadowed by `locals`.
    pub data: Map,
    pub scope: Option<Value>,
    /// View rendered around the output, with the output bound to `body`.
    pub layout: Option<String>,
    pub debug: bool,
    pub compile_debug: bool,
    pub bind_locals: bool,
    pub escape: Option<Escaper>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            filename: None,
            root: None,
            view_ext: DEFAULT_VIEW_EXT.to_string(),
            cache: false,
            delimiters: Delimiters::default(),
            locals: Map::new(),
            data: Map::new(),
            scope: None,
            layout: None,
            debug: false,
            compile_debug: true,
            bind_locals: true,
            escape: None,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_view_ext(mut self, view_ext: impl Into<String>) -> Self {
        self.view_ext = view_ext.into();
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_delimiters(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.delimiters = Delimiters::new(open, close);
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.locals.insert(name.into(), value.into());
        self
    }

    pub fn with_locals(mut self, locals: Map) -> Self {
        self.locals.extend(locals);
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

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_compile_debug(mut self, compile_debug: bool) -> Self {
        self.compile_debug = compile_debug;
        self
    }

    pub fn with_bind_locals(mut self, bind_locals: bool) -> Self {
        self.bind_locals = bind_locals;
        self
    }

    pub fn with_escape(mut self, escape: Escaper) -> Self {
        self.escape = Some(escape);
        self
    }

    fn context(&self) -> Context {
        Context {
            locals: self.locals.clone(),
            data: self.data.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Compiles and renders templates with one filter registry, cache and
/// source loader.
pub struct Renderer {
    filters: FilterRegistry,
    cache: Arc<TemplateCache>,
    loader: Arc<dyn Loader>,
}

impl Renderer {
    /// Global filters, the process-wide cache and the file system.
    pub fn new() -> Self {
        Self {
            filters: FilterRegistry::global(),
            cache: TemplateCache::global(),
            loader: Arc::new(FsLoader),
        }
    }

    /// Like [`Renderer::new`] but with a private cache.
    pub fn isolated() -> Self {
        Self::new().with_cache(Arc::new(TemplateCache::new()))
    }

    pub fn with_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_loader<L: Loader + 'static>(mut self, loader: L) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Templates compiled earlier keep the filters they were compiled with.
    pub fn filters_mut(&mut self) -> &mut FilterRegistry {
        &mut self.filters
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.filters.register(name, filter);
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Compile `text` without consulting the compiled-template cache.
    pub fn compile(&self, text: &str, options: &RenderOptions) -> Result<CompiledTemplate> {
        let mut syntax = ParseOptions::new(&options.delimiters, &*self.loader);
        syntax.filename = options.filename.as_deref();
        syntax.root = options.root.as_deref();
        syntax.view_ext = &options.view_ext;
        syntax.sources = options.cache.then(|| &*self.cache);
        syntax.bind_locals = options.bind_locals;

        let mut compile = CompileOptions::new(syntax, &self.filters);
        if let Some(escape) = options.escape {
            compile.escape = escape;
        }
        compile.compile_debug = options.compile_debug;
        compile.debug = options.debug;

        compiler::compile(text, &compile)
    }

    pub async fn render(&self, text: &str, options: &RenderOptions) -> Result<String> {
        let body = self.render_template(text, options).await?;
        self.apply_layout(body, options).await
    }

    /// Render `path` + view extension, resolved beneath `root` (the current
    /// directory when unset).
    pub async fn render_file(&self, path: &str, options: &RenderOptions) -> Result<String> {
        let (text, options) = self.load(path, options)?;
        self.render(&text, &options).await
    }

    async fn render_template(&self, text: &str, options: &RenderOptions) -> Result<String> {
        let template = if options.cache {
            let filename = options
                .filename
                .as_deref()
                .ok_or_else(|| TemplateError::config("\"cache\" option requires \"filename\"."))?;
            self.cache
                .get_or_compile(filename, || self.compile(text, options))?
        } else {
            Arc::new(self.compile(text, options)?)
        };

        template.render(&options.context()).await
    }

    async fn apply_layout(&self, body: String, options: &RenderOptions) -> Result<String> {
        let Some(layout) = options.layout.as_deref() else {
            return Ok(body);
        };
        tracing::debug!(layout, "wrapping output in layout");

        let mut wrapped = options.clone();
        wrapped.layout = None;
        wrapped.locals.insert("body".to_string(), Value::String(body));
        let (text, wrapped) = self.load(layout, &wrapped)?;
        self.render_template(&text, &wrapped).await
    }

    /// Read the source of `path` and return it with options pointing at it.
    fn load(&self, path: &str, options: &RenderOptions) -> Result<(String, RenderOptions)> {
        let filename = format!("{}{}", path, options.view_ext);
        let root = match &options.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        let full = root.join(&filename);

        let text = if options.cache {
            let key = format!("{}:string", path);
            self.cache.get_or_read(&key, || self.loader.read(&full))?
        } else {
            self.loader.read(&full)?
        };

        let mut options = options.clone();
        options.filename = Some(filename);
        options.root = Some(root);
        Ok((text, options))
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("filters", &self.filters)
            .field("compiled", &self.cache.compiled_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::path::Path;

    fn memory(files: &[(&str, &str)]) -> impl Loader + 'static {
        let files: HashMap<PathBuf, String> = files
            .iter()
            .map(|(path, text)| (PathBuf::from(path), text.to_string()))
            .collect();
        move |path: &Path| {
            files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
        }
    }

    #[tokio::test]
    async fn test_cache_requires_filename() {
        let renderer = Renderer::isolated();
        let err = renderer
            .render("<p></p>", &RenderOptions::new().with_cache(true))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "\"cache\" option requires \"filename\".");
    }

    #[tokio::test]
    async fn test_locals_shadow_data() {
        let renderer = Renderer::isolated();
        let options = RenderOptions::new()
            .with_data("name", "data")
            .with_data("title", "Home")
            .with_local("name", "locals");
        let html = renderer.render("<%= title %> <%= name %>", &options).await.unwrap();
        assert_eq!(html, "Home locals");
    }

    #[tokio::test]
    async fn test_render_file_with_include_and_layout() {
        let renderer = Renderer::isolated().with_loader(memory(&[
            ("/views/user.html", "<% include header %><p><%= name %></p>"),
            ("/views/header.html", "<h1>Users</h1>"),
            ("/views/layout.html", "<html><%- body %></html>"),
        ]));
        let options = RenderOptions::new()
            .with_root("/views")
            .with_local("name", "tobi")
            .with_layout("layout");

        let html = renderer.render_file("user", &options).await.unwrap();
        assert_eq!(html, "<html><h1>Users</h1><p>tobi</p></html>");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let renderer = Renderer::isolated().with_loader(memory(&[]));
        let err = renderer
            .render_file("nope", &RenderOptions::new().with_root("/views"))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Io(_)));
    }

    #[tokio::test]
    async fn test_sources_cached_by_path() {
        let renderer = Renderer::isolated().with_loader(memory(&[("/views/a.html", "A")]));
        let options = RenderOptions::new().with_root("/views").with_cache(true);
        assert_eq!(renderer.render_file("a", &options).await.unwrap(), "A");
        assert_eq!(renderer.cache().sources_len(), 1);
        assert_eq!(renderer.cache().compiled_len(), 1);
        assert!(renderer.cache().get("a.html").is_some());
    }

    #[tokio::test]
    async fn test_custom_escape() {
        fn shout(text: &str) -> String {
            text.to_uppercase()
        }
        let renderer = Renderer::isolated();
        let options = RenderOptions::new().with_local("name", "tobi").with_escape(shout);
        assert_eq!(renderer.render("<%= name %>", &options).await.unwrap(), "TOBI");
    }

    #[tokio::test]
    async fn test_cached_template_keeps_filters_bound_at_compile() {
        let mut renderer = Renderer::isolated();
        let options = RenderOptions::new()
            .with_cache(true)
            .with_filename("snap.ejs")
            .with_local("name", "tobi");
        let text = "<%=: name | upcase %>";
        assert_eq!(renderer.render(text, &options).await.unwrap(), "TOBI");

        renderer.register_filter("upcase", |v, _| Ok(Value::String(format!("{}?", v))));
        assert_eq!(renderer.render(text, &options).await.unwrap(), "TOBI");

        renderer.clear_cache();
        assert_eq!(renderer.render(text, &options).await.unwrap(), "tobi?");
    }
}
