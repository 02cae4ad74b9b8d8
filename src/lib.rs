//! EJS Engine - Embedded-Tag Template Compiler
//!
//! # Pipeline
//! 1. Scanner: template text to an instruction sequence, includes inlined
//! 2. Compiler: instructions lowered to a node tree, filters bound
//! 3. Cache: compiled templates keyed by filename, sources by path
//! 4. Evaluator: the tree runs against a render context, deferred values awaited
//! 5. Error reporter: runtime failures rewritten with a source context window
//!
//! ```no_run
//! # async fn demo() -> ejs_engine::Result<()> {
//! use ejs_engine::RenderOptions;
//!
//! let options = RenderOptions::new().with_local("name", "tobi");
//! let html = ejs_engine::render("<p><%= name %></p>", &options).await?;
//! assert_eq!(html, "<p>tobi</p>");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod compiler;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod escape;
pub mod expr;
pub mod filters;
pub mod include;
pub mod loader;
pub mod render;
mod runtime;
pub mod settings;
pub mod syntax;
pub mod value;

pub use cache::TemplateCache;
pub use compiler::{CompileOptions, CompiledTemplate};
pub use context::Context;
pub use engine::{Engine, Response};
pub use error::{Result, TemplateError};
pub use escape::{escape_html, Escaper};
pub use filters::{Filter, FilterRegistry};
pub use loader::{FsLoader, Loader};
pub use render::{RenderOptions, Renderer};
pub use settings::Settings;
pub use syntax::{Delimiters, Source};
pub use value::{Deferred, Function, Map, Value};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Render a template string with the process-wide filters and cache.
pub async fn render(text: &str, options: &RenderOptions) -> Result<String> {
    Renderer::new().render(text, options).await
}

/// Render `path` + view extension with the process-wide filters and cache.
pub async fn render_file(path: &str, options: &RenderOptions) -> Result<String> {
    Renderer::new().render_file(path, options).await
}

/// Compile a template string without caching it.
pub fn compile(text: &str, options: &RenderOptions) -> Result<CompiledTemplate> {
    Renderer::new().compile(text, options)
}

/// Register a filter for every renderer created afterwards.
pub fn register_filter<F>(name: impl Into<String>, filter: F)
where
    F: Fn(Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    filters::register_global(name, filter);
}

/// Empty the process-wide template cache.
pub fn clear_cache() {
    TemplateCache::global().clear();
}
