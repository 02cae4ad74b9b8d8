//! View Engine - settings-driven rendering entry point
//!
//! Fills per-render options from [`Settings`], renders a view by name and
//! either returns the string or writes it to a [`Response`].

use crate::error::{Result, TemplateError};
use crate::render::{RenderOptions, Renderer};
use crate::settings::{normalize_view_ext, Settings};
use crate::value::{Map, Value};

pub const CONTENT_TYPE: &str = "text/html";

/// Sink written when `write_resp` is enabled.
pub trait Response {
    fn set_content_type(&mut self, content_type: &str);
    fn set_body(&mut self, body: String);
}

#[derive(Debug)]
pub struct Engine {
    settings: Settings,
    renderer: Renderer,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_renderer(settings, Renderer::new())
    }

    pub fn with_renderer(mut settings: Settings, mut renderer: Renderer) -> Result<Self> {
        let root = settings
            .root
            .take()
            .ok_or_else(|| TemplateError::config("settings.root required"))?;
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        settings.view_ext = normalize_view_ext(&settings.view_ext);
        renderer.filters_mut().merge(&settings.filters);

        tracing::debug!(
            root = %root.display(),
            cache = settings.cache,
            layout = ?settings.layout,
            "view engine configured"
        );
        settings.root = Some(root);
        Ok(Self { settings, renderer })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.renderer.register_filter(name, filter);
    }

    /// Render options carrying the engine settings.
    pub fn options(&self) -> RenderOptions {
        let settings = &self.settings;
        RenderOptions {
            filename: None,
            root: settings.root.clone(),
            view_ext: settings.view_ext.clone(),
            cache: settings.cache,
            delimiters: settings.delimiters(),
            locals: settings.locals.clone(),
            data: Map::new(),
            scope: settings.scope.clone(),
            layout: settings.layout.clone(),
            debug: settings.debug,
            compile_debug: settings.compile_debug,
            bind_locals: true,
            escape: None,
        }
    }

    /// Render `view` with `data` as top-level fields. An object under the
    /// `locals` key is laid over the settings locals.
    pub async fn render(&self, view: &str, mut data: Map) -> Result<String> {
        let mut options = self.options();
        if let Some(Value::Object(locals)) = data.remove("locals") {
            options.locals.extend(locals);
        }
        options.data = data;
        self.render_with(view, &options).await
    }

    pub async fn render_with(&self, view: &str, options: &RenderOptions) -> Result<String> {
        tracing::debug!(view, layout = ?options.layout, "rendering view");
        self.renderer.render_file(view, options).await
    }

    /// With `write_resp` the output goes to `response` and `None` is
    /// returned; otherwise the output is returned.
    pub async fn render_into<R>(&self, view: &str, data: Map, response: &mut R) -> Result<Option<String>>
    where
        R: Response + Send,
    {
        let html = self.render(view, data).await?;
        if !self.settings.write_resp {
            return Ok(Some(html));
        }
        response.set_content_type(CONTENT_TYPE);
        response.set_body(html);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::path::{Path, PathBuf};

    #[derive(Default)]
    struct Captured {
        content_type: Option<String>,
        body: Option<String>,
    }

    impl Response for Captured {
        fn set_content_type(&mut self, content_type: &str) {
            self.content_type = Some(content_type.to_string());
        }

        fn set_body(&mut self, body: String) {
            self.body = Some(body);
        }
    }

    fn site_engine(settings: Settings) -> Engine {
        let files: HashMap<PathBuf, String> = [
            ("/site/index.html", "<h1><%= title %></h1><p><%= site %></p>"),
            ("/site/layout.html", "<main><%- body %></main>"),
            ("/site/shout.html", "<%=: title | loud %>"),
        ]
        .into_iter()
        .map(|(path, text)| (PathBuf::from(path), text.to_string()))
        .collect();
        let renderer = Renderer::isolated().with_loader(move |path: &Path| {
            files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
        });
        Engine::with_renderer(settings, renderer).unwrap()
    }

    fn data(title: &str) -> Map {
        let mut data = Map::new();
        data.insert("title".to_string(), Value::from(title));
        data
    }

    #[test]
    fn test_root_required() {
        let err = Engine::new(Settings::default()).unwrap_err();
        assert_eq!(err.to_string(), "settings.root required");
    }

    #[tokio::test]
    async fn test_layout_and_settings_locals() {
        let mut settings = Settings::new("/site");
        settings.locals.insert("site".to_string(), Value::from("example"));
        let engine = site_engine(settings);

        let html = engine.render("index", data("Home")).await.unwrap();
        assert_eq!(html, "<main><h1>Home</h1><p>example</p></main>");

        let mut with_locals = data("Home");
        with_locals.insert(
            "locals".to_string(),
            Value::from(serde_json::json!({"site": "override"})),
        );
        let html = engine.render("index", with_locals).await.unwrap();
        assert_eq!(html, "<main><h1>Home</h1><p>override</p></main>");
    }

    #[tokio::test]
    async fn test_write_resp() {
        let mut settings = Settings::new("/site");
        settings.layout = None;
        settings.locals.insert("site".to_string(), Value::from("example"));
        let engine = site_engine(settings.clone());

        let mut response = Captured::default();
        let returned = engine.render_into("index", data("Hi"), &mut response).await.unwrap();
        assert_eq!(returned, None);
        assert_eq!(response.content_type.as_deref(), Some("text/html"));
        assert_eq!(response.body.as_deref(), Some("<h1>Hi</h1><p>example</p>"));

        settings.write_resp = false;
        let engine = site_engine(settings);
        let mut response = Captured::default();
        let returned = engine.render_into("index", data("Hi"), &mut response).await.unwrap();
        assert_eq!(returned.as_deref(), Some("<h1>Hi</h1><p>example</p>"));
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn test_settings_filters_are_merged() {
        let mut settings = Settings::new("/site");
        settings.layout = None;
        settings
            .filters
            .register("loud", |v, _| Ok(Value::String(v.to_string().to_uppercase())));
        let engine = site_engine(settings);

        let html = engine.render("shout", data("hey")).await.unwrap();
        assert_eq!(html, "HEY");
    }
}
