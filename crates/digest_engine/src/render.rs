//! Template rendering. Rendering is a pure function of its inputs: no clock,
//! no randomness and no filesystem access after templates are loaded.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use digest_core::Item;
use engine_logging::engine_info;

use crate::{FileTree, RenderError};

const DEFAULT_STYLESHEET: &str = "\
body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }
.items { list-style: none; padding: 0; }
.item { border-bottom: 1px solid #ddd; padding: 0.75rem 0; }
.item .source { color: #777; font-size: 0.8rem; margin-left: 0.5rem; }
";

/// Everything a template may bind.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub slug: &'a str,
    pub title: &'a str,
    pub items: &'a [Item],
    pub variables: &'a BTreeMap<String, String>,
}

pub trait Template: Send + Sync {
    /// Produce the output files for `page`.
    fn render(&self, page: &Page<'_>) -> Result<FileTree, BindingError>;
}

/// A template that cannot be filled from the page it was given.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("unclosed placeholder")]
    UnclosedPlaceholder,
    #[error("unknown placeholder {{{{{0}}}}}")]
    UnknownPlaceholder(String),
    #[error("variable {0:?} is not defined")]
    UndefinedVariable(String),
}

/// Resolves template identifiers.
pub trait TemplateStore: Send + Sync {
    fn template(&self, id: &str) -> Option<Arc<dyn Template>>;
}

#[derive(Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<dyn Template>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `default` and `compact` built in.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("default", ListTemplate);
        registry.register("compact", CompactTemplate);
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, template: impl Template + 'static) {
        self.templates.insert(id.into(), Arc::new(template));
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.templates.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Load every `<root>/<id>/index.html`, plus any files under
    /// `<root>/<id>/static/`, as a placeholder template named `<id>`.
    /// Returns the number of templates loaded.
    pub fn load_dir(&mut self, root: &Path) -> io::Result<usize> {
        let mut loaded = 0;
        let mut dirs: Vec<_> = fs::read_dir(root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.join("index.html").is_file())
            .collect();
        dirs.sort();
        for dir in dirs {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let html = fs::read_to_string(dir.join("index.html"))?;
            let mut assets = BTreeMap::new();
            let static_dir = dir.join("static");
            if static_dir.is_dir() {
                collect_assets(&static_dir, "static", &mut assets)?;
            }
            engine_info!("loaded template {} ({} static files)", id, assets.len());
            self.register(id, PlaceholderTemplate::new(html, assets));
            loaded += 1;
        }
        Ok(loaded)
    }
}

impl TemplateStore for TemplateRegistry {
    fn template(&self, id: &str) -> Option<Arc<dyn Template>> {
        self.templates.get(id).cloned()
    }
}

fn collect_assets(dir: &Path, prefix: &str, out: &mut BTreeMap<String, Vec<u8>>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = format!("{prefix}/{name}");
        let path = entry.path();
        if path.is_dir() {
            collect_assets(&path, &rel, out)?;
        } else {
            out.insert(rel, fs::read(&path)?);
        }
    }
    Ok(())
}

/// Looks up templates and renders pages into file trees.
#[derive(Clone)]
pub struct Renderer {
    store: Arc<dyn TemplateStore>,
}

impl Renderer {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    pub fn render(&self, template_id: &str, page: &Page<'_>) -> Result<FileTree, RenderError> {
        let template = self
            .store
            .template(template_id)
            .ok_or_else(|| RenderError::TemplateNotFound {
                template_id: template_id.to_string(),
            })?;
        template.render(page).map_err(|source| RenderError::Binding {
            template_id: template_id.to_string(),
            source,
        })
    }
}

/// Full list page with a stylesheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListTemplate;

impl Template for ListTemplate {
    fn render(&self, page: &Page<'_>) -> Result<FileTree, BindingError> {
        let title = escape_html(page.title);
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{title}</title>\n"));
        html.push_str("<link rel=\"stylesheet\" href=\"static/style.css\">\n</head>\n<body>\n");
        html.push_str(&format!("<h1>{title}</h1>\n"));
        if let Some(description) = page.variables.get("description") {
            html.push_str(&format!("<p class=\"description\">{}</p>\n", escape_html(description)));
        }
        html.push_str(&format!("<p class=\"count\">{} items</p>\n", page.items.len()));
        html.push_str(&item_list(page.items));
        html.push_str("</body>\n</html>\n");

        let mut tree = FileTree::new();
        tree.insert("index.html", html);
        tree.insert("static/style.css", DEFAULT_STYLESHEET);
        Ok(tree)
    }
}

/// Single-file ordered list of item text, no assets.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactTemplate;

impl Template for CompactTemplate {
    fn render(&self, page: &Page<'_>) -> Result<FileTree, BindingError> {
        let mut html = format!(
            concat!(
                "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n",
                "<title>{0}</title>\n</head>\n<body>\n<h1>{0}</h1>\n<ol>\n",
            ),
            escape_html(page.title)
        );
        for item in page.items {
            let label = item.title().unwrap_or(item.text());
            html.push_str(&format!("<li>{}</li>\n", escape_html(label)));
        }
        html.push_str("</ol>\n</body>\n</html>\n");
        let mut tree = FileTree::new();
        tree.insert("index.html", html);
        Ok(tree)
    }
}

/// `index.html` with `{{name}}` placeholders, plus static assets copied as-is.
///
/// Known placeholders: `title`, `slug`, `item_count`, `items` and
/// `var.<name>`. Anything else is a binding error.
#[derive(Debug, Clone)]
pub struct PlaceholderTemplate {
    html: String,
    assets: BTreeMap<String, Vec<u8>>,
}

impl PlaceholderTemplate {
    pub fn new(html: impl Into<String>, assets: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            html: html.into(),
            assets,
        }
    }

    fn binding(&self, name: &str, page: &Page<'_>) -> Result<String, BindingError> {
        match name {
            "title" => Ok(escape_html(page.title)),
            "slug" => Ok(escape_html(page.slug)),
            "item_count" => Ok(page.items.len().to_string()),
            "items" => Ok(item_list(page.items)),
            other => match other.strip_prefix("var.") {
                Some(var) => page
                    .variables
                    .get(var)
                    .map(|v| escape_html(v))
                    .ok_or_else(|| BindingError::UndefinedVariable(var.to_string())),
                None => Err(BindingError::UnknownPlaceholder(other.to_string())),
            },
        }
    }
}

impl Template for PlaceholderTemplate {
    fn render(&self, page: &Page<'_>) -> Result<FileTree, BindingError> {
        let mut out = String::with_capacity(self.html.len());
        let mut rest = self.html.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or(BindingError::UnclosedPlaceholder)?;
            out.push_str(&self.binding(after[..end].trim(), page)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        let mut tree = FileTree::new();
        for (path, bytes) in &self.assets {
            tree.insert(path.clone(), bytes.clone());
        }
        tree.insert("index.html", out);
        Ok(tree)
    }
}

fn item_list(items: &[Item]) -> String {
    let mut html = String::from("<ul class=\"items\">\n");
    for item in items {
        let label = escape_html(&item.source().label);
        html.push_str(&format!("<li class=\"item\" data-source=\"{label}\">"));
        match (item.title(), item.link()) {
            (Some(title), Some(link)) => html.push_str(&format!(
                "<a href=\"{}\">{}</a>",
                escape_html(link),
                escape_html(title)
            )),
            (Some(title), None) => {
                html.push_str(&format!("<strong>{}</strong>", escape_html(title)));
            }
            (None, _) => html.push_str(&escape_html(item.text())),
        }
        html.push_str(&format!("<span class=\"source\">{label}</span></li>\n"));
    }
    html.push_str("</ul>\n");
    html
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
