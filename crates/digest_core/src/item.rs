use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which declared source of a task produced an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Position of the source in the task's declaration order.
    pub index: usize,
    pub label: String,
}

/// One unit of fetched content.
///
/// Built once by a fetcher and read-only afterwards; the `with_*` builders
/// consume the value so they can only run before it is shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    content: String,
    text: String,
    title: Option<String>,
    link: Option<String>,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
    source: SourceRef,
    fetched_at: DateTime<Utc>,
}

impl Item {
    /// An item whose filter text equals its raw content.
    pub fn new(source: SourceRef, content: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        let content = content.into();
        Self {
            text: content.clone(),
            content,
            title: None,
            link: None,
            published: None,
            source,
            fetched_at,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_published(mut self, published: Option<DateTime<Utc>>) -> Self {
        self.published = published;
        self
    }

    /// Raw fragment: serialized JSON element or outer HTML of a match.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Plain text inspected by filters.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    /// Publication time reported by the source, if it had a parsable one.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}
