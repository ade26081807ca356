use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::filter::{ContractViolation, FilterChain};

/// Global settings shared by every task of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// IANA timezone used to derive snapshot keys.
    pub timezone: String,
    /// Size of the process-wide worker pool.
    pub max_workers: usize,
    /// Per-source network timeout in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Responses larger than this are rejected.
    pub max_body_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Shanghai".to_string(),
            max_workers: 3,
            timeout_secs: 30,
            user_agent: concat!("digest/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }
}

/// A parsed configuration: global settings plus the ordered task list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub settings: Settings,
    pub tasks: Vec<TaskConfig>,
}

impl EngineConfig {
    /// Checks every invariant the engine relies on.
    ///
    /// - `max_workers` and `timeout_secs` are greater than 0
    /// - the timezone resolves
    /// - task names and output slugs are non-empty and unique
    /// - every task is valid (see [`TaskConfig::validate`])
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.settings.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        self.settings.tz()?;

        let mut names = HashSet::new();
        let mut slugs = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate(index)?;
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::DuplicateTaskName(task.name.clone()));
            }
            if !slugs.insert(task.output_slug.as_str()) {
                return Err(ConfigError::DuplicateSlug(task.output_slug.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Informational only; the external scheduler owns the cadence.
    #[serde(default = "default_interval")]
    pub interval: String,
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(alias = "output")]
    pub output_slug: String,
    /// Extra values handed to the template (`title` defaults to the task name).
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_interval() -> String {
    "6h".to_string()
}

fn default_template() -> String {
    "default".to_string()
}

impl TaskConfig {
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyTaskName { index });
        }
        if !is_valid_slug(&self.output_slug) {
            return Err(ConfigError::InvalidSlug {
                task: self.name.clone(),
                slug: self.output_slug.clone(),
            });
        }
        if self.template.trim().is_empty() {
            return Err(ConfigError::EmptyTemplate {
                task: self.name.clone(),
            });
        }
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources {
                task: self.name.clone(),
            });
        }
        for source in &self.sources {
            source.validate().map_err(|reason| ConfigError::InvalidSource {
                task: self.name.clone(),
                reason,
            })?;
        }
        FilterChain::compile(&self.filters).map_err(|violation| ConfigError::InvalidFilter {
            task: self.name.clone(),
            violation,
        })?;
        Ok(())
    }

    /// Page title handed to templates.
    pub fn title(&self) -> &str {
        self.variables
            .get("title")
            .map(String::as_str)
            .unwrap_or(&self.name)
    }
}

/// Slugs become a single path segment, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a task's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceSpec {
    /// A JSON API; each top-level element of the payload becomes one item.
    Api {
        #[serde(default)]
        name: Option<String>,
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        bearer_token: Option<String>,
    },
    /// An HTML page; each element matching `selector` becomes one item.
    Web {
        #[serde(default)]
        name: Option<String>,
        url: String,
        selector: String,
    },
}

impl SourceSpec {
    pub fn api(url: impl Into<String>) -> Self {
        SourceSpec::Api {
            name: None,
            url: url.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            bearer_token: None,
        }
    }

    pub fn web(url: impl Into<String>, selector: impl Into<String>) -> Self {
        SourceSpec::Web {
            name: None,
            url: url.into(),
            selector: selector.into(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            SourceSpec::Api { url, .. } | SourceSpec::Web { url, .. } => url,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceSpec::Api { .. } => "api",
            SourceSpec::Web { .. } => "web",
        }
    }

    /// Human-readable label: the configured name, else the URL.
    pub fn label(&self) -> &str {
        let name = match self {
            SourceSpec::Api { name, .. } | SourceSpec::Web { name, .. } => name.as_deref(),
        };
        name.filter(|n| !n.trim().is_empty()).unwrap_or(self.url())
    }

    pub fn validate(&self) -> Result<(), String> {
        let parsed = Url::parse(self.url())
            .map_err(|err| format!("invalid url {:?}: {err}", self.url()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("unsupported url scheme {:?}", parsed.scheme()));
        }
        if let SourceSpec::Web { selector, .. } = self {
            if selector.trim().is_empty() {
                return Err(format!("web source {:?} has an empty selector", self.url()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterAction {
    /// Whitelist gate: items whose predicate does not match are removed.
    #[default]
    Keep,
    /// Blacklist gate: items whose predicate matches are removed.
    #[serde(alias = "Remove")]
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

/// Which part of an item a pattern or keyword rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scope {
    /// Title followed by the text.
    #[default]
    All,
    /// Title only; items without a title never match.
    Title,
    /// Text only.
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterSpec {
    Regex {
        pattern: String,
        #[serde(default)]
        action: FilterAction,
        #[serde(default)]
        ignore_case: bool,
        #[serde(default)]
        scope: Scope,
    },
    Keyword {
        keywords: Vec<String>,
        #[serde(default)]
        action: FilterAction,
        #[serde(default)]
        match_mode: MatchMode,
        #[serde(default)]
        ignore_case: bool,
        #[serde(default)]
        scope: Scope,
    },
    /// Drops items published before the window ending at their fetch time.
    /// `hours` wins over `days` when both are set. Undated items are kept.
    Date {
        #[serde(default)]
        days: Option<u32>,
        #[serde(default)]
        hours: Option<u32>,
    },
    /// Keeps items whose text length (in chars) lies within the bounds.
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    /// Drops items whose text repeats an earlier item of the same run.
    Dedupe,
}

impl FilterSpec {
    pub fn regex(pattern: impl Into<String>, action: FilterAction) -> Self {
        FilterSpec::Regex {
            pattern: pattern.into(),
            action,
            ignore_case: false,
            scope: Scope::All,
        }
    }

    pub fn keyword<I, S>(keywords: I, action: FilterAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterSpec::Keyword {
            keywords: keywords.into_iter().map(Into::into).collect(),
            action,
            match_mode: MatchMode::Any,
            ignore_case: false,
            scope: Scope::All,
        }
    }

    /// Restrict a regex or keyword rule to `scope`; other rules are unchanged.
    pub fn in_scope(mut self, scope: Scope) -> Self {
        match &mut self {
            FilterSpec::Regex { scope: rule, .. } | FilterSpec::Keyword { scope: rule, .. } => {
                *rule = scope;
            }
            _ => {}
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_workers must be greater than 0")]
    ZeroWorkers,
    #[error("timeout_secs must be greater than 0")]
    ZeroTimeout,
    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
    #[error("task #{index} has an empty name")]
    EmptyTaskName { index: usize },
    #[error("duplicate task name {0:?}")]
    DuplicateTaskName(String),
    #[error("task {task:?}: output slug {slug:?} must be non-empty and use only [A-Za-z0-9_-]")]
    InvalidSlug { task: String, slug: String },
    #[error("duplicate output slug {0:?}")]
    DuplicateSlug(String),
    #[error("task {task:?} has an empty template identifier")]
    EmptyTemplate { task: String },
    #[error("task {task:?} has no sources")]
    NoSources { task: String },
    #[error("task {task:?}: {reason}")]
    InvalidSource { task: String, reason: String },
    #[error("task {task:?}: {violation}")]
    InvalidFilter {
        task: String,
        violation: ContractViolation,
    },
}
