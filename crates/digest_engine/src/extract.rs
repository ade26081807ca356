//! Turning fetched payloads into item fields.
//!
//! Pure functions only: scraper documents are not `Send`, so all parsing
//! happens here, away from any `.await`.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use url::Url;

/// Fields pulled from one JSON element or one matched HTML element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub content: String,
    pub text: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector {selector:?}: {message}")]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

impl SelectorError {
    fn new(selector: &str, message: impl Into<String>) -> Self {
        Self {
            selector: selector.to_string(),
            message: message.into(),
        }
    }
}

/// Split a JSON payload into entries.
///
/// A top-level array yields one entry per element, as does an object whose
/// `data` field is an array. Anything else is a single entry.
pub fn json_entries(payload: Value) -> Vec<Extracted> {
    match payload {
        Value::Array(elements) => elements.into_iter().map(json_entry).collect(),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(elements)) => elements.into_iter().map(json_entry).collect(),
            Some(other) => {
                map.insert("data".to_string(), other);
                vec![json_entry(Value::Object(map))]
            }
            None => vec![json_entry(Value::Object(map))],
        },
        scalar => vec![json_entry(scalar)],
    }
}

fn json_entry(value: Value) -> Extracted {
    let (title, link, published) = match &value {
        Value::Object(map) => (
            string_field(map, &["title", "name"]),
            string_field(map, &["url", "link"]),
            string_field(map, &["date", "created_at", "published"])
                .and_then(|raw| parse_published(&raw)),
        ),
        _ => (None, None, None),
    };
    let content = match value {
        Value::String(s) => s,
        other => other.to_string(),
    };
    Extracted {
        text: content.clone(),
        content,
        title,
        link,
        published,
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a publication date as sources commonly print it.
///
/// Accepts RFC 3339, RFC 2822, `2026-02-14`, `2026-02-14T08:30:00`,
/// `2026-02-14 08:30:00`, `14 Feb 2026` and a bare year. Values without an
/// offset are taken as UTC.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    raw.parse::<i32>()
        .ok()
        .filter(|year| raw.len() == 4 && *year > 0)
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Select every element matching `selector` in document order.
///
/// Zero matches is an empty vector, not an error.
pub fn select_fragments(
    html: &str,
    selector: &str,
    page_url: Option<&Url>,
) -> Result<Vec<Extracted>, SelectorError> {
    let compiled = parse_selector(selector)?;
    let heading = parse_selector("h1, h2, h3")?;
    let anchor = parse_selector("a[href]")?;
    let dated = parse_selector("[datetime], time, .date")?;

    let doc = Html::parse_document(html);
    let fragments = doc
        .select(&compiled)
        .map(|element| {
            let text = normalized_text(element);
            let title = if is_heading(element) {
                Some(text.clone())
            } else {
                element.select(&heading).next().map(normalized_text)
            }
            .filter(|t| !t.is_empty());
            let href = if element.value().name() == "a" {
                element.value().attr("href")
            } else {
                element
                    .select(&anchor)
                    .next()
                    .and_then(|a| a.value().attr("href"))
            };
            Extracted {
                content: element.html(),
                text,
                title,
                link: href.and_then(|h| resolve(h, page_url)),
                published: element.select(&dated).find_map(element_date),
            }
        })
        .collect();
    Ok(fragments)
}

fn parse_selector(selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|e| SelectorError::new(selector, format!("{e:?}")))
}

/// `datetime` attribute first, then the element text.
fn element_date(element: ElementRef<'_>) -> Option<DateTime<Utc>> {
    element
        .value()
        .attr("datetime")
        .and_then(parse_published)
        .or_else(|| parse_published(&normalized_text(element)))
}

fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_heading(element: ElementRef<'_>) -> bool {
    matches!(element.value().name(), "h1" | "h2" | "h3")
}

fn resolve(href: &str, page_url: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    match page_url {
        Some(base) => base.join(href).ok().map(String::from),
        None => Url::parse(href).ok().map(String::from),
    }
}
