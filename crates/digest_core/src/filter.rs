use std::borrow::Cow;
use std::collections::HashSet;

use chrono::TimeDelta;
use regex::{Regex, RegexBuilder};

use crate::config::{FilterAction, FilterSpec, MatchMode, Scope};
use crate::item::Item;

/// A filter spec that the engine refuses to run.
///
/// Configuration validation rejects these up front; the chain re-checks so a
/// spec that slipped through fails loudly instead of matching everything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("filter #{index}: keyword set is empty")]
    EmptyKeywords { index: usize },
    #[error("filter #{index}: keyword set contains an empty keyword")]
    BlankKeyword { index: usize },
    #[error("filter #{index}: invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        message: String,
    },
    #[error("filter #{index}: length bounds inverted (min {min} > max {max})")]
    InvertedLength { index: usize, min: usize, max: usize },
    #[error("filter #{index}: date window needs days or hours greater than 0")]
    EmptyDateWindow { index: usize },
}

#[derive(Debug, Clone)]
enum Rule {
    Pattern {
        regex: Regex,
        action: FilterAction,
        scope: Scope,
    },
    Keywords {
        keywords: Vec<String>,
        mode: MatchMode,
        ignore_case: bool,
        action: FilterAction,
        scope: Scope,
    },
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
    Dedupe,
    Recent {
        window: TimeDelta,
    },
}

impl Rule {
    fn compile(index: usize, spec: &FilterSpec) -> Result<Self, ContractViolation> {
        match spec {
            FilterSpec::Regex {
                pattern,
                action,
                ignore_case,
                scope,
            } => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(*ignore_case)
                    .build()
                    .map_err(|err| ContractViolation::InvalidRegex {
                        index,
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })?;
                Ok(Rule::Pattern {
                    regex,
                    action: *action,
                    scope: *scope,
                })
            }
            FilterSpec::Keyword {
                keywords,
                action,
                match_mode,
                ignore_case,
                scope,
            } => {
                if keywords.is_empty() {
                    return Err(ContractViolation::EmptyKeywords { index });
                }
                // An empty keyword is a substring of everything.
                if keywords.iter().any(String::is_empty) {
                    return Err(ContractViolation::BlankKeyword { index });
                }
                let keywords = if *ignore_case {
                    keywords.iter().map(|k| k.to_lowercase()).collect()
                } else {
                    keywords.clone()
                };
                Ok(Rule::Keywords {
                    keywords,
                    mode: *match_mode,
                    ignore_case: *ignore_case,
                    action: *action,
                    scope: *scope,
                })
            }
            FilterSpec::Length { min, max } => {
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(ContractViolation::InvertedLength {
                            index,
                            min: *min,
                            max: *max,
                        });
                    }
                }
                Ok(Rule::Length {
                    min: *min,
                    max: *max,
                })
            }
            FilterSpec::Dedupe => Ok(Rule::Dedupe),
            FilterSpec::Date { days, hours } => {
                let window = match (hours.unwrap_or(0), days.unwrap_or(0)) {
                    (0, 0) => return Err(ContractViolation::EmptyDateWindow { index }),
                    (0, days) => TimeDelta::days(i64::from(days)),
                    (hours, _) => TimeDelta::hours(i64::from(hours)),
                };
                Ok(Rule::Recent { window })
            }
        }
    }

    fn narrow(&self, items: Vec<Item>) -> Vec<Item> {
        match self {
            Rule::Pattern {
                regex,
                action,
                scope,
            } => items
                .into_iter()
                .filter(|item| {
                    let matched = scoped_text(item, *scope).is_some_and(|t| regex.is_match(&t));
                    gate(*action, matched)
                })
                .collect(),
            Rule::Keywords {
                keywords,
                mode,
                ignore_case,
                action,
                scope,
            } => items
                .into_iter()
                .filter(|item| {
                    let matched = scoped_text(item, *scope).is_some_and(|text| {
                        if *ignore_case {
                            keywords_match(keywords, *mode, &text.to_lowercase())
                        } else {
                            keywords_match(keywords, *mode, &text)
                        }
                    });
                    gate(*action, matched)
                })
                .collect(),
            Rule::Length { min, max } => items
                .into_iter()
                .filter(|item| {
                    let len = item.text().chars().count();
                    min.map_or(true, |min| len >= min) && max.map_or(true, |max| len <= max)
                })
                .collect(),
            Rule::Dedupe => {
                let mut seen = HashSet::new();
                items
                    .into_iter()
                    .filter(|item| seen.insert(item.text().to_string()))
                    .collect()
            }
            Rule::Recent { window } => items
                .into_iter()
                .filter(|item| {
                    let cutoff = item.fetched_at().checked_sub_signed(*window);
                    match (item.published(), cutoff) {
                        (Some(published), Some(cutoff)) => published >= cutoff,
                        _ => true,
                    }
                })
                .collect(),
        }
    }
}

/// The part of `item` a scoped rule inspects; `None` when it has no such part.
fn scoped_text(item: &Item, scope: Scope) -> Option<Cow<'_, str>> {
    match (scope, item.title()) {
        (Scope::All, Some(title)) => Some(Cow::Owned(format!("{title} {}", item.text()))),
        (Scope::All, None) | (Scope::Content, _) => Some(Cow::Borrowed(item.text())),
        (Scope::Title, title) => title.map(Cow::Borrowed),
    }
}

fn gate(action: FilterAction, matched: bool) -> bool {
    match action {
        FilterAction::Keep => matched,
        FilterAction::Drop => !matched,
    }
}

fn keywords_match(keywords: &[String], mode: MatchMode, text: &str) -> bool {
    match mode {
        MatchMode::Any => keywords.iter().any(|k| text.contains(k.as_str())),
        MatchMode::All => keywords.iter().all(|k| text.contains(k.as_str())),
    }
}

/// An ordered, compiled sequence of narrowing rules.
///
/// Each rule only removes items from what the previous rule produced and
/// keeps the relative order of the survivors.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    rules: Vec<Rule>,
}

impl FilterChain {
    pub fn compile(specs: &[FilterSpec]) -> Result<Self, ContractViolation> {
        let rules = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| Rule::compile(index, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, items: Vec<Item>) -> Vec<Item> {
        self.apply_staged(items).0
    }

    /// Like [`FilterChain::apply`], also returning the item count after each rule.
    pub fn apply_staged(&self, items: Vec<Item>) -> (Vec<Item>, Vec<usize>) {
        let mut counts = Vec::with_capacity(self.rules.len());
        let mut current = items;
        for rule in &self.rules {
            current = rule.narrow(current);
            counts.push(current.len());
        }
        (current, counts)
    }
}

/// Compile `specs` and run them over `items` in one call.
pub fn apply(specs: &[FilterSpec], items: Vec<Item>) -> Result<Vec<Item>, ContractViolation> {
    Ok(FilterChain::compile(specs)?.apply(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::SourceRef;
    use chrono::{TimeZone, Utc};

    fn item(text: &str) -> Item {
        let source = SourceRef {
            index: 0,
            label: "test".to_string(),
        };
        Item::new(source, text, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn blank_keyword_is_rejected() {
        let spec = FilterSpec::keyword(["AI", ""], FilterAction::Keep);
        let err = FilterChain::compile(&[spec]).unwrap_err();
        assert_eq!(err, ContractViolation::BlankKeyword { index: 0 });
    }

    #[test]
    fn ignore_case_keyword_lowercases_both_sides() {
        let spec = FilterSpec::Keyword {
            keywords: vec!["VLA".to_string()],
            action: FilterAction::Keep,
            match_mode: MatchMode::Any,
            ignore_case: true,
            scope: Scope::All,
        };
        let out = apply(&[spec], vec![item("new vla model"), item("other")]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "new vla model");
    }

    #[test]
    fn length_counts_chars_not_bytes() {
        let spec = FilterSpec::Length {
            min: None,
            max: Some(4),
        };
        let out = apply(&[spec], vec![item("café"), item("cafés")]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "café");
    }
}
