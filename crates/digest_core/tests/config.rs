use std::time::Duration;

use digest_core::{
    ConfigError, ContractViolation, EngineConfig, FilterAction, FilterSpec, HttpMethod, Scope,
    Settings, SourceSpec, TaskConfig,
};
use pretty_assertions::assert_eq;

fn task(name: &str, slug: &str) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        interval: "1h".to_string(),
        sources: vec![SourceSpec::api("https://api.example.com/items")],
        filters: Vec::new(),
        template: "default".to_string(),
        output_slug: slug.to_string(),
        variables: Default::default(),
    }
}

fn config(tasks: Vec<TaskConfig>) -> EngineConfig {
    EngineConfig {
        settings: Settings {
            timezone: "UTC".to_string(),
            ..Settings::default()
        },
        tasks,
    }
}

#[test]
fn default_settings_match_documented_values() {
    let settings = Settings::default();
    assert_eq!(settings.timezone, "Asia/Shanghai");
    assert_eq!(settings.max_workers, 3);
    assert_eq!(settings.timeout(), Duration::from_secs(30));
    assert!(settings.user_agent.starts_with("digest/"));
    assert!(settings.tz().is_ok());
}

#[test]
fn valid_config_passes() {
    let cfg = config(vec![task("tech", "tech-news"), task("science", "science_digest")]);
    assert_eq!(cfg.validate(), Ok(()));
}

#[test]
fn duplicate_names_and_slugs_are_rejected() {
    let cfg = config(vec![task("tech", "a"), task("tech", "b")]);
    assert_eq!(cfg.validate(), Err(ConfigError::DuplicateTaskName("tech".into())));

    let cfg = config(vec![task("one", "same"), task("two", "same")]);
    assert_eq!(cfg.validate(), Err(ConfigError::DuplicateSlug("same".into())));
}

#[test]
fn slug_must_be_a_single_safe_segment() {
    for slug in ["", "../up", "a/b", "with space", "index.html"] {
        let cfg = config(vec![task("t", slug)]);
        assert!(
            matches!(cfg.validate(), Err(ConfigError::InvalidSlug { .. })),
            "slug {slug:?} accepted"
        );
    }
}

#[test]
fn empty_name_and_missing_sources_are_rejected() {
    let cfg = config(vec![task("  ", "slug")]);
    assert_eq!(cfg.validate(), Err(ConfigError::EmptyTaskName { index: 0 }));

    let mut no_sources = task("t", "slug");
    no_sources.sources.clear();
    assert_eq!(
        config(vec![no_sources]).validate(),
        Err(ConfigError::NoSources { task: "t".into() })
    );
}

#[test]
fn malformed_sources_are_rejected() {
    let mut bad_url = task("t", "slug");
    bad_url.sources = vec![SourceSpec::api("not a url")];
    assert!(matches!(
        config(vec![bad_url]).validate(),
        Err(ConfigError::InvalidSource { .. })
    ));

    let mut ftp = task("t", "slug");
    ftp.sources = vec![SourceSpec::api("ftp://example.com/data")];
    assert!(matches!(
        config(vec![ftp]).validate(),
        Err(ConfigError::InvalidSource { .. })
    ));

    let mut no_selector = task("t", "slug");
    no_selector.sources = vec![SourceSpec::web("https://example.com", "  ")];
    let err = config(vec![no_selector]).validate().unwrap_err();
    assert!(err.to_string().contains("empty selector"));
}

#[test]
fn empty_keyword_set_is_a_config_error() {
    let mut t = task("t", "slug");
    t.filters = vec![FilterSpec::keyword(Vec::<String>::new(), FilterAction::Keep)];
    assert_eq!(
        config(vec![t]).validate(),
        Err(ConfigError::InvalidFilter {
            task: "t".into(),
            violation: ContractViolation::EmptyKeywords { index: 0 },
        })
    );
}

#[test]
fn global_settings_are_checked() {
    let mut cfg = config(vec![task("t", "slug")]);
    cfg.settings.max_workers = 0;
    assert_eq!(cfg.validate(), Err(ConfigError::ZeroWorkers));

    let mut cfg = config(vec![task("t", "slug")]);
    cfg.settings.timeout_secs = 0;
    assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));

    let mut cfg = config(vec![task("t", "slug")]);
    cfg.settings.timezone = "Mars/Olympus".into();
    assert_eq!(
        cfg.validate(),
        Err(ConfigError::InvalidTimezone("Mars/Olympus".into()))
    );
}

#[test]
fn title_defaults_to_task_name() {
    let mut t = task("Tech digest", "tech");
    assert_eq!(t.title(), "Tech digest");
    t.variables.insert("title".into(), "Daily AI".into());
    assert_eq!(t.title(), "Daily AI");
}

#[test]
fn source_label_prefers_name() {
    let unnamed = SourceSpec::web("https://example.com/list", "li");
    assert_eq!(unnamed.label(), "https://example.com/list");
    assert_eq!(unnamed.kind(), "web");

    let named = SourceSpec::Web {
        name: Some("Example list".into()),
        url: "https://example.com/list".into(),
        selector: "li".into(),
    };
    assert_eq!(named.label(), "Example list");
}

#[test]
fn ron_configuration_deserializes() {
    let text = r#"
(
    settings: (timezone: "UTC", max_workers: 2),
    tasks: [
        (
            name: "tech",
            sources: [
                Api(url: "https://api.example.com/news", method: POST, headers: {"X-Key": "abc"}),
                Web(url: "https://example.com", selector: "article"),
            ],
            filters: [
                Keyword(keywords: ["AI"], action: Keep),
                Regex(pattern: "sports?", action: Remove, ignore_case: true, scope: Title),
                Length(min: Some(3)),
                Dedupe,
                Date(hours: Some(24)),
            ],
            output: "tech-news",
            variables: {"title": "Tech"},
        ),
    ],
)
"#;
    let cfg: EngineConfig = ron::from_str(text).unwrap();
    assert_eq!(cfg.settings.max_workers, 2);
    assert_eq!(cfg.settings.timeout_secs, 30);

    let task = &cfg.tasks[0];
    assert_eq!(task.output_slug, "tech-news");
    assert_eq!(task.template, "default");
    assert_eq!(task.interval, "6h");
    match &task.sources[0] {
        SourceSpec::Api {
            method, headers, ..
        } => {
            assert_eq!(*method, HttpMethod::Post);
            assert_eq!(headers.get("X-Key").map(String::as_str), Some("abc"));
        }
        other => panic!("unexpected source {other:?}"),
    }
    assert_eq!(
        task.filters[1],
        FilterSpec::Regex {
            pattern: "sports?".into(),
            action: FilterAction::Drop,
            ignore_case: true,
            scope: Scope::Title,
        }
    );
    assert_eq!(
        task.filters[4],
        FilterSpec::Date {
            days: None,
            hours: Some(24),
        }
    );
    assert_eq!(cfg.validate(), Ok(()));
}
