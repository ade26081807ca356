use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use digest_core::{
    ConfigError, EngineConfig, FilterAction, FilterSpec, Item, Settings, SourceRef, SourceSpec,
    TaskConfig, TaskStatus,
};
use digest_engine::{
    FetchError, FetchSettings, MemorySurface, Orchestrator, ReqwestFetcher, SnapshotWriter,
    SourceFetcher, TemplateRegistry, INDEX_HTML, INDEX_JSON,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static INIT: Once = Once::new();

fn settings() -> Settings {
    Settings {
        timezone: "UTC".to_string(),
        max_workers: 2,
        ..Settings::default()
    }
}

fn orchestrator(surface: Arc<MemorySurface>) -> Orchestrator {
    let fetcher = Arc::new(ReqwestFetcher::new(FetchSettings::from_settings(&settings())));
    orchestrator_with(surface, fetcher)
}

fn orchestrator_with(
    surface: Arc<MemorySurface>,
    fetcher: Arc<dyn SourceFetcher>,
) -> Orchestrator {
    INIT.call_once(engine_logging::initialize_for_tests);
    let settings = settings();
    let writer = Arc::new(SnapshotWriter::open(surface, chrono_tz::UTC).unwrap());
    Orchestrator::new(
        fetcher,
        Arc::new(TemplateRegistry::with_builtins()),
        writer,
        &settings,
    )
    .with_clock(Arc::new(|| Utc.with_ymd_and_hms(2026, 2, 14, 12, 20, 0).unwrap()))
}

fn task(name: &str, slug: &str, sources: Vec<SourceSpec>) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        interval: "1h".to_string(),
        sources,
        filters: Vec::new(),
        template: "default".to_string(),
        output_slug: slug.to_string(),
        variables: Default::default(),
    }
}

async fn news_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/news"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"["AI breakthrough 2026-02-14", "Sports recap"]"#,
            "application/json",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn scheduled_run_publishes_filtered_snapshot() {
    let server = news_server().await;
    let surface = Arc::new(MemorySurface::new());
    let orchestrator = orchestrator(surface.clone());

    let mut tech = task(
        "tech",
        "tech-news",
        vec![SourceSpec::api(format!("{}/api/news", server.uri()))],
    );
    tech.filters = vec![FilterSpec::keyword(["AI"], FilterAction::Keep)];
    let config = EngineConfig {
        settings: settings(),
        tasks: vec![tech],
    };

    let report = orchestrator.run_batch(&config).await.expect("valid config");

    let tech = report.task("tech").unwrap();
    assert_eq!(tech.status, TaskStatus::Succeeded);
    assert_eq!(tech.snapshot_path.as_deref(), Some("tech-news/2026-2-14-12"));
    assert_eq!((tech.items_fetched, tech.items_kept), (2, 1));

    let page = surface.get("tech-news/2026-2-14-12/index.html").unwrap();
    let page = String::from_utf8(page).unwrap();
    assert!(page.contains("AI breakthrough 2026-02-14"));
    assert!(!page.contains("Sports recap"));

    let index = orchestrator.writer().index().await;
    assert_eq!(index.entries()[0].key, "2026-2-14-12");
    let listing = String::from_utf8(surface.get(INDEX_HTML).unwrap()).unwrap();
    assert!(listing.contains("tech-news/2026-2-14-12/index.html"));
}

#[tokio::test]
async fn failing_task_does_not_affect_siblings() {
    let server = news_server().await;
    let surface = Arc::new(MemorySurface::new());
    let orchestrator = orchestrator(surface.clone());

    let down = task(
        "down",
        "down",
        vec![SourceSpec::api(format!("{}/down", server.uri()))],
    );
    let partial = task(
        "partial",
        "partial",
        vec![
            SourceSpec::api(format!("{}/down", server.uri())),
            SourceSpec::api(format!("{}/api/news", server.uri())),
        ],
    );
    let config = EngineConfig {
        settings: settings(),
        tasks: vec![down, partial],
    };

    let report = orchestrator.run_batch(&config).await.unwrap();

    let names: Vec<_> = report.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["down", "partial"]);
    assert_eq!(report.failed(), 1);
    assert!(!report.all_succeeded());

    let down = &report.tasks[0];
    assert_eq!(down.status, TaskStatus::Failed);
    assert_eq!(down.snapshot_path, None);
    assert_eq!(down.source_errors.len(), 1);
    assert!(down.error.as_deref().unwrap().contains("all 1 sources failed"));
    assert!(surface.paths_under("down").is_empty());

    let partial = &report.tasks[1];
    assert_eq!(partial.status, TaskStatus::Succeeded);
    assert_eq!(partial.source_errors.len(), 1);
    assert_eq!(partial.items_kept, 2);
    assert_eq!(orchestrator.writer().index().await.len(), 1);
}

#[tokio::test]
async fn missing_template_fails_only_that_task() {
    let server = news_server().await;
    let surface = Arc::new(MemorySurface::new());
    let orchestrator = orchestrator(surface.clone());

    let mut fancy = task(
        "fancy",
        "fancy",
        vec![SourceSpec::api(format!("{}/api/news", server.uri()))],
    );
    fancy.template = "does-not-exist".to_string();
    let plain = task(
        "plain",
        "plain",
        vec![SourceSpec::api(format!("{}/api/news", server.uri()))],
    );
    let config = EngineConfig {
        settings: settings(),
        tasks: vec![fancy, plain],
    };

    let report = orchestrator.run_batch(&config).await.unwrap();
    assert_eq!(report.tasks[0].status, TaskStatus::Failed);
    assert!(report.tasks[0]
        .error
        .as_deref()
        .unwrap()
        .contains("\"does-not-exist\" not found"));
    assert_eq!(report.tasks[1].status, TaskStatus::Succeeded);
    assert_eq!(orchestrator.pool().active(), 0);
}

#[tokio::test]
async fn invalid_configuration_runs_nothing() {
    let surface = Arc::new(MemorySurface::new());
    let orchestrator = orchestrator(surface.clone());
    let config = EngineConfig {
        settings: settings(),
        tasks: vec![
            task("a", "same", vec![SourceSpec::api("https://a.example.com")]),
            task("b", "same", vec![SourceSpec::api("https://b.example.com")]),
        ],
    };

    let err = orchestrator.run_batch(&config).await.unwrap_err();
    assert_eq!(err, ConfigError::DuplicateSlug("same".to_string()));
    assert!(surface.files().is_empty());
}

#[tokio::test]
async fn report_serializes_for_operators() {
    let server = news_server().await;
    let orchestrator = orchestrator(Arc::new(MemorySurface::new()));
    let config = EngineConfig {
        settings: settings(),
        tasks: vec![task(
            "tech",
            "tech-news",
            vec![SourceSpec::api(format!("{}/api/news", server.uri()))],
        )],
    };
    let report = orchestrator.run_batch(&config).await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tasks"][0]["status"], "Succeeded");
    assert_eq!(json["tasks"][0]["snapshot_key"], "2026-2-14-12");
    assert!(json.get("settings_overridden").is_none());
}

/// Sleeps before answering and records how many fetches overlap.
#[derive(Default)]
struct SlowFetcher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait::async_trait]
impl SourceFetcher for SlowFetcher {
    async fn fetch(
        &self,
        source: &SourceSpec,
        origin: &SourceRef,
    ) -> Result<Vec<Item>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Item::new(origin.clone(), source.url(), Utc::now())])
    }
}

#[tokio::test]
async fn concurrent_tasks_share_one_worker_bound() {
    let fetcher = Arc::new(SlowFetcher::default());
    let surface = Arc::new(MemorySurface::new());
    let orchestrator = orchestrator_with(surface.clone(), fetcher.clone());

    let tasks: Vec<TaskConfig> = (0..4)
        .map(|t| {
            let sources = (0..3)
                .map(|s| SourceSpec::api(format!("https://t{t}-s{s}.test/")))
                .collect();
            task(&format!("task-{t}"), &format!("slug-{t}"), sources)
        })
        .collect();
    let config = EngineConfig {
        settings: settings(),
        tasks,
    };

    let report = orchestrator.run_batch(&config).await.unwrap();

    assert!(report.all_succeeded());
    assert!(report.tasks.iter().all(|t| t.items_kept == 3));
    assert!(orchestrator.pool().peak() <= 2);
    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(orchestrator.pool().active(), 0);

    let index = orchestrator.writer().index().await;
    assert_eq!(index.len(), 4);
    let pairs: HashSet<_> = index
        .entries()
        .iter()
        .map(|e| (e.slug.clone(), e.key.clone()))
        .collect();
    assert_eq!(pairs.len(), 4);
    let on_surface = String::from_utf8(surface.get(INDEX_JSON).unwrap()).unwrap();
    for t in 0..4 {
        assert!(on_surface.contains(&format!("slug-{t}/2026-2-14-12")));
    }
}

#[tokio::test]
async fn overridden_batch_settings_are_reported() {
    let orchestrator = orchestrator_with(
        Arc::new(MemorySurface::new()),
        Arc::new(SlowFetcher::default()),
    );
    let config = EngineConfig {
        settings: Settings {
            timezone: "Asia/Shanghai".to_string(),
            max_workers: 5,
            timeout_secs: 7,
            ..Settings::default()
        },
        tasks: vec![task("a", "a", vec![SourceSpec::api("https://a.test/")])],
    };

    let report = orchestrator.run_batch(&config).await.unwrap();

    assert_eq!(report.settings_overridden.len(), 3);
    assert!(report.settings_overridden[0].starts_with("max_workers 5"));
    assert!(report.settings_overridden[1].starts_with("timeout_secs 7"));
    assert!(report.settings_overridden[2].starts_with("timezone Asia/Shanghai"));
    // The built UTC timezone still names the snapshot.
    assert_eq!(report.tasks[0].snapshot_key.as_deref(), Some("2026-2-14-12"));
}
