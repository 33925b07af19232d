// tests/pipeline_offline.rs
//
// End-to-end runs through `Pipeline::run` with stubbed market context, fixture
// signals and a scripted model.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use polyseek::config::Settings;
use polyseek::llm::ScriptedClient;
use polyseek::market::ContextCollector;
use polyseek::pipeline::Pipeline;
use polyseek::progress::{NullSink, ProgressEvent, ProgressSink};
use polyseek::report;
use polyseek::request::{AnalysisRequest, Depth, Perspective};
use polyseek::signals::{NewsProvider, RssFallbackProvider, SignalAggregator, SignalProvider};
use reqwest::Client;
use serde_json::Value;

const NEWS_JSON: &str = include_str!("fixtures/news_everything.json");
const RSS_XML: &str = include_str!("fixtures/google_news.xml");
const URL: &str = "https://polymarket.com/event/fed-rate-cut-december";

fn offline_settings() -> Settings {
    let mut s = Settings::default();
    s.app.offline_mode = true;
    s
}

/// Offline market context (market + one comment) and live-parsed news fixture.
fn pipeline(settings: &Settings, llm: Arc<ScriptedClient>) -> Pipeline {
    let aggregator = SignalAggregator::new(
        vec![SignalProvider::News(NewsProvider::from_fixture(NEWS_JSON))],
        RssFallbackProvider::from_fixture(RSS_XML),
        Duration::from_secs(5),
    );
    Pipeline::new(
        settings,
        ContextCollector::new(Client::new(), settings),
        aggregator,
        llm,
    )
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl ProgressSink for Recorder {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut v) = self.0.lock() {
            v.push(event);
        }
    }
}

impl Recorder {
    fn names(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|v| v.iter().map(|e| e.name().to_string()).collect())
            .unwrap_or_default()
    }

    fn payload(&self, name: &str) -> Option<Value> {
        let v = self.0.lock().ok()?;
        v.iter().find_map(|e| match e {
            ProgressEvent::Json { name: n, payload } if n == name => Some(payload.clone()),
            _ => None,
        })
    }
}

#[tokio::test]
async fn quick_run_produces_a_reparseable_report() {
    let reply = r#"{"verdict":"YES","confidence_pct":0.64,"summary":"Officials and prices agree.",
        "key_drivers":[{"text":"Officials signal openness","source_ids":["SRC3"]},{"text":"Market at 50%","source_ids":["SRC1"]}],
        "uncertainty_factors":["Inflation"],"sources":["SRC1","SRC3"]}"#;
    let llm = Arc::new(ScriptedClient::replies([reply]));
    let settings = offline_settings();
    let sink = Recorder::default();

    let out = pipeline(&settings, llm.clone())
        .run(&AnalysisRequest::new(URL, Depth::Quick, Perspective::Neutral), &sink)
        .await
        .expect("report");

    assert_eq!(llm.calls(), 1);
    let v = report::parse_json(&out.json).expect("valid verdict json");
    assert_eq!(v.confidence_pct, 64.0);
    assert!(v.analysis_timestamp.is_some());
    assert!(out.markdown.contains("### Verdict: **YES**"));
    assert!(out.markdown.contains("[SRC3]"));

    // market + comment + two distinct news urls
    let evidence = sink.payload("EVIDENCE").expect("evidence event");
    assert_eq!(evidence["records"], 4);
    assert_eq!(evidence["ids"], "SRC1..SRC4");

    let names = sink.names();
    assert_eq!(names.first().map(String::as_str), Some("MARKET_METADATA"));
    assert_eq!(names.last().map(String::as_str), Some("ANALYSIS_MARKDOWN"));
}

#[tokio::test]
async fn budget_caps_the_pool_and_later_ids_are_rejected() {
    let mut settings = offline_settings();
    settings.evidence.budget_quick = 3;
    let beyond = r#"{"verdict":"NO","confidence_pct":30,"summary":"s","key_drivers":[{"text":"t","source_ids":["SRC4"]}],"uncertainty_factors":[]}"#;
    let llm = Arc::new(ScriptedClient::replies([beyond, beyond]));
    let sink = Recorder::default();

    let err = pipeline(&settings, llm.clone())
        .run(&AnalysisRequest::new(URL, Depth::Quick, Perspective::Neutral), &sink)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_model_output");
    assert_eq!(llm.calls(), 2);
    assert_eq!(sink.payload("EVIDENCE").unwrap()["ids"], "SRC1..SRC3");
    assert!(!sink.names().iter().any(|n| n == "ANALYSIS_JSON"));
}

#[tokio::test]
async fn unsupported_host_aborts_before_any_model_call() {
    let llm = Arc::new(ScriptedClient::replies(["unused"]));
    let sink = Recorder::default();
    let err = pipeline(&offline_settings(), llm.clone())
        .run(
            &AnalysisRequest::new("https://example.com/markets/1", Depth::Deep, Perspective::Neutral),
            &sink,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "unsupported_market");
    assert_eq!(llm.calls(), 0);
    assert!(sink.names().is_empty());
}

#[tokio::test]
async fn malformed_url_is_an_invalid_request() {
    let llm = Arc::new(ScriptedClient::default());
    let err = pipeline(&offline_settings(), llm.clone())
        .run(&AnalysisRequest::from_prompt("   "), &NullSink)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    assert_eq!(llm.calls(), 0);
}
