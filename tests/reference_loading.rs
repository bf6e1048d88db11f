//! Sensitive NATINF list loading and the comment it produces.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use faed_autopilot::config::ReferenceSource;
use faed_autopilot::error::ReferenceError;
use faed_autopilot::locator::PageLayout;
use faed_autopilot::natinf::{COMMENT_AREA, SensitiveCodes, ensure_comment, evaluate, natinf_selectors};
use faed_autopilot::page::memory::{MemoryElement, MemoryPage};

// ============================================================================
// Helpers
// ============================================================================

fn document() -> Value {
    json!({
        "version": "2024-06",
        "natinfCodes": ["7151", {"code": "a12b"}, 28]
    })
}

fn from_relay(server: &MockServer) -> SensitiveCodes {
    SensitiveCodes::new(ReferenceSource {
        path: "/nonexistent/natinf-survey.json".into(),
        relay_url: Some(format!("{}/natinf", server.uri())),
    })
}

fn page_with_natinf(value: &str) -> MemoryPage {
    let page = MemoryPage::new();
    page.insert(
        natinf_selectors(PageLayout::Direct)[0].clone(),
        MemoryElement::input(value),
    );
    page.insert(COMMENT_AREA, MemoryElement::input(""));
    page
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn bundled_file_is_read_first() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("natinf.json");
    std::fs::write(&file, document().to_string()).unwrap();

    let codes = SensitiveCodes::new(ReferenceSource { path: file, relay_url: None });
    let set = codes.reference().await.unwrap();
    assert!(set.codes.contains("A12B"));
    assert!(set.codes.contains("28"));
    assert_eq!(set.version.as_deref(), Some("2024-06"));
}

#[tokio::test]
async fn concurrent_callers_share_one_relay_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/natinf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(document())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let codes = from_relay(&server);
    let (first, second) = tokio::join!(codes.reference(), codes.reference());
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &codes.reference().await.unwrap()));
}

#[tokio::test]
async fn relay_may_answer_with_a_json_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/natinf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::String(document().to_string())))
        .mount(&server)
        .await;

    let set = from_relay(&server).reference().await.unwrap();
    assert_eq!(set.codes.len(), 3);
}

#[tokio::test]
async fn failed_load_is_retried_on_the_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/natinf"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/natinf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .mount(&server)
        .await;

    let codes = from_relay(&server);
    let err = codes.reference().await.unwrap_err();
    assert!(matches!(err, ReferenceError::Status(503)));
    assert!(codes.reference().await.unwrap().codes.contains("7151"));
}

#[tokio::test]
async fn missing_file_without_relay_fails_open() {
    let codes = SensitiveCodes::new(ReferenceSource {
        path: "/nonexistent/natinf-survey.json".into(),
        relay_url: None,
    });
    assert!(matches!(codes.reference().await, Err(ReferenceError::NoRelay)));

    let page = page_with_natinf("7151 - Vol simple");
    let verdict = evaluate(&page, PageLayout::Direct, &codes).await;
    assert!(!verdict.should_write);
    assert!(page.writes().is_empty());
}

// ============================================================================
// Evaluation and comment
// ============================================================================

#[tokio::test]
async fn sensitive_code_on_the_form_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/natinf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .mount(&server)
        .await;
    let codes = from_relay(&server);

    let page = page_with_natinf(" 7151 - Vol simple");
    let verdict = evaluate(&page, PageLayout::Direct, &codes).await;
    assert!(verdict.should_write);
    assert_eq!(verdict.codes, vec!["7151"]);
    assert!(verdict.message.ends_with("Code(s) detecte(s) : 7151"));

    let harmless = page_with_natinf("9999 - Autre");
    assert!(!evaluate(&harmless, PageLayout::Direct, &codes).await.should_write);
}

#[tokio::test]
async fn comment_is_written_once() {
    let page = page_with_natinf("");
    assert!(ensure_comment(&page, "message", false).await.unwrap());
    assert!(!ensure_comment(&page, "message", false).await.unwrap());
    assert_eq!(page.writes().len(), 1);
}

#[tokio::test]
async fn appended_comment_follows_existing_text() {
    let page = page_with_natinf("");
    page.insert(COMMENT_AREA, MemoryElement::input("1. L'UNA doit être au format 5/5/4"));

    assert!(ensure_comment(&page, "message", true).await.unwrap());
    assert_eq!(
        page.value_of(COMMENT_AREA).as_deref(),
        Some("1. L'UNA doit être au format 5/5/4\n\nmessage")
    );
    assert!(!ensure_comment(&page, "message", true).await.unwrap());
}

#[tokio::test]
async fn missing_comment_area_is_not_an_error() {
    let page = MemoryPage::new();
    assert!(!ensure_comment(&page, "message", true).await.unwrap());
}
