//! End-to-end session behaviour on an in-memory control sheet.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

use faed_autopilot::config::{ReferenceSource, SCRIPT_NAME, Timings, VERSION};
use faed_autopilot::corrector::COMPLIANT_RADIO;
use faed_autopilot::locator::{FieldName, PageLayout, TITLE_ZONE};
use faed_autopilot::natinf::{COMMENT_AREA, SensitiveCodes};
use faed_autopilot::page::memory::{MemoryElement, MemoryPage};
use faed_autopilot::page::{ModalChoice, Page};
use faed_autopilot::progress::DOSSIER_COUNTER;
use faed_autopilot::protocol::{Command, Notification, Notifier, Response, StopReason, VerifyStatus};
use faed_autopilot::rules::{MSG_INITIATEUR_REQUIRED, MSG_UNA_FORMAT};
use faed_autopilot::session::{AutomationSession, Phase};
use faed_autopilot::steps::{
    FINGERPRINTS_TAB, FINISH_CONTROL, NON_COMPLIANT_ALPHA, NON_COMPLIANT_PALMS, OK_AND_NEXT,
    PALMS_TAB,
};
use faed_autopilot::store::StateStore;

// ============================================================================
// Helpers
// ============================================================================

fn control_sheet() -> Arc<MemoryPage> {
    let page = MemoryPage::new();
    page.insert(TITLE_ZONE, MemoryElement::text("  Controle de la fiche "));
    let fields = [
        (FieldName::TypeDeSignalisation, "AB"),
        (FieldName::Nom, "DUPONT"),
        (FieldName::Prenom, "JEAN"),
        (FieldName::ServiceInitiateur, "BR75012"),
        (FieldName::Una, "123/45/2024"),
        (FieldName::FicheEtabliePar, "MARTIN"),
        (FieldName::ServiceRattachement, "75012"),
    ];
    for (field, value) in fields {
        page.insert(field.direct_selector(), MemoryElement::input(value));
    }
    for selector in [
        NON_COMPLIANT_ALPHA,
        FINGERPRINTS_TAB,
        PALMS_TAB,
        NON_COMPLIANT_PALMS,
        FINISH_CONTROL,
        OK_AND_NEXT,
    ] {
        page.insert(selector, MemoryElement::button());
    }
    page.insert(COMPLIANT_RADIO, MemoryElement::radio(false));
    page.insert(COMMENT_AREA, MemoryElement::input(""));
    Arc::new(page)
}

fn session_with(page: Arc<MemoryPage>, state_file: &Path, timings: Timings) -> Arc<AutomationSession> {
    let codes = SensitiveCodes::new(ReferenceSource {
        path: state_file.with_file_name("missing-natinf.json"),
        relay_url: None,
    });
    AutomationSession::new(
        page,
        StateStore::new(state_file),
        codes,
        Notifier::with_capacity(64),
        timings,
    )
}

async fn next_matching(
    rx: &mut broadcast::Receiver<Notification>,
    accept: impl Fn(&Notification) -> bool,
) -> Notification {
    timeout(Duration::from_secs(120), async {
        loop {
            let notification = rx.recv().await.expect("notifier still open");
            if accept(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification arrived in time")
}

// ============================================================================
// Step runner
// ============================================================================

#[tokio::test(start_paused = true)]
async fn fast_sequence_is_padded_to_the_minimum_duration() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    let timings = Timings {
        step_pacing: Duration::from_millis(300),
        ..Timings::default()
    };
    let session = session_with(page.clone(), &dir.path().join("state.json"), timings);
    let mut rx = session.notifier().subscribe();

    let start = Instant::now();
    let response = session.handle(Command::StartLoopProcessing).await;
    assert_eq!(
        response,
        Response::Loop { success: true, validation_result: true, error: None }
    );

    next_matching(&mut rx, |n| matches!(n, Notification::ActionsComplete { .. })).await;
    let steps_done = start.elapsed();
    assert!(steps_done < Duration::from_millis(4000), "steps took {steps_done:?}");

    next_matching(&mut rx, |n| matches!(n, Notification::StartFinalWait)).await;
    let done = next_matching(&mut rx, |n| matches!(n, Notification::Done { .. })).await;
    assert!(start.elapsed() >= Duration::from_millis(4000));
    assert_eq!(done, Notification::Done { progress_percentage: None });

    assert_eq!(
        page.clicks(),
        vec![
            NON_COMPLIANT_ALPHA,
            FINGERPRINTS_TAB,
            PALMS_TAB,
            NON_COMPLIANT_PALMS,
            FINISH_CONTROL,
            OK_AND_NEXT,
        ]
    );
    assert_eq!(session.state().phase, Phase::Idle);
    assert_eq!(session.state().current_step, 0);
}

#[tokio::test(start_paused = true)]
async fn manual_steps_walk_the_sequence_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());
    let mut rx = session.notifier().subscribe();

    session.next_step().await.unwrap();
    let first = next_matching(&mut rx, |n| matches!(n, Notification::StepCompleted { .. })).await;
    assert!(matches!(
        first,
        Notification::StepCompleted { step_index: 0, next_step_index: 1, .. }
    ));
    assert!(session.state().is_active);
    assert_eq!(page.clicks(), vec![NON_COMPLIANT_ALPHA]);

    for _ in 1..5 {
        session.next_step().await.unwrap();
    }
    next_matching(&mut rx, |n| matches!(n, Notification::Done { .. })).await;
    assert_eq!(page.clicks().len(), 6);
    assert_eq!(session.state().current_step, 0);
}

#[tokio::test(start_paused = true)]
async fn corrected_record_skips_the_non_compliant_step() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    page.insert(FieldName::Una.direct_selector(), MemoryElement::input("123-45-2024"));
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());
    let mut rx = session.notifier().subscribe();

    let response = session
        .handle(Command::StartScript { script: SCRIPT_NAME.into() })
        .await;
    assert_eq!(
        response,
        Response::Outcome { success: true, result: Some(false), error: None }
    );

    let step = next_matching(&mut rx, |n| matches!(n, Notification::StepCompleted { .. })).await;
    assert!(matches!(step, Notification::StepCompleted { step_index: 1, .. }));
    assert_eq!(page.clicks(), vec![COMPLIANT_RADIO, FINGERPRINTS_TAB]);
    assert_eq!(page.checked(COMPLIANT_RADIO), Some(true));
    assert_eq!(
        page.value_of(COMMENT_AREA).as_deref(),
        Some(format!("1. {MSG_UNA_FORMAT}").as_str())
    );
    assert!(page.highlighted().contains(FieldName::Una.direct_selector()));

    // Outside loop mode the runner waits for the next manual step.
    assert_eq!(session.state().phase, Phase::Idle);
    assert_eq!(session.state().current_step, 2);
}

#[tokio::test(start_paused = true)]
async fn failing_step_in_loop_mode_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let page = control_sheet();
    page.fail_clicks_on(FINGERPRINTS_TAB);
    let session = session_with(page.clone(), &state_file, Timings::default());
    let mut rx = session.notifier().subscribe();

    session.handle(Command::StartLoopProcessing).await;
    let stopped = next_matching(&mut rx, |n| {
        matches!(n, Notification::LoopProcessingStopped { .. })
    })
    .await;
    assert!(matches!(
        stopped,
        Notification::LoopProcessingStopped { reason: StopReason::ErrorDuringStep, details: Some(_) }
    ));

    assert!(!StateStore::new(&state_file).loop_active().unwrap());
    assert!(!session.loop_active());
    assert_eq!(session.state().phase, Phase::Failed);
    let window = page.error_window().expect("error window shown");
    assert!(window[0].contains("Empreintes (doigts)"));
}

#[tokio::test(start_paused = true)]
async fn verify_is_rejected_while_steps_are_running() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    page.remove(FINGERPRINTS_TAB);
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());
    let mut rx = session.notifier().subscribe();

    session.handle(Command::StartLoopProcessing).await;
    next_matching(&mut rx, |n| matches!(n, Notification::StepCompleted { step_index: 0, .. })).await;
    assert_eq!(session.state().phase, Phase::Running);

    let response = session.handle(Command::Verify).await;
    let Response::Status { status, details } = response else {
        panic!("unexpected response shape");
    };
    assert_eq!(status, VerifyStatus::Error);
    assert!(details.unwrap()[0].contains("already running"));
}

#[tokio::test(start_paused = true)]
async fn stop_loop_cancels_a_pending_step_wait() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    page.remove(FINGERPRINTS_TAB);
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());
    let mut rx = session.notifier().subscribe();

    session.handle(Command::StartLoopProcessing).await;
    next_matching(&mut rx, |n| matches!(n, Notification::StepCompleted { step_index: 0, .. })).await;

    assert_eq!(session.handle(Command::StopLoopProcessing).await, Response::ok());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(session.state().phase, Phase::Idle);
    assert!(page.error_window().is_none());
    assert_eq!(page.clicks(), vec![NON_COMPLIANT_ALPHA]);
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test(start_paused = true)]
async fn empty_page_reports_required_fields_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(MemoryPage::new());
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());

    let response = session.handle(Command::Verify).await;
    let Response::Status { status: VerifyStatus::Error, details: Some(errors) } = response else {
        panic!("expected an error status");
    };
    assert!(errors.iter().any(|e| e == MSG_INITIATEUR_REQUIRED));
    assert!(errors.iter().any(|e| e == MSG_UNA_FORMAT));
    assert_eq!(session.state().layout, Some(PageLayout::NotFound));
    assert_eq!(page.error_window(), Some(errors));
    assert!(page.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fix_choice_applies_the_listed_errors() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    page.insert(FieldName::Una.direct_selector(), MemoryElement::input(""));
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());

    session.validate_only().await.unwrap();
    assert!(page.error_window().is_some());
    assert!(page.clicks().is_empty());

    session.resolve_errors(ModalChoice::Fix).await.unwrap();
    assert!(page.error_window().is_none());
    assert_eq!(page.checked(COMPLIANT_RADIO), Some(true));
    assert_eq!(
        page.value_of(COMMENT_AREA).as_deref(),
        Some(format!("1. {MSG_UNA_FORMAT}").as_str())
    );
}

// ============================================================================
// Loop controller
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reload_off_the_control_sheet_clears_the_loop_flag() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    StateStore::new(&state_file).set_loop_active(true).unwrap();

    let page = control_sheet();
    page.remove(TITLE_ZONE);
    let session = session_with(page.clone(), &state_file, Timings::default());
    let mut rx = session.notifier().subscribe();

    session.on_page_load().await;

    let stopped = next_matching(&mut rx, |n| {
        matches!(n, Notification::LoopProcessingStopped { .. })
    })
    .await;
    assert!(matches!(
        stopped,
        Notification::LoopProcessingStopped {
            reason: StopReason::InitializationNotOnControlSheet,
            ..
        }
    ));
    assert!(!StateStore::new(&state_file).loop_active().unwrap());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(page.writes().is_empty());
    assert!(page.clicks().is_empty());
    assert_eq!(session.state().layout, None);
}

#[tokio::test(start_paused = true)]
async fn reload_on_the_control_sheet_resumes_after_settling() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    StateStore::new(&state_file).set_loop_active(true).unwrap();

    let page = control_sheet();
    let session = session_with(page.clone(), &state_file, Timings::default());
    let mut rx = session.notifier().subscribe();

    let start = Instant::now();
    let resume = {
        let session = session.clone();
        tokio::spawn(async move { session.on_page_load().await })
    };
    next_matching(&mut rx, |n| matches!(n, Notification::StepCompleted { step_index: 0, .. })).await;
    assert!(start.elapsed() >= Duration::from_millis(1500));
    assert!(session.loop_active());
    resume.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn leftover_error_window_prevents_resume() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    StateStore::new(&state_file).set_loop_active(true).unwrap();

    let page = control_sheet();
    page.show_error_window(&["previous failure".to_string()]).await.unwrap();
    let session = session_with(page.clone(), &state_file, Timings::default());
    let mut rx = session.notifier().subscribe();

    session.on_page_load().await;
    let stopped = next_matching(&mut rx, |n| {
        matches!(n, Notification::LoopProcessingStopped { .. })
    })
    .await;
    assert!(matches!(
        stopped,
        Notification::LoopProcessingStopped { reason: StopReason::ErrorWindowPresent, .. }
    ));
    assert!(page.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn leaving_the_control_sheet_mid_loop_completes_processing() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());
    let mut rx = session.notifier().subscribe();

    session.handle(Command::StartLoopProcessing).await;
    page.remove(TITLE_ZONE);
    let response = session.handle(Command::CheckAlphaNumeric).await;
    assert!(matches!(response, Response::Outcome { success: false, result: Some(false), .. }));

    assert!(!session.verify_alpha_numeric().await.unwrap());
    assert!(!session.loop_active());
    let stopped = next_matching(&mut rx, |n| {
        matches!(n, Notification::LoopProcessingStopped { .. })
    })
    .await;
    assert!(matches!(
        stopped,
        Notification::LoopProcessingStopped { reason: StopReason::ProcessingCompleted, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn progress_is_reported_while_looping() {
    let dir = tempfile::tempdir().unwrap();
    let page = control_sheet();
    page.remove(FINGERPRINTS_TAB);
    page.insert(DOSSIER_COUNTER, MemoryElement::input("3/4"));
    page.install_progress_bar();
    let session = session_with(page.clone(), &dir.path().join("state.json"), Timings::default());
    let mut rx = session.notifier().subscribe();

    session.handle(Command::StartLoopProcessing).await;
    let update = next_matching(&mut rx, |n| matches!(n, Notification::ProgressUpdate { .. })).await;
    assert_eq!(
        update,
        Notification::ProgressUpdate {
            progress_percentage: 75,
            current_dossier: 3,
            total_dossiers: 4,
            dossier_text: "3/4".into(),
        }
    );
    assert!(!page.progress_pushes().is_empty());
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn every_command_gets_an_answer() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let page = Arc::new(MemoryPage::new());
    let session = session_with(page, &state_file, Timings::default());

    assert_eq!(
        session.handle(Command::Ping).await,
        Response::Pong { pong: true, version: VERSION.into() }
    );

    let Response::Echo { success, received_timestamp, .. } =
        session.handle(Command::TestMessaging { timestamp: Some(42) }).await
    else {
        panic!("expected an echo");
    };
    assert!(success);
    assert_eq!(received_timestamp, Some(42));

    let wrong = session
        .handle(Command::StartScript { script: "otherScript".into() })
        .await;
    assert!(matches!(wrong, Response::Outcome { success: false, error: Some(_), .. }));

    assert_eq!(
        session.handle(Command::Reset).await,
        Response::Status { status: VerifyStatus::ResetComplete, details: None }
    );
    assert!(session.state().is_active);

    let off_page = session.handle(Command::CheckAlphaNumeric).await;
    assert!(matches!(off_page, Response::Outcome { success: false, result: Some(false), .. }));

    let looped = session.handle(Command::StartLoopProcessing).await;
    assert!(matches!(looped, Response::Loop { success: false, validation_result: false, .. }));

    assert_eq!(
        session.handle(Command::NextStep).await,
        Response::Accepted { accepted: true }
    );
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_script_track_the_active_script() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let session = session_with(control_sheet(), &state_file, Timings::default());
    let store = StateStore::new(&state_file);

    session.handle(Command::StartScript { script: SCRIPT_NAME.into() }).await;
    assert_eq!(store.load().unwrap().active_script.as_deref(), Some(SCRIPT_NAME));

    let stopped = session.handle(Command::StopScript { script: SCRIPT_NAME.into() }).await;
    assert_eq!(stopped, Response::ok());
    assert_eq!(store.load().unwrap().active_script, None);
    assert!(!session.state().is_active);
}
