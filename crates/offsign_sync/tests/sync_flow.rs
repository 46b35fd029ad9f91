//! End-to-end flows: offline capture through delivery, over a real
//! file-backed store.

use offsign_core::{
    now_millis, DocumentInfo, EventBus, LocalSessionManager, QueuedSubmission, Session,
    SessionStatus, SignatureField, SignatureMap,
};
use offsign_store::{FileStore, StoreBackend};
use offsign_sync::{
    ConflictInfo, Connectivity, MockEndpoint, RetryConfig, ScriptedResponse, SkipReason,
    SyncConfig, SyncManager,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open_sessions(dir: &TempDir) -> Arc<LocalSessionManager> {
    let store: Arc<dyn StoreBackend> = Arc::new(FileStore::open(dir.path()).unwrap());
    Arc::new(LocalSessionManager::with_device_key(store).unwrap())
}

fn build_manager(
    sessions: &Arc<LocalSessionManager>,
    connectivity: &Connectivity,
    retry: RetryConfig,
) -> (Arc<SyncManager<MockEndpoint>>, Arc<MockEndpoint>) {
    let endpoint = Arc::new(MockEndpoint::new());
    let manager = Arc::new(SyncManager::new(
        SyncConfig::new().with_retry(retry),
        Arc::clone(sessions),
        Arc::clone(&endpoint),
        Arc::new(EventBus::new()),
        connectivity,
    ));
    (manager, endpoint)
}

fn two_field_session(session_id: &str, recipient_id: &str) -> Session {
    let mut session = Session::new(
        recipient_id,
        DocumentInfo {
            title: "Employment Agreement".into(),
            page_count: 3,
        },
    )
    .with_field(SignatureField {
        field_id: "sig-main".into(),
        page: 1,
        label: "Signature".into(),
        required: true,
    })
    .with_field(SignatureField {
        field_id: "initials-p3".into(),
        page: 3,
        label: "Initials".into(),
        required: true,
    });
    session.session_id = session_id.to_owned();
    session
}

fn sign_and_queue(sessions: &LocalSessionManager, session_id: &str, recipient_id: &str) {
    let mut signatures = SignatureMap::new();
    signatures.insert("sig-main".into(), "data:image/png;base64,AAAA".into());
    signatures.insert("initials-p3".into(), "data:image/png;base64,BBBB".into());
    sessions.save_signatures(session_id, &signatures).unwrap();
    sessions
        .queue_for_sync(&QueuedSubmission::new(
            session_id,
            recipient_id,
            signatures,
            "signing-key-abc",
        ))
        .unwrap();
}

#[tokio::test]
async fn offline_work_survives_restart_and_syncs() {
    let dir = TempDir::new().unwrap();

    // First process: work fully offline, then exit.
    {
        let sessions = open_sessions(&dir);
        sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
        sessions.cache_pdf_data("doc-1", b"%PDF-1.7 fake".to_vec()).unwrap();
        sign_and_queue(&sessions, "doc-1", "r1");
    }

    // Second process: everything is still there, and syncing drains it.
    let sessions = open_sessions(&dir);
    let session = sessions.get_session("doc-1").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert!(session.all_required_signed());
    assert_eq!(
        sessions.get_cached_pdf_data("doc-1").unwrap().unwrap(),
        b"%PDF-1.7 fake"
    );
    assert_eq!(sessions.queued_submissions().unwrap().len(), 1);

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));
    let report = manager.sync_now().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(endpoint.attempts("doc-1", "r1"), 1);
    assert!(sessions.queued_submissions().unwrap().is_empty());
    assert_eq!(
        sessions.get_session("doc-1").unwrap().unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn flaky_endpoint_drains_over_successive_passes() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(&sessions, "doc-1", "r1");

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));
    for _ in 0..3 {
        endpoint.script("doc-1", "r1", ScriptedResponse::ServerError(500));
    }

    // Three failing passes, then the fourth succeeds.
    for pass in 0..4 {
        let report = manager.sync_now().await.unwrap();
        if pass < 3 {
            assert_eq!(report.failed_retryable, 1);
            let errors = sessions.sync_errors().unwrap();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].attempt_count, pass + 1);
        } else {
            assert_eq!(report.delivered, 1);
        }
    }

    assert_eq!(endpoint.attempts("doc-1", "r1"), 4);
    assert!(sessions.queued_submissions().unwrap().is_empty());
    assert!(sessions.sync_errors().unwrap().is_empty());
    assert_eq!(
        sessions.get_session("doc-1").unwrap().unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn mixed_queue_partial_failure_leaves_only_the_failure() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    for id in ["doc-1", "doc-2", "doc-3"] {
        sessions.save_session(&two_field_session(id, "r1")).unwrap();
        sign_and_queue(&sessions, id, "r1");
    }

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));
    endpoint.script(
        "doc-2",
        "r1",
        ScriptedResponse::NetworkError,
    );

    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed_retryable, 1);

    let queued = sessions.queued_submissions().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].session_id, "doc-2");
    assert_eq!(
        sessions.get_session("doc-2").unwrap().unwrap().status,
        SessionStatus::InProgress
    );
}

#[tokio::test]
async fn newer_remote_wins_and_local_copy_is_dropped() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(&sessions, "doc-1", "r1");

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));
    endpoint.script(
        "doc-1",
        "r1",
        ScriptedResponse::Conflict(ConflictInfo {
            server_timestamp: now_millis() + 3_600_000,
            signatures: SignatureMap::new(),
        }),
    );

    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.conflicts_dropped, 1);
    assert_eq!(endpoint.attempts("doc-1", "r1"), 1);

    // Queue and errors are cleared; the local session keeps its state.
    assert!(sessions.queued_submissions().unwrap().is_empty());
    assert!(sessions.sync_errors().unwrap().is_empty());
    let session = sessions.get_session("doc-1").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.signatures.len(), 2);
}

#[tokio::test]
async fn stale_remote_merges_local_wins_and_delivers() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(&sessions, "doc-1", "r1");

    let mut remote = SignatureMap::new();
    remote.insert("sig-main".into(), "stale-remote".into());
    remote.insert("witness".into(), "remote-witness".into());

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));
    endpoint.script(
        "doc-1",
        "r1",
        ScriptedResponse::Conflict(ConflictInfo {
            server_timestamp: 1,
            signatures: remote,
        }),
    );

    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.conflicts_merged, 1);
    assert_eq!(endpoint.attempts("doc-1", "r1"), 2);

    // The merged map is persisted locally and was what got delivered.
    let session = sessions.get_session("doc-1").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(
        session.signatures.get("sig-main").unwrap(),
        "data:image/png;base64,AAAA"
    );
    assert_eq!(session.signatures.get("witness").unwrap(), "remote-witness");
}

#[tokio::test]
async fn exhausted_submission_parks_until_cleared() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(&sessions, "doc-1", "r1");

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(2));
    for _ in 0..2 {
        endpoint.script("doc-1", "r1", ScriptedResponse::ServerError(502));
    }

    manager.sync_now().await.unwrap();
    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.failed_terminal, 1);
    assert_eq!(endpoint.attempts("doc-1", "r1"), 2);

    // Parked: later passes make no network attempts, but nothing is lost.
    manager.sync_now().await.unwrap();
    assert_eq!(endpoint.attempts("doc-1", "r1"), 2);
    assert_eq!(sessions.queued_submissions().unwrap().len(), 1);
    assert_eq!(sessions.sync_errors().unwrap()[0].attempt_count, 2);

    // Clearing the error record alone does not reset the retry count;
    // the queue entry still carries it, so the item stays parked.
    sessions.clear_sync_error("doc-1", "r1").unwrap();
    manager.sync_now().await.unwrap();
    assert_eq!(endpoint.attempts("doc-1", "r1"), 2);
}

#[tokio::test]
async fn requeue_restores_the_retry_budget() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(&sessions, "doc-1", "r1");

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(3));
    for _ in 0..4 {
        endpoint.script("doc-1", "r1", ScriptedResponse::ServerError(500));
    }
    endpoint.script("doc-1", "r1", ScriptedResponse::Accept);

    for _ in 0..3 {
        manager.sync_now().await.unwrap();
    }
    manager.sync_now().await.unwrap();
    assert_eq!(endpoint.attempts("doc-1", "r1"), 3);

    // Signing again overwrites the parked entry with a fresh submission;
    // that alone restores automatic delivery with the full budget.
    sign_and_queue(&sessions, "doc-1", "r1");
    assert_eq!(sessions.queued_submissions().unwrap()[0].retry_count, 0);

    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.failed_retryable, 1);
    assert_eq!(sessions.sync_errors().unwrap()[0].attempt_count, 1);

    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(sessions.queued_submissions().unwrap().is_empty());
    assert!(sessions.sync_errors().unwrap().is_empty());
    assert_eq!(
        sessions.get_session("doc-1").unwrap().unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn explicit_offline_holds_the_queue() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(&sessions, "doc-1", "r1");

    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));

    manager.set_offline_mode(true).await.unwrap();
    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.skipped, Some(SkipReason::ExplicitOffline));
    assert_eq!(endpoint.total_attempts(), 0);

    // Clearing the flag while online delivers exactly once.
    manager.set_offline_mode(false).await.unwrap();
    assert_eq!(endpoint.attempts("doc-1", "r1"), 1);
    assert!(sessions.queued_submissions().unwrap().is_empty());
}

#[tokio::test]
async fn offline_mode_persists_across_restart() {
    let dir = TempDir::new().unwrap();
    {
        let sessions = open_sessions(&dir);
        sessions.set_offline_mode(true).unwrap();
    }

    let sessions = open_sessions(&dir);
    assert!(sessions.offline_mode().unwrap());

    sign_and_queue_fresh(&sessions);
    let connectivity = Connectivity::new(true);
    let (manager, endpoint) = build_manager(&sessions, &connectivity, RetryConfig::new(5));
    let report = manager.sync_now().await.unwrap();
    assert_eq!(report.skipped, Some(SkipReason::ExplicitOffline));
    assert_eq!(endpoint.total_attempts(), 0);
}

fn sign_and_queue_fresh(sessions: &LocalSessionManager) {
    sessions.save_session(&two_field_session("doc-1", "r1")).unwrap();
    sign_and_queue(sessions, "doc-1", "r1");
}
