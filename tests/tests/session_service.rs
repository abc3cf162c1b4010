//! Direct tests of `SessionService` against the mock launcher.
//!
//! These cover supervision and persistence paths that are awkward to
//! reach over HTTP.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_core::{validation::validate_target, Error, OpenRequest, SessionLimits};
use integration_tests::{
    mocks::{FailingStore, MockLauncher},
    setup::eventually,
};
use launcher::ProcessExit;
use metadata_store::{FileStore, MemoryStore, MetadataStore};
use session::{SessionConfig, SessionService};

fn request(user: &str, host: &str) -> OpenRequest {
    OpenRequest {
        target: validate_target(user, host, 0).unwrap(),
        command: None,
        env: BTreeMap::new(),
        limits: SessionLimits::default(),
    }
}

fn service(config: SessionConfig) -> (Arc<MockLauncher>, Arc<MemoryStore>, SessionService) {
    let launcher = Arc::new(MockLauncher::new());
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionService::with_config(launcher.clone(), store.clone(), config);
    (launcher, store, sessions)
}

#[tokio::test]
async fn test_open_persists_connected_record() {
    let (_, store, sessions) = service(SessionConfig::default());
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();

    let stored = store.lookup(&opened.metadata.session_id).await.unwrap().unwrap();
    assert!(stored.connected);
    assert_eq!(stored.port, 22);
    assert_ne!(stored.token_hash.as_deref(), Some(opened.resume_token.as_str()));
    assert_eq!(sessions.live_count(), 1);
}

#[tokio::test]
async fn test_invalid_request_never_launches() {
    let (launcher, _, sessions) = service(SessionConfig::default());

    let mut req = request("alice", "example.com");
    req.command = Some("id".into());
    assert!(matches!(sessions.open(req).await, Err(Error::InvalidRequest(_))));

    let mut req = request("alice", "example.com");
    req.env.insert("PATH".into(), "/tmp".into());
    assert!(matches!(sessions.open(req).await, Err(Error::InvalidRequest(_))));

    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_capacity_is_released_after_close() {
    let (launcher, _, sessions) = service(SessionConfig {
        max_sessions: 1,
        ..Default::default()
    });

    let first = sessions.open(request("alice", "example.com")).await.unwrap();
    let err = sessions.open(request("bob", "example.com")).await.unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded));
    assert_eq!(launcher.launch_count(), 1);

    sessions
        .close(&first.metadata.session_id, &first.resume_token)
        .await
        .unwrap();
    sessions.open(request("bob", "example.com")).await.unwrap();
}

#[tokio::test]
async fn test_failed_launch_releases_capacity() {
    let (launcher, _, sessions) = service(SessionConfig {
        max_sessions: 1,
        ..Default::default()
    });

    launcher.set_failure(std::io::ErrorKind::ConnectionRefused, "connection refused");
    let err = sessions.open(request("alice", "example.com")).await.unwrap_err();
    assert_eq!(err.code(), "LAUNCH_001");

    launcher.clear_failure();
    sessions.open(request("alice", "example.com")).await.unwrap();
}

#[tokio::test]
async fn test_close_is_not_repeatable() {
    let (launcher, store, sessions) = service(SessionConfig::default());
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();
    let id = opened.metadata.session_id.clone();

    sessions.close(&id, &opened.resume_token).await.unwrap();
    let err = sessions.close(&id, &opened.resume_token).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound));

    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);
    let stored = store.lookup(&id).await.unwrap().unwrap();
    assert!(!stored.connected);
    assert!(stored.token_hash.is_none());
}

#[tokio::test]
async fn test_foreign_token_is_unauthorized() {
    let (launcher, _, sessions) = service(SessionConfig::default());
    let first = sessions.open(request("alice", "example.com")).await.unwrap();
    let second = sessions.open(request("bob", "example.com")).await.unwrap();

    let err = sessions
        .write_stdin(&first.metadata.session_id, &second.resume_token, b"id\n")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized));

    let err = sessions
        .close(&first.metadata.session_id, "garbage")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized));

    let err = sessions
        .close(&"0".repeat(32), "garbage")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound));

    assert!(launcher.processes()[0].written().is_empty());
    assert_eq!(sessions.live_count(), 2);
}

#[tokio::test]
async fn test_idle_session_expires_on_access() {
    let (launcher, store, sessions) = service(SessionConfig {
        idle_timeout_secs: 0,
        ..Default::default()
    });
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = sessions
        .resize(&opened.metadata.session_id, &opened.resume_token, 80, 24)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
    assert_eq!(sessions.live_count(), 0);
    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);

    let stored = store.lookup(&opened.metadata.session_id).await.unwrap().unwrap();
    assert!(!stored.connected);

    assert!(stored.token_hash.is_some());

    // The stored record still answers for the token, and stays expired
    for _ in 0..2 {
        let err = sessions.resume(&opened.resume_token).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
    }
}

#[tokio::test]
async fn test_resume_of_expired_session() {
    let (launcher, _, sessions) = service(SessionConfig {
        session_ttl_secs: 0,
        ..Default::default()
    });
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();

    let err = sessions.resume(&opened.resume_token).await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);

    // Second attempt is answered from the store
    let err = sessions.resume(&opened.resume_token).await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);
}

#[tokio::test]
async fn test_process_exit_is_observed() {
    let (launcher, store, sessions) = service(SessionConfig::default());
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();
    let id = opened.metadata.session_id.clone();

    launcher
        .last_process()
        .unwrap()
        .exit(ProcessExit::Failed("exit status 1".into()));

    let watched = sessions.clone();
    assert!(eventually(|| watched.live_count() == 0).await);

    let mut closed = false;
    for _ in 0..200 {
        let stored = store.lookup(&id).await.unwrap().unwrap();
        if !stored.connected {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(closed, "Exited session should be persisted as disconnected");

    let meta = sessions.resume(&opened.resume_token).await.unwrap();
    assert_eq!(meta.session_id, id);
    assert!(!meta.connected);

    let err = sessions
        .write_stdin(&id, &opened.resume_token, b"ls\n")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound));
}

#[tokio::test(start_paused = true)]
async fn test_max_duration_closes_session() {
    let (launcher, _, sessions) = service(SessionConfig::default());
    let mut req = request("alice", "example.com");
    req.limits.max_duration_seconds = Some(30);
    sessions.open(req).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    let watched = sessions.clone();
    assert!(eventually(|| watched.live_count() == 0).await);
    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);
}

#[tokio::test]
async fn test_persistence_failure_closes_new_process() {
    let launcher = Arc::new(MockLauncher::new());
    let store = Arc::new(FailingStore::new());
    let sessions =
        SessionService::with_config(launcher.clone(), store.clone(), SessionConfig::default());

    store.set_should_fail(true);
    let err = sessions.open(request("alice", "example.com")).await.unwrap_err();
    assert!(matches!(err, Error::PersistenceFailed(_)));
    assert_eq!(sessions.live_count(), 0);
    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);
    assert!(store.upsert_attempts() >= 1);

    store.set_should_fail(false);
    sessions.open(request("alice", "example.com")).await.unwrap();
    assert_eq!(sessions.live_count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_everything_and_refuses_opens() {
    let (launcher, store, sessions) = service(SessionConfig::default());
    let a = sessions.open(request("alice", "example.com")).await.unwrap();
    let b = sessions.open(request("bob", "example.org")).await.unwrap();

    sessions.shutdown().await;

    assert_eq!(sessions.live_count(), 0);
    for process in launcher.processes() {
        assert_eq!(process.close_calls(), 1);
    }
    for id in [&a.metadata.session_id, &b.metadata.session_id] {
        assert!(!store.lookup(id).await.unwrap().unwrap().connected);
    }

    let err = sessions.open(request("carol", "example.com")).await.unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded));
    assert_eq!(launcher.launch_count(), 2);
}

/// A restart leaves no process behind; resume still finds the record
#[tokio::test]
async fn test_resume_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let config = SessionConfig {
        token_secret: Some("test-secret".into()),
        ..Default::default()
    };

    let opened = {
        let store: Arc<dyn MetadataStore> = Arc::new(FileStore::open(&path).await.unwrap());
        let sessions =
            SessionService::with_config(Arc::new(MockLauncher::new()), store, config.clone());
        sessions.open(request("alice", "example.com")).await.unwrap()
    };

    let store: Arc<dyn MetadataStore> = Arc::new(FileStore::open(&path).await.unwrap());
    let sessions = SessionService::with_config(Arc::new(MockLauncher::new()), store.clone(), config);
    assert_eq!(sessions.recover().await.unwrap(), 1);
    assert_eq!(sessions.recover().await.unwrap(), 0);

    let meta = sessions.resume(&opened.resume_token).await.unwrap();
    assert_eq!(meta.session_id, opened.metadata.session_id);
    assert!(!meta.connected);
    assert!(meta.last_seen_at >= opened.metadata.last_seen_at);

    // No live process, so terminal operations find nothing
    let err = sessions
        .write_stdin(&meta.session_id, &opened.resume_token, b"ls\n")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound));
}

/// Interleaved opens and closes from many tasks leave the maps in step
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_open_close_keeps_registry_consistent() {
    let (launcher, _, sessions) = service(SessionConfig {
        max_sessions: 128,
        ..Default::default()
    });

    let tasks: Vec<_> = (0..16)
        .map(|task| {
            let sessions = sessions.clone();
            tokio::spawn(async move {
                let mut kept = Vec::new();
                let mut closed = Vec::new();
                for n in 0..4 {
                    let user = format!("user{}x{}", task, n);
                    let opened = sessions.open(request(&user, "example.com")).await.unwrap();
                    let id = opened.metadata.session_id;
                    if n % 2 == 0 {
                        sessions.close(&id, &opened.resume_token).await.unwrap();
                        closed.push((id, opened.resume_token));
                    } else {
                        kept.push((id, opened.resume_token));
                    }
                }
                (kept, closed)
            })
        })
        .collect();

    let mut kept = Vec::new();
    let mut closed = Vec::new();
    for task in tasks {
        let (k, c) = task.await.unwrap();
        kept.extend(k);
        closed.extend(c);
    }

    assert_eq!(launcher.launch_count(), 64);
    assert_eq!(sessions.live_count(), kept.len());

    let mut ids: Vec<_> = kept.iter().chain(&closed).map(|(id, _)| id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 64, "Session ids are unique");

    for (id, token) in &kept {
        let meta = sessions.resume(token).await.unwrap();
        assert_eq!(&meta.session_id, id);
        assert!(meta.connected);
    }
    for (id, token) in &closed {
        let err = sessions.resume(token).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound), "{} still resolves", id);
    }

    // A live token never authorizes another live session
    for pair in kept.windows(2) {
        let (first_id, first_token) = &pair[0];
        let (second_id, second_token) = &pair[1];
        let err = sessions
            .write_stdin(second_id, first_token, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
        let err = sessions
            .write_stdin(first_id, second_token, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    let closed_processes = launcher
        .processes()
        .iter()
        .filter(|p| p.close_calls() > 0)
        .count();
    assert_eq!(closed_processes, closed.len());
}

/// Racing closes of one session tear it down once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_closes_tear_down_once() {
    let (launcher, _, sessions) = service(SessionConfig::default());
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();
    let id = opened.metadata.session_id.clone();

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let sessions = sessions.clone();
            let id = id.clone();
            let token = opened.resume_token.clone();
            tokio::spawn(async move { sessions.close(&id, &token).await })
        })
        .collect();

    let mut succeeded = 0;
    for racer in racers {
        match racer.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(e) => assert!(matches!(e, Error::SessionNotFound), "unexpected {:?}", e),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(launcher.last_process().unwrap().close_calls(), 1);
    assert_eq!(sessions.live_count(), 0);
}

/// A process that will not die still leaves the session closed
#[tokio::test]
async fn test_close_survives_process_close_failure() {
    let (launcher, store, sessions) = service(SessionConfig::default());
    let opened = sessions.open(request("alice", "example.com")).await.unwrap();
    let process = launcher.last_process().unwrap();
    process.set_close_failure(true);

    sessions
        .close(&opened.metadata.session_id, &opened.resume_token)
        .await
        .unwrap();
    assert_eq!(process.close_calls(), 1);
    assert_eq!(sessions.live_count(), 0);

    let stored = store.lookup(&opened.metadata.session_id).await.unwrap().unwrap();
    assert!(!stored.connected);
    assert!(stored.token_hash.is_none());
}

/// Shutdown records every session as resumable even when a close fails
#[tokio::test]
async fn test_shutdown_with_stuck_process_keeps_records_resumable() {
    let (launcher, store, sessions) = service(SessionConfig::default());
    let stuck = sessions.open(request("alice", "example.com")).await.unwrap();
    launcher.last_process().unwrap().set_close_failure(true);
    let clean = sessions.open(request("bob", "example.org")).await.unwrap();

    sessions.shutdown().await;

    for opened in [&stuck, &clean] {
        let stored = store.lookup(&opened.metadata.session_id).await.unwrap().unwrap();
        assert!(!stored.connected);
        assert!(stored.token_hash.is_some());
    }
    let meta = sessions.resume(&stuck.resume_token).await.unwrap();
    assert_eq!(meta.session_id, stuck.metadata.session_id);
}
