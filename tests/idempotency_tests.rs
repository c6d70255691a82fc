use erm_service::config::IdempotencySettings;
use erm_service::error::AppError;
use erm_service::idempotency::{
    ExpirationSweeper, IdempotencyError, IdempotencyHandler, IdempotencyHandlerConfig,
    IdempotencyRecord, IdempotentResponse, InMemoryIdempotencyStore, DEFAULT_SWEEP_INTERVAL,
};
use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn handler() -> IdempotencyHandler<InMemoryIdempotencyStore> {
    IdempotencyHandler::new(InMemoryIdempotencyStore::new(), IdempotencyHandlerConfig::default())
}

#[tokio::test]
async fn test_replay_and_path_conflict_scenario() {
    let handler = handler();
    let executions = AtomicUsize::new(0);

    let first = handler
        .process_idempotent_request("k1", "/users", || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(IdempotentResponse::created(json!({"id": 1})))
        })
        .await
        .unwrap();
    assert_eq!(first.body, json!({"id": 1}));
    assert_eq!(first.status, StatusCode::CREATED);

    let replayed = handler
        .process_idempotent_request("k1", "/users", || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(IdempotentResponse::created(json!({"id": 2})))
        })
        .await
        .unwrap();
    assert_eq!(replayed, first);

    let conflict = handler
        .process_idempotent_request("k1", "/projects", || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(IdempotentResponse::created(json!({"id": 3})))
        })
        .await;
    match conflict {
        Err(IdempotencyError::KeyConflict { key, stored_path, requested_path }) => {
            assert_eq!(key, "k1");
            assert_eq!(stored_path, "/users");
            assert_eq!(requested_path, "/projects");
        }
        other => panic!("expected KeyConflict, got {:?}", other),
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    let snapshot = handler.metrics().snapshot();
    assert_eq!(snapshot.executed_requests, 1);
    assert_eq!(snapshot.replayed_requests, 1);
    assert_eq!(snapshot.key_conflicts, 1);
}

#[tokio::test]
async fn test_sequential_requests_execute_once() {
    let handler = handler();
    let executions = AtomicUsize::new(0);
    let mut responses = Vec::new();

    for attempt in 0..5 {
        let response = handler
            .process_idempotent_request("seq", "/users", || async {
                executions.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(IdempotentResponse::created(json!({"attempt": attempt})))
            })
            .await
            .unwrap();
        responses.push(response);
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(responses.iter().all(|r| r.body == json!({"attempt": 0})));
    assert!(responses.iter().all(|r| r.status == StatusCode::CREATED));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_execute_once() {
    let handler = Arc::new(handler());
    let executions = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let handler = Arc::clone(&handler);
        let executions = Arc::clone(&executions);
        tasks.push(tokio::spawn(async move {
            handler
                .process_idempotent_request("concurrent", "/users", move || async move {
                    let n = executions.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, AppError>(IdempotentResponse::created(json!({"id": n})))
                })
                .await
        }));
    }

    let mut bodies: Vec<Value> = Vec::new();
    for task in tasks {
        bodies.push(task.await.unwrap().unwrap().body);
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(bodies.iter().all(|b| *b == json!({"id": 1})));
    let snapshot = handler.metrics().snapshot();
    assert_eq!(snapshot.executed_requests, 1);
    assert_eq!(snapshot.replayed_requests, 15);
}

#[tokio::test]
async fn test_different_keys_do_not_block_each_other() {
    let handler = Arc::new(handler());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let blocked = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            handler
                .process_idempotent_request("slow", "/users", || async move {
                    release_rx.await.ok();
                    Ok::<_, AppError>(IdempotentResponse::created(json!("slow")))
                })
                .await
        })
    };
    tokio::task::yield_now().await;

    let fast = tokio::time::timeout(
        Duration::from_secs(1),
        handler.process_idempotent_request("fast", "/users", || async {
            Ok::<_, AppError>(IdempotentResponse::created(json!("fast")))
        }),
    )
    .await
    .expect("independent key was blocked")
    .unwrap();
    assert_eq!(fast.body, json!("fast"));

    release_tx.send(()).unwrap();
    assert_eq!(blocked.await.unwrap().unwrap().body, json!("slow"));
}

#[tokio::test]
async fn test_business_error_is_transparent_and_retry_executes() {
    let store = InMemoryIdempotencyStore::new();
    let handler = IdempotencyHandler::new(store.clone(), IdempotencyHandlerConfig::default());
    let executions = AtomicUsize::new(0);

    let failed = handler
        .process_idempotent_request("retry", "/users", || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Err::<IdempotentResponse<Value>, _>(AppError::DuplicateEmail(
                "Email already exists: test@sky.com".to_string(),
            ))
        })
        .await;
    match failed {
        Err(IdempotencyError::Operation(AppError::DuplicateEmail(msg))) => {
            assert_eq!(msg, "Email already exists: test@sky.com")
        }
        other => panic!("expected business error, got {:?}", other),
    }
    assert!(store.is_empty().await);

    let retried = handler
        .process_idempotent_request("retry", "/users", || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(IdempotentResponse::created(json!({"id": 5})))
        })
        .await
        .unwrap();

    assert_eq!(retried.body, json!({"id": 5}));
    assert_eq!(executions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_operation_leaves_no_record() {
    let store = InMemoryIdempotencyStore::new();
    let handler = IdempotencyHandler::new(store.clone(), IdempotencyHandlerConfig::default());

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        handler.process_idempotent_request("cancel", "/users", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(IdempotentResponse::created(json!("late")))
        }),
    )
    .await;
    assert!(cancelled.is_err());
    assert!(store.get("cancel").await.is_none());

    let retried = handler
        .process_idempotent_request("cancel", "/users", || async {
            Ok::<_, AppError>(IdempotentResponse::created(json!("retried")))
        })
        .await
        .unwrap();
    assert_eq!(retried.body, json!("retried"));
}

#[tokio::test]
async fn test_expired_records_are_swept_and_key_is_fresh_again() {
    let store = InMemoryIdempotencyStore::new();
    let stale = IdempotencyRecord::new_at(
        "expired",
        "/users",
        "{\"id\":1}".to_string(),
        201,
        ChronoDuration::hours(24),
        Utc::now() - ChronoDuration::hours(25),
    );
    store.put(stale).await;

    let handler = Arc::new(IdempotencyHandler::new(store.clone(), IdempotencyHandlerConfig::default()));

    // Logically absent before the sweep runs: a different path is not a conflict.
    let fresh = handler
        .process_idempotent_request("expired", "/projects", || async {
            Ok::<_, AppError>(IdempotentResponse::created(json!({"id": 2})))
        })
        .await
        .unwrap();
    assert_eq!(fresh.body, json!({"id": 2}));
    assert_eq!(store.get("expired").await.unwrap().path, "/projects");

    store
        .put(IdempotencyRecord::new_at(
            "expired-2",
            "/users",
            "null".to_string(),
            200,
            ChronoDuration::seconds(1),
            Utc::now() - ChronoDuration::minutes(1),
        ))
        .await;

    let sweeper = ExpirationSweeper::new(Arc::clone(&handler), DEFAULT_SWEEP_INTERVAL);
    assert_eq!(sweeper.run_once().await.unwrap(), 1);
    assert!(store.get("expired-2").await.is_none());
    assert!(store.get("expired").await.is_some());
}

#[tokio::test]
async fn test_transactional_variant_follows_same_protocol() {
    let handler = handler();
    let executions = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let executions = Arc::clone(&executions);
        let response = handler
            .process_in_transaction("tx-key", "/users/1", move |_tx| {
                Box::pin(async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AppError>(IdempotentResponse::ok(json!({"name": "tarek"})))
                })
            })
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let conflict = handler
        .process_in_transaction("tx-key", "/users/2", |_tx| {
            Box::pin(async { Ok::<_, AppError>(IdempotentResponse::ok(json!(null))) })
        })
        .await;
    assert!(conflict.unwrap_err().is_key_conflict());
}

#[tokio::test]
async fn test_shortest_accepted_ttl_still_replays() {
    let settings = IdempotencySettings {
        ttl_hours: 1,
        ..IdempotencySettings::default()
    };
    let handler = IdempotencyHandler::new(InMemoryIdempotencyStore::new(), settings.handler_config().unwrap());
    let executions = AtomicUsize::new(0);

    for _ in 0..2 {
        let response = handler
            .process_idempotent_request("short-ttl", "/users", || async {
                executions.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(IdempotentResponse::created(json!({"id": 1})))
            })
            .await
            .unwrap();
        assert_eq!(response.body, json!({"id": 1}));
    }
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let zero_ttl = IdempotencySettings {
        ttl_hours: 0,
        ..IdempotencySettings::default()
    };
    assert!(zero_ttl.handler_config().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transactional_requests_execute_once() {
    let store = InMemoryIdempotencyStore::new();
    let handler = Arc::new(IdempotencyHandler::new(store.clone(), IdempotencyHandlerConfig::default()));
    let executions = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let handler = Arc::clone(&handler);
        let executions = Arc::clone(&executions);
        tasks.push(tokio::spawn(async move {
            handler
                .process_in_transaction("tx-concurrent", "/users", move |_tx| {
                    Box::pin(async move {
                        let n = executions.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, AppError>(IdempotentResponse::created(json!({"id": n})))
                    })
                })
                .await
        }));
    }

    let mut bodies: Vec<Value> = Vec::new();
    for task in tasks {
        bodies.push(task.await.unwrap().unwrap().body);
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(bodies.iter().all(|b| *b == json!({"id": 1})));
    assert_eq!(store.len().await, 1);
    let snapshot = handler.metrics().snapshot();
    assert_eq!(snapshot.executed_requests, 1);
    assert_eq!(snapshot.replayed_requests, 15);
}

#[tokio::test]
async fn test_response_body_round_trips_through_store() {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Created {
        id: i64,
        email: String,
        projects: Vec<String>,
        note: Option<String>,
    }

    let handler = handler();
    let body = Created {
        id: 42,
        email: "ünïcode@sky.com".to_string(),
        projects: vec!["p-1".to_string(), "p \"quoted\"".to_string()],
        note: None,
    };

    let expected = body.clone();
    handler
        .process_idempotent_request("round-trip", "/users", || async move {
            Ok::<_, AppError>(IdempotentResponse::created(body))
        })
        .await
        .unwrap();

    let replayed = handler
        .process_idempotent_request("round-trip", "/users", || async {
            Err::<IdempotentResponse<Created>, _>(AppError::Validation("must not run".to_string()))
        })
        .await
        .unwrap();

    assert_eq!(replayed.body, expected);
    assert_eq!(replayed.status, StatusCode::CREATED);
}
