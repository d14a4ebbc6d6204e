use super::test_helpers::{MockTransport, fast_config};
use super::*;
use crate::error::{Error, TransferError, WriteError};
use crate::integrity::Checksum;
use crate::types::{FetchStatus, Priority};
use std::path::Path;
use std::time::Duration;

fn manager(transport: &Arc<MockTransport>) -> FetchManager {
    FetchManager::new(Arc::clone(transport) as Arc<dyn Transport>)
}

fn connection_reset() -> std::result::Result<Vec<u8>, TransferError> {
    Err(TransferError::Connection("connection reset".into()))
}

#[tokio::test]
async fn invalid_requests_fail_validation_in_place() {
    let transport = Arc::new(MockTransport::new());
    let batch = vec![
        ResourceRequest::to_buffer("https://example.com/a"),
        ResourceRequest::to_buffer("   "),
        ResourceRequest::to_path("https://example.com/b", ""),
        ResourceRequest::to_buffer("http://[::1"),
        ResourceRequest::to_buffer("https://example.com/c"),
    ];

    let outcomes = manager(&transport)
        .submit(batch, &fast_config(3))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 5);
    for index in [1, 2, 3] {
        assert_eq!(
            outcomes[index].status,
            FetchStatus::Failed(FailureKind::Validation),
            "request {index}"
        );
        assert_eq!(outcomes[index].attempts, 0);
    }
    assert_eq!(outcomes[0].content.as_deref(), Some(&b"https://example.com/a"[..]));
    assert_eq!(outcomes[4].locator, "https://example.com/c");
    assert_eq!(transport.fetches(), 2, "invalid requests never reach the transport");
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_work() {
    let transport = Arc::new(MockTransport::new());
    let config = FetchConfig {
        max_concurrency: 0,
        ..fast_config(3)
    };

    let result = manager(&transport)
        .submit(vec![ResourceRequest::to_buffer("https://example.com/a")], &config)
        .await;

    assert!(matches!(result, Err(Error::Config { .. })));
    assert_eq!(transport.fetches(), 0);
}

#[tokio::test]
async fn duplicates_within_a_batch_share_one_outcome() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(20)));
    let batch = vec![
        ResourceRequest::to_buffer("https://example.com/data.json"),
        ResourceRequest::to_buffer("HTTPS://Example.COM/data.json#top"),
        ResourceRequest::to_buffer("https://example.com/other"),
        ResourceRequest::to_buffer(" https://example.com/data.json "),
    ];

    let outcomes = manager(&transport)
        .submit(batch, &fast_config(3))
        .await
        .unwrap();

    assert_eq!(transport.fetches(), 2);
    assert!(Arc::ptr_eq(&outcomes[0], &outcomes[1]));
    assert!(Arc::ptr_eq(&outcomes[0], &outcomes[3]));
    assert!(!Arc::ptr_eq(&outcomes[0], &outcomes[2]));
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let transport = Arc::new(MockTransport::new());
    transport.script(
        "https://example.com/flaky",
        vec![connection_reset(), connection_reset(), Ok(b"finally".to_vec())],
    );

    let outcomes = manager(&transport)
        .submit(
            vec![ResourceRequest::to_buffer("https://example.com/flaky")],
            &fast_config(3),
        )
        .await
        .unwrap();

    let outcome = &outcomes[0];
    assert_eq!(outcome.status, FetchStatus::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.content.as_deref(), Some(&b"finally"[..]));
    assert!(outcome
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("connection reset")));
}

#[tokio::test]
async fn permanent_failure_stops_immediately() {
    let transport = Arc::new(MockTransport::new());
    transport.script(
        "https://example.com/gone",
        vec![Err(TransferError::NotFound("https://example.com/gone".into()))],
    );

    let outcomes = manager(&transport)
        .submit(
            vec![ResourceRequest::to_buffer("https://example.com/gone")],
            &fast_config(5),
        )
        .await
        .unwrap();

    assert_eq!(
        outcomes[0].status,
        FetchStatus::Failed(FailureKind::PermanentFailure)
    );
    assert_eq!(outcomes[0].attempts, 1);
    assert_eq!(transport.fetches(), 1);
}

#[tokio::test]
async fn file_destination_is_written_only_after_verification() {
    let transport = Arc::new(MockTransport::new());
    transport.script("https://example.com/a", vec![Ok(b"payload".to_vec())]);
    transport.script("https://example.com/b", vec![Ok(b"tampered".to_vec())]);

    let batch = vec![
        ResourceRequest::to_path("https://example.com/a", "/out/a")
            .with_checksum(Checksum::sha256_of(b"payload")),
        ResourceRequest::to_path("https://example.com/b", "/out/b")
            .with_checksum(Checksum::sha256_of(b"payload")),
    ];
    let outcomes = manager(&transport)
        .submit(batch, &fast_config(3))
        .await
        .unwrap();

    assert_eq!(outcomes[0].status, FetchStatus::Succeeded);
    assert_eq!(outcomes[0].bytes, Some(7));
    assert!(outcomes[0].content.is_none(), "file destinations keep no buffer");
    assert_eq!(transport.written(Path::new("/out/a")).unwrap(), b"payload");

    assert_eq!(outcomes[1].status, FetchStatus::Failed(FailureKind::Integrity));
    assert_eq!(outcomes[1].attempts, 1);
    assert!(transport.written(Path::new("/out/b")).is_none());
}

#[tokio::test]
async fn transient_write_errors_count_as_attempts() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_write(WriteError::Transient {
        path: "/out/a".into(),
        reason: "device busy".into(),
    });

    let outcomes = manager(&transport)
        .submit(
            vec![ResourceRequest::to_path("https://example.com/a", "/out/a")],
            &fast_config(3),
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].status, FetchStatus::Succeeded);
    assert_eq!(outcomes[0].attempts, 2);
    assert_eq!(transport.fetches(), 2);
}

#[tokio::test]
async fn rejected_writes_fail_permanently() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_write(WriteError::Rejected {
        path: "/readonly/a".into(),
        reason: "permission denied".into(),
    });

    let outcomes = manager(&transport)
        .submit(
            vec![ResourceRequest::to_path("https://example.com/a", "/readonly/a")],
            &fast_config(3),
        )
        .await
        .unwrap();

    assert_eq!(
        outcomes[0].status,
        FetchStatus::Failed(FailureKind::PermanentFailure)
    );
    assert_eq!(outcomes[0].attempts, 1);
}

#[tokio::test]
async fn verified_existing_destination_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("cached.bin");
    std::fs::write(&dest, b"cached").unwrap();

    let transport = Arc::new(MockTransport::new());
    let request = ResourceRequest::to_path("https://example.com/cached", &dest)
        .with_checksum(Checksum::sha256_of(b"cached"));

    let outcomes = manager(&transport)
        .submit(vec![request.clone()], &fast_config(3))
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, FetchStatus::SkippedDuplicate);
    assert_eq!(outcomes[0].attempts, 0);
    assert_eq!(transport.fetches(), 0);

    let config = FetchConfig {
        skip_verified_existing: false,
        ..fast_config(3)
    };
    transport.script("https://example.com/cached", vec![Ok(b"cached".to_vec())]);
    let outcomes = manager(&transport)
        .submit(vec![request], &config)
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, FetchStatus::Succeeded);
    assert_eq!(transport.fetches(), 1);
}

#[tokio::test]
async fn slow_attempts_time_out_and_are_retried() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(200)));
    let config = FetchConfig {
        attempt_timeout: Duration::from_millis(20),
        ..fast_config(2)
    };

    let outcomes = manager(&transport)
        .submit(vec![ResourceRequest::to_buffer("https://example.com/slow")], &config)
        .await
        .unwrap();

    assert_eq!(
        outcomes[0].status,
        FetchStatus::Failed(FailureKind::TransientFailureExhausted)
    );
    assert_eq!(outcomes[0].attempts, 2);
    assert!(outcomes[0]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));
}

#[tokio::test]
async fn higher_priority_requests_are_admitted_first() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(5)));
    let config = FetchConfig {
        max_concurrency: 1,
        ..fast_config(1)
    };
    let batch = vec![
        ResourceRequest::to_buffer("https://example.com/low").with_priority(Priority::Low),
        ResourceRequest::to_buffer("https://example.com/normal-1"),
        ResourceRequest::to_buffer("https://example.com/high").with_priority(Priority::High),
        ResourceRequest::to_buffer("https://example.com/normal-2"),
    ];

    manager(&transport).submit(batch, &config).await.unwrap();

    assert_eq!(
        transport.fetch_order(),
        vec![
            "https://example.com/high",
            "https://example.com/normal-1",
            "https://example.com/normal-2",
            "https://example.com/low",
        ]
    );
}

#[tokio::test]
async fn batch_timeout_cancels_outstanding_requests() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_secs(5)));
    let config = FetchConfig {
        max_concurrency: 1,
        batch_timeout: Some(Duration::from_millis(50)),
        ..fast_config(3)
    };
    let batch = (0..3)
        .map(|i| ResourceRequest::to_buffer(format!("https://example.com/{i}")))
        .collect();

    let started = Instant::now();
    let outcomes = manager(&transport).submit(batch, &config).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    for outcome in &outcomes {
        assert_eq!(outcome.status, FetchStatus::Failed(FailureKind::Cancelled));
    }
    assert_eq!(outcomes[0].attempts, 1, "the first request was mid-fetch");
    assert_eq!(outcomes[2].attempts, 0);
}

#[tokio::test]
async fn events_trace_the_retry_sequence() {
    let transport = Arc::new(MockTransport::new());
    transport.script(
        "https://example.com/flaky",
        vec![connection_reset(), Ok(b"ok".to_vec())],
    );
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    manager
        .submit(
            vec![ResourceRequest::to_buffer("https://example.com/flaky")],
            &fast_config(3),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen[0], Event::AttemptStarted { attempt: 1, .. }));
    assert!(matches!(
        seen[1],
        Event::AttemptFailed {
            attempt: 1,
            retry_in_ms: Some(_),
            ..
        }
    ));
    assert!(matches!(seen[2], Event::AttemptStarted { attempt: 2, .. }));
    assert!(matches!(
        seen[3],
        Event::RequestSucceeded { attempts: 2, bytes: 2, .. }
    ));
    assert_eq!(seen.len(), 4);
}

#[tokio::test]
async fn final_failed_attempt_reports_no_retry() {
    let transport = Arc::new(MockTransport::new());
    transport.script(
        "https://example.com/down",
        vec![connection_reset(), connection_reset()],
    );
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    manager
        .submit(
            vec![ResourceRequest::to_buffer("https://example.com/down")],
            &fast_config(2),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(
        seen[seen.len() - 2],
        Event::AttemptFailed {
            attempt: 2,
            retry_in_ms: None,
            ..
        }
    ));
    assert!(matches!(
        seen[seen.len() - 1],
        Event::RequestFailed {
            kind: FailureKind::TransientFailureExhausted,
            attempts: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn managers_sharing_a_registry_retrieve_once() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(50)));
    let set = InFlightSet::new();
    let a = FetchManager::with_in_flight(Arc::clone(&transport) as Arc<dyn Transport>, set.clone());
    let b = FetchManager::with_in_flight(Arc::clone(&transport) as Arc<dyn Transport>, set.clone());
    let config = fast_config(3);

    let (left, right) = tokio::join!(
        a.submit(vec![ResourceRequest::to_buffer("https://example.com/shared")], &config),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            b.submit(vec![ResourceRequest::to_buffer("https://example.com/shared")], &config)
                .await
        }
    );

    assert_eq!(transport.fetches(), 1);
    assert!(Arc::ptr_eq(&left.unwrap()[0], &right.unwrap()[0]));
    assert!(set.is_empty());
}

#[tokio::test]
async fn follower_of_another_batch_honors_its_own_cancellation() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(300)));
    let set = InFlightSet::new();
    let a = FetchManager::with_in_flight(Arc::clone(&transport) as Arc<dyn Transport>, set.clone());
    let b = FetchManager::with_in_flight(Arc::clone(&transport) as Arc<dyn Transport>, set);
    let config = fast_config(1);
    let cancel = CancellationToken::new();

    let (left, right) = tokio::join!(
        a.submit(vec![ResourceRequest::to_buffer("https://example.com/slow")], &config),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                trigger.cancel();
            });
            b.submit_with_cancel(
                vec![ResourceRequest::to_buffer("https://example.com/slow")],
                &config,
                cancel.clone(),
            )
            .await
        }
    );

    assert_eq!(left.unwrap()[0].status, FetchStatus::Succeeded);
    assert_eq!(
        right.unwrap()[0].status,
        FetchStatus::Failed(FailureKind::Cancelled)
    );
    assert_eq!(transport.fetches(), 1);
}

#[tokio::test]
async fn registry_is_empty_after_every_batch() {
    let transport = Arc::new(MockTransport::new());
    transport.script(
        "https://example.com/bad",
        vec![Err(TransferError::Denied("no".into()))],
    );
    let manager = manager(&transport);
    let batch = vec![
        ResourceRequest::to_buffer("https://example.com/good"),
        ResourceRequest::to_buffer("https://example.com/bad"),
    ];

    manager.submit(batch, &fast_config(3)).await.unwrap();
    assert!(manager.in_flight().is_empty());
}

#[tokio::test]
async fn followers_with_other_destinations_get_the_shared_content() {
    let transport = Arc::new(MockTransport::new());
    let locator = "https://example.com/shared.txt";
    let batch = vec![
        ResourceRequest::to_path(locator, "/out/a.txt"),
        ResourceRequest::to_path(locator, "/out/b.txt"),
        ResourceRequest::to_buffer(locator),
        ResourceRequest::to_path(format!("{locator}#again"), "/out/a.txt"),
    ];

    let outcomes = manager(&transport)
        .submit(batch, &fast_config(3))
        .await
        .unwrap();

    assert_eq!(transport.fetches(), 1, "one retrieval serves every position");
    assert!(outcomes.iter().all(|o| o.status == FetchStatus::Succeeded));
    assert_eq!(transport.written(Path::new("/out/a.txt")).unwrap(), locator.as_bytes());
    assert_eq!(transport.written(Path::new("/out/b.txt")).unwrap(), locator.as_bytes());

    assert_eq!(outcomes[1].destination, Destination::Path("/out/b.txt".into()));
    assert_eq!(outcomes[2].destination, Destination::Buffer);
    assert_eq!(outcomes[2].content.as_deref(), Some(locator.as_bytes()));
    assert_eq!(outcomes[0].content, None);

    assert!(Arc::ptr_eq(&outcomes[0], &outcomes[3]), "same destination shares the instance");
    assert!(!Arc::ptr_eq(&outcomes[0], &outcomes[1]));
}

#[tokio::test]
async fn follower_integrity_hint_is_checked_against_the_shared_content() {
    let transport = Arc::new(MockTransport::new());
    transport.script("https://example.com/blob", vec![Ok(b"actual".to_vec())]);
    let batch = vec![
        ResourceRequest::to_buffer("https://example.com/blob"),
        ResourceRequest::to_path("https://example.com/blob", "/out/blob")
            .with_checksum(Checksum::sha256_of(b"expected")),
    ];

    let outcomes = manager(&transport)
        .submit(batch, &fast_config(3))
        .await
        .unwrap();

    assert_eq!(outcomes[0].status, FetchStatus::Succeeded);
    assert_eq!(outcomes[1].status, FetchStatus::Failed(FailureKind::Integrity));
    assert!(transport.written(Path::new("/out/blob")).is_none());
}

#[tokio::test]
async fn follower_of_a_skipped_leader_copies_the_verified_file() {
    let dir = tempfile::tempdir().unwrap();
    let cached = dir.path().join("cached.bin");
    std::fs::write(&cached, b"cached").unwrap();
    let checksum = Checksum::sha256_of(b"cached");

    let transport = Arc::new(MockTransport::new());
    let batch = vec![
        ResourceRequest::to_path("https://example.com/c", &cached).with_checksum(checksum.clone()),
        ResourceRequest::to_path("https://example.com/c", "/out/copy.bin").with_checksum(checksum),
    ];

    let outcomes = manager(&transport)
        .submit(batch, &fast_config(3))
        .await
        .unwrap();

    assert_eq!(transport.fetches(), 0);
    assert_eq!(outcomes[0].status, FetchStatus::SkippedDuplicate);
    assert_eq!(outcomes[1].status, FetchStatus::Succeeded);
    assert_eq!(transport.written(Path::new("/out/copy.bin")).unwrap(), b"cached");
}

#[tokio::test]
async fn live_batch_takes_over_when_the_leading_batch_is_cancelled() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(300)));
    let set = InFlightSet::new();
    let a = FetchManager::with_in_flight(Arc::clone(&transport) as Arc<dyn Transport>, set.clone());
    let b = FetchManager::with_in_flight(Arc::clone(&transport) as Arc<dyn Transport>, set.clone());
    let config = fast_config(1);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let (left, right) = tokio::join!(
        a.submit_with_cancel(
            vec![ResourceRequest::to_buffer("https://example.com/slow")],
            &config,
            cancel.clone(),
        ),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            b.submit(vec![ResourceRequest::to_buffer("https://example.com/slow")], &config)
                .await
        }
    );

    let (left, right) = (left.unwrap(), right.unwrap());
    assert_eq!(left[0].status, FetchStatus::Failed(FailureKind::Cancelled));
    assert_eq!(right[0].status, FetchStatus::Succeeded);
    assert_eq!(right[0].attempts, 1);
    assert_eq!(right[0].content.as_deref(), Some(&b"https://example.com/slow"[..]));
    assert_eq!(transport.fetches(), 2, "the live batch retrieves on its own");
    assert!(set.is_empty());
}
