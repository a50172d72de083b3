//! Reply lifetime tests: idle reaping, exactly-once completion and
//! shutdown of a client with queries in flight

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use futures::future::join_all;
use scopes::CompletionStatus;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_reply_is_reaped() {
    let bed = TestBed::start_with(|b| b.reap_interval_secs(1).reap_expiry_secs(1)).await;

    let (listener, _ctrl) = bed.search("idle", 0).await;
    assert!(wait_for(WAIT, || listener.result_count() == 1).await);

    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Error);
    assert_eq!(
        details.message,
        format!(
            "No activity on ReplyObject for scope {}: ReplyObject destroyed",
            SCOPE_ID
        )
    );

    // the scope's late finish is dropped
    assert!(wait_for(WAIT, || bed.counters().finished_runs.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(listener.finish_count(), 1);
    assert_eq!(listener.result_count(), 1);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_active_reply_is_not_reaped() {
    let bed = TestBed::start_with(|b| b.reap_interval_secs(1).reap_expiry_secs(3)).await;

    let (listener, _ctrl) = bed.search("50", 0).await;
    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Ok);
    assert_eq!(listener.result_count(), 50);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_finished_exactly_once_when_cancel_races_completion() {
    let bed = TestBed::start().await;

    let mut searches = Vec::new();
    for _ in 0..10 {
        searches.push(bed.search("3", 0));
    }
    let started = join_all(searches).await;

    for (i, (_, ctrl)) in started.iter().enumerate() {
        if i % 2 == 0 {
            ctrl.cancel();
        }
    }

    for (listener, _) in &started {
        let details = listener.wait_finished().await;
        assert!(matches!(
            details.status,
            CompletionStatus::Ok | CompletionStatus::Cancelled
        ));
        if details.status == CompletionStatus::Ok {
            assert_eq!(listener.result_count(), 3);
        }
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    for (listener, _) in &started {
        assert_eq!(listener.finish_count(), 1);
    }
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_destroy_finishes_pending_queries() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("idle", 0).await;
    assert!(wait_for(WAIT, || listener.result_count() == 1).await);

    bed.client_rt.destroy().await;
    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Error);
    assert!(details.message.contains("ReplyObject destroyed"), "{}", details.message);

    assert!(bed.client_rt.reply_reaper().is_err());
    bed.shutdown().await;
}
