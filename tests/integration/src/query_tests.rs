//! End-to-end query tests
//!
//! A client runtime locates the test scope through the registry runtime and
//! queries it over real sockets.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use scopes::{
    ActionMetadata, ActivationStatus, CannedQuery, CompletionStatus, InfoCode, ScopesError,
    SearchMetadata,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_round_trip() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("5", 0).await;
    let details = listener.wait_finished().await;

    assert_eq!(details.status, CompletionStatus::Ok);
    assert_eq!(listener.result_count(), 5);
    assert_eq!(listener.categories.lock().as_slice(), ["results".to_string()]);

    let results = listener.results.lock();
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.result.uri, format!("test:{}", i));
        assert_eq!(result.category.id, "results");
        assert_eq!(result.result.get("index"), Some(&serde_json::json!(i)));
    }
    drop(results);

    assert_eq!(listener.finish_count(), 1);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cardinality_limits_results() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("20", 3).await;
    let details = listener.wait_finished().await;

    assert_eq!(details.status, CompletionStatus::Ok);
    assert_eq!(listener.result_count(), 3);

    // the query stops producing once the limit is hit
    assert!(wait_for(WAIT, || bed.counters().finished_runs.load(Ordering::SeqCst) == 1).await);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_query() {
    let bed = TestBed::start().await;

    let (listener, ctrl) = bed.search("block", 0).await;
    assert!(wait_for(WAIT, || listener.result_count() == 1).await);
    assert!(wait_for(WAIT, || ctrl.proxy().is_some()).await);

    ctrl.cancel();
    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Cancelled);
    assert!(ctrl.is_cancelled());

    // the scope sees the cancellation and its run() returns
    assert!(wait_for(WAIT, || bed.counters().cancels.load(Ordering::SeqCst) == 1).await);
    assert!(wait_for(WAIT, || bed.counters().finished_runs.load(Ordering::SeqCst) == 1).await);

    // cancelling twice changes nothing
    ctrl.cancel();
    assert_eq!(listener.finish_count(), 1);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_before_control_proxy_arrives() {
    let bed = TestBed::start().await;

    let (listener, ctrl) = bed.search("block", 0).await;
    ctrl.cancel();

    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Cancelled);

    // the deferred cancel still reaches the scope once the proxy is known
    assert!(wait_for(WAIT, || ctrl.proxy().is_some()).await);
    assert!(
        wait_for(WAIT, || {
            let c = bed.counters();
            c.runs.load(Ordering::SeqCst) == c.finished_runs.load(Ordering::SeqCst)
                && c.cancels.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(listener.finish_count(), 1);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_query_error_after_partial_results() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("error", 0).await;
    let details = listener.wait_finished().await;

    assert_eq!(details.status, CompletionStatus::Error);
    assert!(details.message.contains("backend exploded"), "{}", details.message);
    // pushes sent before the failure are delivered first
    assert_eq!(listener.result_count(), 2);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_query_panic_is_reported() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("panic", 0).await;
    let details = listener.wait_finished().await;

    assert_eq!(details.status, CompletionStatus::Error);
    assert!(details.message.contains("query panicked"), "{}", details.message);

    // the scope keeps serving
    let (listener, _ctrl) = bed.search("2", 0).await;
    assert_eq!(listener.wait_finished().await.status, CompletionStatus::Ok);
    assert_eq!(listener.result_count(), 2);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_factory_failure_finishes_with_error() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("fail-factory", 0).await;
    let details = listener.wait_finished().await;

    assert_eq!(details.status, CompletionStatus::Error);
    assert!(details.message.contains("cannot create query"), "{}", details.message);
    assert_eq!(listener.result_count(), 0);
    assert_eq!(bed.counters().runs.load(Ordering::SeqCst), 0);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(listener.finish_count(), 1);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_info_and_departments_reach_listener() {
    let bed = TestBed::start().await;

    let (listener, _ctrl) = bed.search("info", 0).await;
    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Ok);
    assert_eq!(details.info.len(), 1);
    assert_eq!(details.info[0].code, InfoCode::PoorInternet);
    assert_eq!(listener.infos.lock().len(), 1);

    let (listener, _ctrl) = bed.search("departments", 0).await;
    assert_eq!(listener.wait_finished().await.status, CompletionStatus::Ok);
    assert_eq!(listener.departments.lock().as_slice(), ["all".to_string()]);
    assert_eq!(listener.result_count(), 1);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_scope_is_not_found() {
    let bed = TestBed::start().await;

    let err = bed.client_rt.locate_scope("nosuchscope").await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);
    assert!(matches!(err, ScopesError::NotFound { ref id, .. } if id == "nosuchscope"));
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_preview_round_trip() {
    let bed = TestBed::start().await;
    let proxy = bed.proxy().await;

    let listener = Arc::new(PreviewRecorder::default());
    let metadata = ActionMetadata::new("en_US", "desktop");
    let _ctrl = proxy
        .preview(&test_result(7), &metadata, listener.clone())
        .await
        .unwrap();

    assert_eq!(listener.wait_finished().await.status, CompletionStatus::Ok);
    assert_eq!(listener.layouts.lock().len(), 1);
    let widgets = listener.widgets.lock();
    assert_eq!(widgets.len(), 1);
    assert_eq!(widgets[0].len(), 2);
    assert_eq!(widgets[0][0]["title"], "Result 7");
    drop(widgets);
    assert_eq!(
        listener.data.lock().as_slice(),
        [("uri".to_string(), serde_json::json!("test:7"))]
    );
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_activation_and_perform_action() {
    let bed = TestBed::start().await;
    let proxy = bed.proxy().await;
    let metadata = ActionMetadata::new("en_US", "phone");

    let listener = Arc::new(ActivationRecorder::default());
    let _ctrl = proxy
        .activate(&test_result(1), &metadata, listener.clone())
        .await
        .unwrap();
    assert_eq!(listener.wait_finished().await.status, CompletionStatus::Ok);
    assert_eq!(listener.responses.lock()[0].status, ActivationStatus::ShowPreview);

    let listener = Arc::new(ActivationRecorder::default());
    let _ctrl = proxy
        .perform_action(&test_result(1), &metadata, "buttons", "open", listener.clone())
        .await
        .unwrap();
    assert_eq!(listener.wait_finished().await.status, CompletionStatus::Ok);
    let responses = listener.responses.lock();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, ActivationStatus::PerformQuery);
    let query = responses[0].query().unwrap();
    assert_eq!(query.scope_id(), SCOPE_ID);
    assert_eq!(query.query_string(), "buttons/open");
    drop(responses);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stopped_scope_fails_queries() {
    let bed = TestBed::start().await;
    let proxy = bed.proxy().await;

    bed.scope_rt.stop_scope(SCOPE_ID).await.unwrap();
    assert_eq!(bed.counters().stopped.load(Ordering::SeqCst), 1);

    let listener = SearchRecorder::new();
    let query = CannedQuery::new(SCOPE_ID).unwrap().with_query_string("1");
    let _ctrl = proxy
        .search(&query, &SearchMetadata::new("en_US", "phone"), listener.clone())
        .await
        .unwrap();
    let details = listener.wait_finished().await;
    assert_eq!(details.status, CompletionStatus::Error);
    assert_eq!(listener.result_count(), 0);
    bed.shutdown().await;
}
