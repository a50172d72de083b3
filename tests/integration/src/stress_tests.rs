//! Stress Tests
//!
//! Many queries in flight at once against one scope:
//! - concurrent searches from several client tasks
//! - cancellation racing result delivery
//! - several client runtimes sharing one scope

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use futures::future::join_all;
use scopes::{CannedQuery, CompletionStatus, Runtime, SearchMetadata};
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_concurrent_searches() {
    const NUM_TASKS: usize = 20;
    const SEARCHES_PER_TASK: usize = 5;

    let bed = Arc::new(TestBed::start().await);
    let barrier = Arc::new(Barrier::new(NUM_TASKS));
    let start = Instant::now();

    let mut handles = Vec::new();
    for task_id in 0..NUM_TASKS {
        let bed = Arc::clone(&bed);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..SEARCHES_PER_TASK {
                let count = (task_id + i) % 7 + 1;
                let (listener, _ctrl) = bed.search(&count.to_string(), 0).await;
                let details = listener.wait_finished().await;
                assert_eq!(details.status, CompletionStatus::Ok, "{}", details.message);
                assert_eq!(listener.result_count(), count);

                // results arrive in push order
                let uris: Vec<_> = listener.results.lock().iter().map(|r| r.result.uri.clone()).collect();
                let expected: Vec<_> = (0..count).map(|n| format!("test:{}", n)).collect();
                assert_eq!(uris, expected);
            }
        }));
    }
    for result in join_all(handles).await {
        result.unwrap();
    }

    let total = NUM_TASKS * SEARCHES_PER_TASK;
    assert_eq!(bed.counters().runs.load(Ordering::SeqCst), total);
    println!("{} searches in {:?}", total, start.elapsed());

    if let Ok(bed) = Arc::try_unwrap(bed) {
        bed.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cancel_storm() {
    const NUM_QUERIES: usize = 30;

    let bed = Arc::new(TestBed::start().await);
    let barrier = Arc::new(Barrier::new(NUM_QUERIES));

    let mut handles = Vec::new();
    for i in 0..NUM_QUERIES {
        let bed = Arc::clone(&bed);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            // every third query finishes on its own before the cancel
            let query = if i % 3 == 0 { "3" } else { "block" };
            let (listener, ctrl) = bed.search(query, 0).await;
            barrier.wait().await;
            ctrl.cancel();
            ctrl.cancel();

            let details = listener.wait_finished().await;
            if query == "block" {
                assert_eq!(details.status, CompletionStatus::Cancelled);
            } else {
                assert!(matches!(
                    details.status,
                    CompletionStatus::Ok | CompletionStatus::Cancelled
                ));
            }
            listener
        }));
    }

    let mut listeners = Vec::new();
    for result in join_all(handles).await {
        listeners.push(result.unwrap());
    }

    // a cancel can overtake `run`, so not every query reaches user code;
    // the ones that did return once their cancel arrives
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        wait_for(WAIT, || {
            let c = bed.counters();
            c.runs.load(Ordering::SeqCst) == c.finished_runs.load(Ordering::SeqCst)
        })
        .await
    );
    assert!(bed.counters().runs.load(Ordering::SeqCst) <= NUM_QUERIES);

    for listener in &listeners {
        assert_eq!(listener.finish_count(), 1);
    }

    if let Ok(bed) = Arc::try_unwrap(bed) {
        bed.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_several_client_runtimes() {
    const NUM_CLIENTS: usize = 4;

    let bed = TestBed::start().await;
    let config = base_config(&bed.dir).build().unwrap();

    let clients: Vec<Arc<Runtime>> = (0..NUM_CLIENTS)
        .map(|i| Runtime::create(&format!("client{}", i), config.clone()).unwrap())
        .collect();

    let searches = clients.iter().map(|client| async move {
        let proxy = client.locate_scope(SCOPE_ID).await.unwrap();
        let mut listeners = Vec::new();
        for n in 1..=5 {
            let listener = SearchRecorder::new();
            let query = CannedQuery::new(SCOPE_ID).unwrap().with_query_string(n.to_string());
            let metadata = SearchMetadata::new("en_US", "phone");
            proxy.search(&query, &metadata, listener.clone()).await.unwrap();
            listeners.push((n, listener));
        }
        for (n, listener) in listeners {
            assert_eq!(listener.wait_finished().await.status, CompletionStatus::Ok);
            assert_eq!(listener.result_count(), n);
        }
    });
    join_all(searches).await;

    assert_eq!(bed.counters().runs.load(Ordering::SeqCst), NUM_CLIENTS * 5);
    for client in clients {
        client.destroy().await;
    }
    bed.shutdown().await;
}
