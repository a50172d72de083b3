//! Middleware tests: several invokers against one object adapter

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{init_logging, wait_for, WAIT};
use futures::future::join_all;
use parking_lot::Mutex;
use scopes_rpc::{
    DestroyPolicy, Endpoint, Invoker, InvokerConfig, MiddlewareError, ObjectAdapter,
    ObjectAdapterConfig, ObjectProxy, Reaper, RequestMode, Servant, ServantBuilder,
};
use tempfile::TempDir;

fn servant(calls: Arc<AtomicUsize>) -> Arc<dyn Servant> {
    ServantBuilder::new()
        .operation("echo", move |_current, args: Bytes| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(args) }
        })
        .operation("slow", |_current, args: Bytes| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(args)
        })
        .operation("reject", |_current, _args| async {
            Err(MiddlewareError::user("InvalidArgument", "bad query"))
        })
        .build()
}

async fn start_adapter(dir: &TempDir, name: &str, mode: RequestMode, pool_size: usize) -> Arc<ObjectAdapter> {
    let invoker = Invoker::new(InvokerConfig::default(), None).unwrap();
    let config = ObjectAdapterConfig::new(name, Endpoint::Ipc(dir.path().join(name)), mode)
        .with_pool_size(pool_size);
    let adapter = ObjectAdapter::new(config, invoker);
    adapter.activate().await.unwrap();
    adapter
}

/// Proxy for `identity` on `adapter`, invoked through `invoker`
fn client_proxy(invoker: &Invoker, adapter: &ObjectAdapter, identity: &str) -> ObjectProxy {
    let target = adapter.proxy(identity).unwrap().proxy_string().clone();
    ObjectProxy::new(invoker.clone(), target).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_clients() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let adapter = start_adapter(&dir, "scope", RequestMode::Twoway, 4).await;
    adapter.add("obj", servant(Arc::clone(&calls))).unwrap();

    let clients: Vec<Invoker> = (0..4)
        .map(|_| Invoker::new(InvokerConfig::default(), None).unwrap())
        .collect();

    let mut calls_in_flight = Vec::new();
    for (c, invoker) in clients.iter().enumerate() {
        let proxy = client_proxy(invoker, &adapter, "obj");
        for i in 0..25 {
            let proxy = proxy.clone();
            calls_in_flight.push(async move {
                let payload = Bytes::from(format!("{}-{}", c, i));
                let out = proxy.invoke_twoway("echo", payload.clone()).await.unwrap();
                assert_eq!(out, payload);
            });
        }
    }
    join_all(calls_in_flight).await;

    assert_eq!(calls.load(Ordering::SeqCst), 100);
    let stats = adapter.stats().snapshot();
    assert_eq!(stats.requests_dispatched, 100);
    assert_eq!(stats.requests_failed, 0);
    for invoker in &clients {
        assert_eq!(invoker.stats().snapshot().twoway_sent, 25);
        invoker.shutdown().await;
    }

    adapter.shutdown();
    adapter.wait_for_shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_errors_cross_the_wire() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let adapter = start_adapter(&dir, "scope", RequestMode::Twoway, 2).await;
    adapter.add("obj", servant(Arc::new(AtomicUsize::new(0)))).unwrap();

    let invoker = Invoker::new(InvokerConfig::default(), None).unwrap();
    let proxy = client_proxy(&invoker, &adapter, "obj");
    proxy.ping().await.unwrap();

    match proxy.invoke_twoway("reject", Bytes::new()).await.unwrap_err() {
        MiddlewareError::UserException { kind, message } => {
            assert_eq!(kind, "InvalidArgument");
            assert_eq!(message, "bad query");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(matches!(
        proxy.invoke_twoway("frob", Bytes::new()).await,
        Err(MiddlewareError::OperationNotExist { ref op, .. }) if op == "frob"
    ));

    let missing = client_proxy(&invoker, &adapter, "nobody");
    assert!(matches!(
        missing.ping().await,
        Err(MiddlewareError::ObjectNotExist { .. })
    ));

    // the connection survives the failures
    let out = proxy.invoke_twoway("echo", Bytes::from_static(b"ok")).await.unwrap();
    assert_eq!(&out[..], b"ok");

    invoker.shutdown().await;
    adapter.shutdown();
    adapter.wait_for_shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_twoway_timeout() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let adapter = start_adapter(&dir, "scope", RequestMode::Twoway, 2).await;
    adapter.add("obj", servant(Arc::new(AtomicUsize::new(0)))).unwrap();

    let invoker = Invoker::new(InvokerConfig::default(), None).unwrap();
    let proxy = client_proxy(&invoker, &adapter, "obj").with_timeout(100);

    let err = proxy.invoke_twoway("slow", Bytes::new()).await.unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);
    assert_eq!(err.to_string(), "Request timed out after 100 milliseconds");
    assert_eq!(invoker.stats().snapshot().twoway_timeouts, 1);

    // a late reply must not be mistaken for the answer to the next call
    let out = proxy.invoke_twoway("echo", Bytes::from_static(b"next")).await.unwrap();
    assert_eq!(&out[..], b"next");

    invoker.shutdown().await;
    adapter.shutdown();
    adapter.wait_for_shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oneway_order_from_one_client() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let adapter = start_adapter(&dir, "reply", RequestMode::Oneway, 1).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    adapter
        .add(
            "r",
            ServantBuilder::new()
                .operation("push", move |_current, args: Bytes| {
                    sink.lock().push(u16::from_be_bytes([args[0], args[1]]));
                    async { Ok(Bytes::new()) }
                })
                .build(),
        )
        .unwrap();

    let invoker = Invoker::new(InvokerConfig::default(), None).unwrap();
    let proxy = client_proxy(&invoker, &adapter, "r");
    for i in 0..500u16 {
        proxy
            .invoke_oneway("push", Bytes::copy_from_slice(&i.to_be_bytes()))
            .unwrap();
    }
    invoker.flush().await;

    assert!(wait_for(WAIT, || seen.lock().len() == 500).await);
    assert_eq!(*seen.lock(), (0..500u16).collect::<Vec<_>>());
    assert_eq!(invoker.stats().snapshot().oneway_sent, 500);

    invoker.shutdown().await;
    adapter.shutdown();
    adapter.wait_for_shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_request_is_rejected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let adapter = start_adapter(&dir, "scope", RequestMode::Twoway, 2).await;
    adapter.add("obj", servant(Arc::new(AtomicUsize::new(0)))).unwrap();

    let config = InvokerConfig {
        max_frame_size: 64 * 1024,
        ..InvokerConfig::default()
    };
    let invoker = Invoker::new(config, None).unwrap();
    let proxy = client_proxy(&invoker, &adapter, "obj");

    let big = Bytes::from(vec![7u8; 32 * 1024]);
    let out = proxy.invoke_twoway("echo", big.clone()).await.unwrap();
    assert_eq!(out, big);

    let too_big = Bytes::from(vec![7u8; 128 * 1024]);
    assert!(matches!(
        proxy.invoke_twoway("echo", too_big).await,
        Err(MiddlewareError::FrameTooLarge { .. })
    ));

    invoker.shutdown().await;
    adapter.shutdown();
    adapter.wait_for_shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_connections_are_reaped() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let adapter = start_adapter(&dir, "scope", RequestMode::Twoway, 2).await;
    adapter.add("obj", servant(Arc::new(AtomicUsize::new(0)))).unwrap();

    let reaper = Arc::new(
        Reaper::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            DestroyPolicy::NoCallbackOnDestroy,
        )
        .unwrap(),
    );
    let invoker = Invoker::new(InvokerConfig::default(), Some(Arc::clone(&reaper))).unwrap();
    let proxy = client_proxy(&invoker, &adapter, "obj");

    proxy.ping().await.unwrap();
    assert_eq!(reaper.size(), 1);
    assert!(wait_for(WAIT, || reaper.size() == 0).await);

    // a fresh connection is opened on demand
    proxy.ping().await.unwrap();
    assert!(adapter.stats().snapshot().connections_accepted >= 2);

    invoker.shutdown().await;
    reaper.destroy();
    adapter.shutdown();
    adapter.wait_for_shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_fail_after_adapter_shutdown() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let adapter = start_adapter(&dir, "scope", RequestMode::Twoway, 2).await;
    let proxy_string = adapter
        .add("obj", servant(Arc::new(AtomicUsize::new(0))))
        .unwrap()
        .proxy_string()
        .clone();

    let invoker = Invoker::new(InvokerConfig::default(), None).unwrap();
    let proxy = ObjectProxy::new(invoker.clone(), proxy_string)
        .unwrap()
        .with_timeout(500);
    proxy.ping().await.unwrap();

    adapter.shutdown();
    adapter.wait_for_shutdown().await;

    let err = proxy.ping().await.unwrap_err();
    assert!(err.is_transport() || err.is_timeout(), "{:?}", err);
    invoker.shutdown().await;
}
