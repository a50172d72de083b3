//! Registry tests: a client talks to the registry runtime through
//! `RegistryProxy`

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use scopes::{
    scope_proxy_string, CachingRegistry, CachingRegistryConfig, ProcessState, Registry,
    RemoteScope, RemoteScopeSource, ScopeMetadata, ScopeState, ScopesError,
};

/// Poll the registry until `scope_id` reports `running`
async fn wait_running(registry: &dyn Registry, scope_id: &str, running: bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if registry.is_scope_running(scope_id).await.ok() == Some(running) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_get_metadata_and_locate() {
    let bed = TestBed::start().await;
    let registry = bed.client_rt.registry().unwrap();

    let meta = registry.get_metadata(SCOPE_ID).await.unwrap();
    assert_eq!(meta.scope_id, SCOPE_ID);
    assert_eq!(meta.display_name, "Test scope");
    assert_eq!(meta.description, "Scope used by the integration tests");
    assert_eq!(
        meta.proxy,
        scope_proxy_string(&bed.scope_rt.middleware().endpoint(SCOPE_ID), SCOPE_ID)
    );

    let located = registry.locate(SCOPE_ID).await.unwrap();
    assert_eq!(located, meta.proxy);

    registry.ping().await.unwrap();
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_errors_keep_their_kind() {
    let bed = TestBed::start().await;
    let registry = bed.client_rt.registry().unwrap();

    let err = registry.get_metadata("missing").await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);

    let err = registry.get_metadata("").await.unwrap_err();
    assert!(matches!(err, ScopesError::InvalidArgument(_)), "{}", err);

    let err = registry.is_scope_running("missing").await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_and_list_if() {
    let bed = TestBed::start().await;
    let endpoint = bed.scope_rt.middleware().endpoint("hidden");
    let mut hidden = ScopeMetadata::new("hidden", "Hidden", scope_proxy_string(&endpoint, "hidden"));
    hidden.invisible = true;
    bed.registry.add_local_scope(hidden).unwrap();

    let registry = bed.client_rt.registry().unwrap();
    let all = registry.list().await.unwrap();
    assert_eq!(all.keys().collect::<Vec<_>>(), ["hidden", SCOPE_ID]);
    assert!(all["hidden"].invisible);

    let visible = registry.list_if(&|meta: &ScopeMetadata| !meta.invisible).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert!(visible.contains_key(SCOPE_ID));
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_state_follows_scope_lifecycle() {
    let bed = TestBed::start().await;
    let registry = bed.client_rt.registry().unwrap();

    assert!(wait_running(registry.as_ref(), SCOPE_ID, true).await);
    assert_eq!(bed.registry.process_state(SCOPE_ID), Some(ProcessState::Running));

    let stops = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&stops);
    let _sub = bed.registry.on_scope_state_change(SCOPE_ID, move |running| {
        if !running {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    bed.scope_rt.stop_scope(SCOPE_ID).await.unwrap();
    assert!(wait_running(registry.as_ref(), SCOPE_ID, false).await);
    assert!(wait_for(WAIT, || stops.load(Ordering::SeqCst) == 1).await);

    // the scope can come back
    bed.scope_rt.run_scope(SCOPE_ID, TestScope::new()).await.unwrap();
    assert!(wait_running(registry.as_ref(), SCOPE_ID, true).await);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_reported_through_proxy() {
    let bed = TestBed::start().await;
    let registry = bed.scope_rt.registry().unwrap();

    registry.set_scope_state(SCOPE_ID, ScopeState::Stopping).await.unwrap();
    assert_eq!(bed.registry.process_state(SCOPE_ID), Some(ProcessState::Stopped));
    registry.set_scope_state(SCOPE_ID, ScopeState::Ready).await.unwrap();
    assert_eq!(bed.registry.process_state(SCOPE_ID), Some(ProcessState::Running));

    let err = registry.set_scope_state("missing", ScopeState::Ready).await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);
    bed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_update_notifications() {
    let bed = TestBed::start().await;

    let updates = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&updates);
    let sub = bed.registry.on_list_update(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let endpoint = bed.scope_rt.middleware().endpoint("news");
    bed.registry
        .add_local_scope(ScopeMetadata::new("news", "News", scope_proxy_string(&endpoint, "news")))
        .unwrap();
    assert!(wait_for(WAIT, || updates.load(Ordering::SeqCst) == 1).await);

    assert!(bed.registry.remove_local_scope("news"));
    assert!(wait_for(WAIT, || updates.load(Ordering::SeqCst) == 2).await);

    sub.cancel();
    let endpoint = bed.scope_rt.middleware().endpoint("sport");
    bed.registry
        .add_local_scope(ScopeMetadata::new("sport", "Sport", scope_proxy_string(&endpoint, "sport")))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    bed.shutdown().await;
}

struct StaticSource {
    endpoint: String,
}

#[async_trait]
impl RemoteScopeSource for StaticSource {
    fn base_url(&self) -> String {
        "https://scopes.example.com".to_string()
    }

    async fn fetch(&self) -> scopes::Result<Vec<RemoteScope>> {
        let metadata = ScopeMetadata::new(
            "weather",
            "Weather",
            scope_proxy_string(&self.endpoint, "weather"),
        );
        Ok(vec![RemoteScope {
            metadata,
            base_url: self.base_url(),
        }])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_registry_fallback() {
    let bed = TestBed::start().await;
    let source = Arc::new(StaticSource {
        endpoint: bed.scope_rt.middleware().endpoint("weather"),
    });
    let caching = CachingRegistry::start(source, CachingRegistryConfig::default());
    assert!(wait_for(WAIT, || caching.has_scope("weather")).await);
    assert_eq!(
        caching.get_base_url("weather").unwrap(),
        "https://scopes.example.com"
    );
    bed.registry.set_remote_registry(caching.clone());

    let registry = bed.client_rt.registry().unwrap();
    let meta = registry.get_metadata("weather").await.unwrap();
    assert_eq!(meta.display_name, "Weather");

    let all = registry.list().await.unwrap();
    assert!(all.contains_key("weather"));
    assert!(all.contains_key(SCOPE_ID));

    // local scopes still answer locally
    assert!(registry.is_scope_running(SCOPE_ID).await.unwrap());
    // the cache cannot tell whether a remote scope runs
    let err = registry.is_scope_running("weather").await.unwrap_err();
    assert!(matches!(err, ScopesError::Registry(_)), "{}", err);

    caching.stop().await;
    bed.shutdown().await;
}
