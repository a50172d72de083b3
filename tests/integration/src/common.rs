//! Shared fixtures for the integration tests
//!
//! A [`TestBed`] runs three runtimes in this process, each with its own
//! middleware and sockets: one serving the registry, one running the test
//! scope and one acting as client.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scopes::{
    scope_proxy_string, ActionMetadata, ActivationListener, ActivationQueryBase,
    ActivationResponse, ActivationStatus, BoxError, CancellationToken, CannedQuery,
    CategorisedResult, CompletionDetails, InfoCode, ListenerBase, OperationInfo, PreviewListener,
    PreviewQueryBase, PreviewReply, QueryBase, QueryCtrl, RegistryObject, Reply, Runtime,
    RuntimeConfig, RuntimeConfigBuilder, ScopeBase, ScopeMetadata, ScopeProxy, ScopeResult,
    SearchListener, SearchMetadata, SearchQueryBase, SearchReply, Variant, VariantArray,
};
use serde_json::json;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const SCOPE_ID: &str = "testscope";

/// How long tests wait for asynchronous outcomes
pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn base_config(dir: &TempDir) -> RuntimeConfigBuilder {
    RuntimeConfig::builder()
        .endpoint_dir(dir.path())
        .twoway_timeout_ms(3000)
        .registry_timeout_ms(3000)
        .reap_interval_secs(1)
        .reap_expiry_secs(30)
}

/// Poll `cond` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ---------------------------------------------------------------------------
// Listeners

#[derive(Default)]
pub struct SearchRecorder {
    pub results: Mutex<Vec<CategorisedResult>>,
    pub categories: Mutex<Vec<String>>,
    pub departments: Mutex<Vec<String>>,
    pub finished: Mutex<Vec<CompletionDetails>>,
    pub infos: Mutex<Vec<OperationInfo>>,
}

impl SearchRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }

    pub fn finish_count(&self) -> usize {
        self.finished.lock().len()
    }

    /// Wait for the terminal event and return it
    pub async fn wait_finished(&self) -> CompletionDetails {
        assert!(
            wait_for(WAIT, || self.finish_count() > 0).await,
            "query did not finish"
        );
        self.finished.lock()[0].clone()
    }
}

impl ListenerBase for SearchRecorder {
    fn finished(&self, details: &CompletionDetails) {
        self.finished.lock().push(details.clone());
    }

    fn info(&self, info: &OperationInfo) {
        self.infos.lock().push(info.clone());
    }
}

impl SearchListener for SearchRecorder {
    fn push_result(&self, result: CategorisedResult) {
        self.results.lock().push(result);
    }

    fn push_category(&self, category: Arc<scopes::Category>) {
        self.categories.lock().push(category.id.clone());
    }

    fn push_departments(&self, _departments: &Variant, current_department_id: &str) {
        self.departments.lock().push(current_department_id.to_string());
    }
}

#[derive(Default)]
pub struct PreviewRecorder {
    pub layouts: Mutex<Vec<VariantArray>>,
    pub widgets: Mutex<Vec<VariantArray>>,
    pub data: Mutex<Vec<(String, Variant)>>,
    pub finished: Mutex<Vec<CompletionDetails>>,
}

impl PreviewRecorder {
    pub async fn wait_finished(&self) -> CompletionDetails {
        assert!(
            wait_for(WAIT, || !self.finished.lock().is_empty()).await,
            "preview did not finish"
        );
        self.finished.lock()[0].clone()
    }
}

impl ListenerBase for PreviewRecorder {
    fn finished(&self, details: &CompletionDetails) {
        self.finished.lock().push(details.clone());
    }
}

impl PreviewListener for PreviewRecorder {
    fn push_layouts(&self, layouts: &VariantArray) {
        self.layouts.lock().push(layouts.clone());
    }

    fn push_widgets(&self, widgets: &VariantArray) {
        self.widgets.lock().push(widgets.clone());
    }

    fn push_data(&self, key: &str, value: &Variant) {
        self.data.lock().push((key.to_string(), value.clone()));
    }
}

#[derive(Default)]
pub struct ActivationRecorder {
    pub responses: Mutex<Vec<ActivationResponse>>,
    pub finished: Mutex<Vec<CompletionDetails>>,
}

impl ActivationRecorder {
    pub async fn wait_finished(&self) -> CompletionDetails {
        assert!(
            wait_for(WAIT, || !self.finished.lock().is_empty()).await,
            "activation did not finish"
        );
        self.finished.lock()[0].clone()
    }
}

impl ListenerBase for ActivationRecorder {
    fn finished(&self, details: &CompletionDetails) {
        self.finished.lock().push(details.clone());
    }
}

impl ActivationListener for ActivationRecorder {
    fn activated(&self, response: ActivationResponse) {
        self.responses.lock().push(response);
    }
}

// ---------------------------------------------------------------------------
// Test scope

#[derive(Default)]
pub struct ScopeCounters {
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub runs: AtomicUsize,
    pub cancels: AtomicUsize,
    pub finished_runs: AtomicUsize,
}

/// Scope whose behaviour is chosen by the query string:
///
/// - a number `n`: push `n` results
/// - `error`: push two results, then fail
/// - `panic`: panic in `run`
/// - `block`: push one result, then wait for cancellation
/// - `idle`: push one result, then hold the reply for a few seconds
/// - `info`: report a condition, then push one result
/// - `departments`: register departments, then push one result
/// - `fail-factory`: `search` itself fails
#[derive(Default)]
pub struct TestScope {
    pub counters: Arc<ScopeCounters>,
}

impl TestScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub fn test_result(i: usize) -> ScopeResult {
    let mut result = ScopeResult::new(format!("test:{}", i), format!("Result {}", i));
    result.set("index", json!(i));
    result
}

impl ScopeBase for TestScope {
    fn start(&self, _scope_id: &str) -> Result<(), BoxError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn search(
        &self,
        query: &CannedQuery,
        _metadata: &SearchMetadata,
    ) -> Result<Box<dyn SearchQueryBase>, BoxError> {
        if query.query_string() == "fail-factory" {
            return Err("cannot create query".into());
        }
        Ok(Box::new(TestQuery {
            query: query.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn preview(
        &self,
        result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Box<dyn PreviewQueryBase>, BoxError> {
        Ok(Box::new(TestPreview {
            result: result.clone(),
        }))
    }

    fn activate(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Box<dyn ActivationQueryBase>, BoxError> {
        Ok(Box::new(TestActivation { action: None }))
    }

    fn perform_action(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
        widget_id: &str,
        action_id: &str,
    ) -> Result<Box<dyn ActivationQueryBase>, BoxError> {
        Ok(Box::new(TestActivation {
            action: Some(format!("{}/{}", widget_id, action_id)),
        }))
    }
}

struct TestQuery {
    query: CannedQuery,
    counters: Arc<ScopeCounters>,
}

impl QueryBase for TestQuery {
    fn cancelled(&self) {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

impl SearchQueryBase for TestQuery {
    fn run(&self, reply: SearchReply, token: CancellationToken) -> Result<(), BoxError> {
        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        let outcome = self.produce(&reply, &token);
        self.counters.finished_runs.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

impl TestQuery {
    fn produce(&self, reply: &SearchReply, token: &CancellationToken) -> Result<(), BoxError> {
        let category = reply.register_category("results", "Results", "", "{}")?;
        let push = |i: usize| reply.push(&CategorisedResult::new(category.clone(), test_result(i)));

        match self.query.query_string() {
            "error" => {
                push(0);
                push(1);
                Err("backend exploded".into())
            }
            "panic" => panic!("query panicked"),
            "block" => {
                push(0);
                let deadline = Instant::now() + WAIT;
                while !token.is_cancelled() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }
            "idle" => {
                push(0);
                std::thread::sleep(Duration::from_secs(4));
                Ok(())
            }
            "info" => {
                reply.info(OperationInfo::new(InfoCode::PoorInternet, "slow link"));
                push(0);
                Ok(())
            }
            "departments" => {
                reply.register_departments(json!([{ "id": "all" }, { "id": "news" }]), "all")?;
                push(0);
                Ok(())
            }
            count => {
                let count: usize = count.parse().unwrap_or(1);
                for i in 0..count {
                    if !push(i) {
                        break;
                    }
                }
                Ok(())
            }
        }
    }
}

struct TestPreview {
    result: ScopeResult,
}

impl QueryBase for TestPreview {}

impl PreviewQueryBase for TestPreview {
    fn run(&self, reply: PreviewReply, _token: CancellationToken) -> Result<(), BoxError> {
        reply.register_layout(vec![json!({ "columns": [["header", "body"]] })])?;
        reply.push_widgets(vec![
            json!({ "id": "header", "type": "header", "title": self.result.title }),
            json!({ "id": "body", "type": "text" }),
        ]);
        reply.push_data("uri", json!(self.result.uri));
        Ok(())
    }
}

struct TestActivation {
    action: Option<String>,
}

impl QueryBase for TestActivation {}

impl ActivationQueryBase for TestActivation {
    fn activate(&self) -> Result<ActivationResponse, BoxError> {
        match &self.action {
            Some(action) => {
                let query = CannedQuery::new(SCOPE_ID)?.with_query_string(action.clone());
                Ok(ActivationResponse::perform_query(query))
            }
            None => Ok(ActivationResponse::new(ActivationStatus::ShowPreview)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Test bed

pub struct TestBed {
    pub dir: TempDir,
    pub registry: Arc<RegistryObject>,
    pub registry_rt: Arc<Runtime>,
    pub scope_rt: Arc<Runtime>,
    pub client_rt: Arc<Runtime>,
    pub scope: Arc<TestScope>,
}

impl TestBed {
    pub async fn start() -> Self {
        Self::start_with(|builder| builder).await
    }

    pub async fn start_with(configure: impl Fn(RuntimeConfigBuilder) -> RuntimeConfigBuilder) -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = configure(base_config(&dir)).build().unwrap();

        let registry = Arc::new(RegistryObject::new());
        let registry_rt = Runtime::create("registry", config.clone()).unwrap();
        registry_rt.serve_registry(registry.clone()).await.unwrap();

        let scope_rt = Runtime::create("scoperunner", config.clone()).unwrap();
        let endpoint = scope_rt.middleware().endpoint(SCOPE_ID);
        let mut metadata =
            ScopeMetadata::new(SCOPE_ID, "Test scope", scope_proxy_string(&endpoint, SCOPE_ID));
        metadata.description = "Scope used by the integration tests".to_string();
        registry.add_local_scope(metadata).unwrap();

        let scope = TestScope::new();
        scope_rt.run_scope(SCOPE_ID, scope.clone()).await.unwrap();

        let client_rt = Runtime::create("client", config).unwrap();

        Self {
            dir,
            registry,
            registry_rt,
            scope_rt,
            client_rt,
            scope,
        }
    }

    pub fn counters(&self) -> &ScopeCounters {
        &self.scope.counters
    }

    pub async fn proxy(&self) -> ScopeProxy {
        self.client_rt.locate_scope(SCOPE_ID).await.unwrap()
    }

    pub async fn search(&self, query_string: &str, cardinality: usize) -> (Arc<SearchRecorder>, Arc<QueryCtrl>) {
        let proxy = self.proxy().await;
        let listener = SearchRecorder::new();
        let query = CannedQuery::new(SCOPE_ID).unwrap().with_query_string(query_string);
        let metadata = SearchMetadata::new("en_US", "phone").with_cardinality(cardinality);
        let ctrl = proxy.search(&query, &metadata, listener.clone()).await.unwrap();
        (listener, ctrl)
    }

    pub async fn shutdown(self) {
        self.client_rt.destroy().await;
        self.scope_rt.destroy().await;
        self.registry_rt.destroy().await;
    }
}
