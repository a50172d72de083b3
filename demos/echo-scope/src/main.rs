//! Echo scope demo
//!
//! Starts three runtimes in one process: a registry, a scope runner serving
//! an "echo" scope and a client. The client sends each query given on the
//! command line and prints the results as they arrive.
//!
//! ```text
//!   client ──locate──► registry
//!      │
//!      └──search──► echo scope ──results──► client listener
//! ```
//!
//! Usage:
//!   cargo run -p echo-scope -- "hello world" "one two three"
//!   cargo run -p echo-scope -- --cardinality 2 "a b c d"

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scopes::{
    scope_proxy_string, ActionMetadata, BoxError, CancellationToken, CannedQuery,
    CategorisedResult, CompletionDetails, CompletionStatus, ListenerBase, PreviewQueryBase,
    PreviewReply, QueryBase, RegistryObject, Runtime, RuntimeConfig, ScopeBase, ScopeMetadata,
    ScopeResult, SearchListener, SearchMetadata, SearchQueryBase, SearchReply,
};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const SCOPE_ID: &str = "echo";

#[derive(Parser, Debug)]
#[command(name = "echo-scope", about = "Query an in-process echo scope")]
struct Args {
    /// Queries to send
    #[arg(default_value = "hello scopes")]
    queries: Vec<String>,

    /// Maximum number of results per query (0 for no limit)
    #[arg(short, long, default_value_t = 0)]
    cardinality: usize,

    /// Configuration file; defaults are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the endpoint sockets
    #[arg(long)]
    endpoint_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

/// Pushes one result per word of the query string
struct EchoScope;

struct EchoQuery {
    query: CannedQuery,
}

impl QueryBase for EchoQuery {
    fn cancelled(&self) {
        info!("echo: query \"{}\" cancelled", self.query.query_string());
    }
}

impl SearchQueryBase for EchoQuery {
    fn run(&self, reply: SearchReply, token: CancellationToken) -> Result<(), BoxError> {
        let category = reply.register_category("words", "Words", "", "{}")?;
        for (i, word) in self.query.query_string().split_whitespace().enumerate() {
            if token.is_cancelled() {
                break;
            }
            let mut result = ScopeResult::new(format!("echo:{}", i), word);
            result.set("position", json!(i));
            if !reply.push(&CategorisedResult::new(category.clone(), result)) {
                break;
            }
        }
        Ok(())
    }
}

struct EchoPreview {
    result: ScopeResult,
}

impl QueryBase for EchoPreview {}

impl PreviewQueryBase for EchoPreview {
    fn run(&self, reply: PreviewReply, _token: CancellationToken) -> Result<(), BoxError> {
        reply.push_widgets(vec![json!({ "id": "title", "type": "header", "title": self.result.title })]);
        Ok(())
    }
}

impl ScopeBase for EchoScope {
    fn start(&self, scope_id: &str) -> Result<(), BoxError> {
        info!("echo: scope {} starting", scope_id);
        Ok(())
    }

    fn stop(&self) {
        info!("echo: scope stopping");
    }

    fn search(
        &self,
        query: &CannedQuery,
        _metadata: &SearchMetadata,
    ) -> Result<Box<dyn SearchQueryBase>, BoxError> {
        Ok(Box::new(EchoQuery {
            query: query.clone(),
        }))
    }

    fn preview(
        &self,
        result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Box<dyn PreviewQueryBase>, BoxError> {
        Ok(Box::new(EchoPreview {
            result: result.clone(),
        }))
    }
}

/// Prints results and signals completion
struct PrintingListener {
    query: String,
    done: parking_lot::Mutex<Option<oneshot::Sender<CompletionDetails>>>,
}

impl ListenerBase for PrintingListener {
    fn finished(&self, details: &CompletionDetails) {
        if let Some(done) = self.done.lock().take() {
            let _ = done.send(details.clone());
        }
    }
}

impl SearchListener for PrintingListener {
    fn push_result(&self, result: CategorisedResult) {
        println!(
            "  [{}] {} -> {} ({})",
            self.query, result.category.id, result.result.title, result.result.uri
        );
    }
}

fn load_config(args: &Args) -> Result<RuntimeConfig, BoxError> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(dir) = &args.endpoint_dir {
        config.middleware.endpoint_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        "Running echo scope demo with endpoints in {}",
        config.middleware.endpoint_dir.display()
    );

    let registry = Arc::new(RegistryObject::new());
    let registry_rt = Runtime::create("registry", config.clone())?;
    registry_rt.serve_registry(Arc::clone(&registry)).await?;

    let scope_rt = Runtime::create("scoperunner", config.clone())?;
    let endpoint = scope_rt.middleware().endpoint(SCOPE_ID);
    let mut metadata = ScopeMetadata::new(SCOPE_ID, "Echo", scope_proxy_string(&endpoint, SCOPE_ID));
    metadata.description = "Echoes the words of the query".to_string();
    registry.add_local_scope(metadata)?;
    scope_rt.run_scope(SCOPE_ID, Arc::new(EchoScope)).await?;

    let client_rt = Runtime::create("client", config)?;
    let proxy = client_rt.locate_scope(SCOPE_ID).await?;
    info!("Located {} at {}", SCOPE_ID, proxy);

    let mut failed = false;
    for query_string in &args.queries {
        let (done_tx, done_rx) = oneshot::channel();
        let listener = Arc::new(PrintingListener {
            query: query_string.clone(),
            done: parking_lot::Mutex::new(Some(done_tx)),
        });
        let query = CannedQuery::new(SCOPE_ID)?.with_query_string(query_string.as_str());
        let search_metadata =
            SearchMetadata::new("en_US", "desktop").with_cardinality(args.cardinality);
        let _ctrl = proxy.search(&query, &search_metadata, listener).await?;

        match tokio::time::timeout(Duration::from_secs(10), done_rx).await {
            Ok(Ok(details)) if details.status == CompletionStatus::Ok => {
                info!("Query \"{}\" finished", query_string);
            }
            Ok(Ok(details)) => {
                eprintln!("Query \"{}\" failed: {}", query_string, details.message);
                failed = true;
            }
            _ => {
                eprintln!("Query \"{}\" did not finish", query_string);
                failed = true;
            }
        }
    }

    client_rt.destroy().await;
    scope_rt.destroy().await;
    registry_rt.destroy().await;

    if failed {
        return Err("some queries failed".into());
    }
    Ok(())
}
