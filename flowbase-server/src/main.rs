// FlowBase server - main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use flowbase_server::routes::AppState;
use flowbase_server::{
    build_router, load_config, OperationExecutor, PerformanceLog, ProgressTracker, RepoAnalyzer,
    StoreGateway,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting FlowBase server v{}", flowbase_server::VERSION);

    // Load configuration
    let config = load_config().expect("Failed to load configuration");

    // The one store connection for the process lifetime, passed by
    // reference to everything that needs it
    let gateway = Arc::new(StoreGateway::connect(&config.database, &config.collection));
    let perf_log = Arc::new(PerformanceLog::new());
    let progress = Arc::new(Mutex::new(ProgressTracker::new()));
    let executor = OperationExecutor::new(gateway.clone(), perf_log.clone(), progress);
    let analyzer = Arc::new(RepoAnalyzer::new(config.github_token.clone()));

    let host = config.host.clone();
    let port = config.port;

    let state = Arc::new(AppState {
        config,
        gateway,
        executor,
        analyzer,
        perf_log,
    });

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid address");

    info!("Server listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .expect("Server error");
}
