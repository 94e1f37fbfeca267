use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mlplace::backend::BackendClient;
use mlplace::catalog::DatasetCatalog;
use mlplace::decision::DecisionUnit;
use mlplace::inventory::{
    InventorySource, KubeInventorySource, NodeInventory, PrometheusMetrics,
};
use mlplace::manager::{spawn_scheduler, PipelineManager};
use mlplace::placer::build_placer;
use mlplace::server::{create_router, AppState};
use mlplace::settings::Settings;

/// Placement and scheduling controller for ML pipelines.
#[derive(Parser, Debug)]
#[command(name = "mlplace", version, about)]
struct Cli {
    /// Address to bind the submission API on
    #[arg(long, default_value = "0.0.0.0")]
    bind_addr: String,

    /// Port for the submission API
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Load environment variables from this file before reading settings
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    } else {
        dotenvy::dotenv().ok();
    }

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    std::fs::create_dir_all(&settings.pipelines_dir)?;

    // Collaborators: cluster inventory, metrics store, workflow backend.
    let source: Arc<dyn InventorySource> = if settings.debug {
        let path = settings
            .kube_config
            .clone()
            .ok_or_else(|| anyhow::anyhow!("DEBUG mode requires KUBE_CONFIG"))?;
        Arc::new(KubeInventorySource::from_kubeconfig(&path)?)
    } else {
        Arc::new(KubeInventorySource::in_cluster()?)
    };
    let metrics = Arc::new(PrometheusMetrics::new(
        settings.prometheus_url.clone(),
        settings.node_exporter_port,
        settings.kube_apiserver_port,
    ));
    let inventory = Arc::new(NodeInventory::new(source, metrics));
    let backend = BackendClient::new(&settings.kfp_url, &settings.kfp_api_endpoint)?;

    let catalog = Arc::new(DatasetCatalog::new(settings.datasets_path.clone()));
    if let Err(e) = catalog.refresh() {
        warn!("Initial dataset scan failed: {}", e);
    } else {
        info!("{} dataset(s) registered", catalog.len());
    }

    // Control plane: decision unit plus the pipeline manager's two loops.
    let placer = build_placer(
        settings.placer,
        inventory.clone(),
        catalog.clone(),
        settings.seed,
    );
    info!("Placer strategy: {:?}", settings.placer);
    let decision = Arc::new(DecisionUnit::new(&inventory, placer).await);
    let manager = Arc::new(PipelineManager::new(
        &settings,
        decision,
        inventory.clone(),
        backend,
    )?);
    let scheduler_shutdown = spawn_scheduler(
        manager.clone(),
        settings.wait_interval,
        settings.update_interval,
    );

    // Submission API.
    let state = AppState::new(
        manager.clone(),
        catalog,
        settings.pipelines_dir.clone(),
    );
    let app = create_router(state);
    let addr = format!("{}:{}", cli.bind_addr, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("mlplace listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /                  - Liveness");
    info!("  GET  /datasets/update/  - Refresh dataset catalog");
    info!("  POST /submit/           - Submit a pipeline");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Stop the loops, then persist the pipeline store.
    let _ = scheduler_shutdown.send(());
    if let Err(e) = manager.dump_pipelines().await {
        warn!("Failed to dump pipelines on shutdown: {}", e);
    }

    Ok(())
}
