use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tideway::config::{ControllerConfig, DEFAULT_CLUSTER_ISSUER, DEFAULT_GATEWAY_NAMESPACE};
use tideway::controller::{
    self, ControllerState, DryRunStore, KubeStore, LeaderElection, ObjectStore, ReconcileEngine,
};
use tideway::crd::{Application, Routing, TideJob};
use tideway::{generator, Error};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show how many objects the operator manages
    Info,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace holding the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Namespace for certificates consumed by the ingress gateway
    #[arg(long, env = "GATEWAY_NAMESPACE", default_value = DEFAULT_GATEWAY_NAMESPACE)]
    gateway_namespace: String,

    /// cert-manager ClusterIssuer for ingress certificates
    #[arg(long, env = "CLUSTER_ISSUER", default_value = DEFAULT_CLUSTER_ISSUER)]
    cluster_issuer: String,

    /// Inject default topology spread constraints into pod templates
    #[arg(long, env = "TOPOLOGY_SPREAD", default_value_t = true, action = clap::ArgAction::Set)]
    topology_spread: bool,

    /// Image pull secret added to every generated pod spec
    #[arg(long, env = "IMAGE_PULL_SECRET")]
    image_pull_secret: Option<String>,

    /// Seconds to wait before reconciling a synced object again
    #[arg(long, env = "REQUEUE_SECONDS", default_value_t = 300)]
    requeue_seconds: u64,

    /// Run in dry-run mode (log writes without applying them)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Port for health, readiness and metrics endpoints
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    api_port: u16,
}

impl RunArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            gateway_namespace: self.gateway_namespace.clone(),
            cluster_issuer: self.cluster_issuer.clone(),
            topology_spread: self.topology_spread,
            image_pull_secret: self.image_pull_secret.clone().filter(|s| !s.is_empty()),
            requeue_after: Duration::from_secs(self.requeue_seconds),
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Tideway Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info => run_info().await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_info() -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let applications = kube::Api::<Application>::all(client.clone())
        .list(&Default::default())
        .await?;
    let jobs = kube::Api::<TideJob>::all(client.clone())
        .list(&Default::default())
        .await?;
    let routings = kube::Api::<Routing>::all(client)
        .list(&Default::default())
        .await?;

    println!("Applications: {}", applications.items.len());
    println!("TideJobs: {}", jobs.items.len());
    println!("Routings: {}", routings.items.len());
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing();

    info!("Starting Tideway Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = args.controller_config();
    config.validate()?;
    let registry = generator::standard_registry();
    registry.validate()?;

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let store: Arc<dyn ObjectStore> = if config.dry_run {
        info!("Dry-run mode: writes are logged, not applied");
        Arc::new(DryRunStore::new(KubeStore::new(client.clone())))
    } else {
        Arc::new(KubeStore::new(client.clone()))
    };
    let engine = ReconcileEngine::new(Arc::new(registry), store, Arc::new(config));

    // Leader election configuration
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));
    let election = LeaderElection::new(
        client.clone(),
        &leader_namespace,
        &holder_identity,
        Arc::clone(&is_leader),
    );
    tokio::spawn(election.run());

    #[cfg(feature = "rest-api")]
    {
        let api_state = tideway::rest_api::ApiState {
            is_leader: Arc::clone(&is_leader),
        };
        let port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = tideway::rest_api::run_server(api_state, port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    let state = Arc::new(ControllerState {
        client,
        engine,
        is_leader,
    });

    controller::run_controllers(state).await
}
