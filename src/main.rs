//! Pool Topology Operator
//!
//! Runs the PoolTopology controller against a cluster, or a single
//! operations pass against a YAML fixture in standalone mode.

use clap::Parser;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pool_topology_operator::controlplane::controller;
use pool_topology_operator::{
    ApiServer, ApiServerConfig, ClusterPorts, Context, Error, InMemoryCluster, OperationDispatcher,
    OperatorConfig, OperatorMetrics, PoolLeaseControl, PoolTopology, ReportStore, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pool Topology Operator - add-only expansion of raid-group storage pools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file; flags and environment override its values
    #[arg(long, env = "OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace holding pools, devices and claims
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Identity written into operation leases
    #[arg(long, env = "LEASE_HOLDER")]
    lease_holder: Option<String>,

    /// Seconds after which an operation lease is treated as abandoned
    #[arg(long, env = "LEASE_TTL_SECS")]
    lease_ttl_secs: Option<u64>,

    /// Requeue interval after a clean pass, in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECS")]
    resync_interval_secs: Option<u64>,

    /// First retry delay after a failed pass, in seconds
    #[arg(long, env = "BACKOFF_INITIAL_SECS")]
    backoff_initial_secs: Option<u64>,

    /// Upper bound of the retry delay, in seconds
    #[arg(long, env = "BACKOFF_MAX_SECS")]
    backoff_max_secs: Option<u64>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR")]
    health_addr: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run one pass against a YAML cluster state instead of Kubernetes
    #[arg(long, env = "STANDALONE", requires_all = ["state_file", "topology_file"])]
    standalone: bool,

    /// Cluster state fixture, rewritten after the pass (standalone mode)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// PoolTopology manifest to apply (standalone mode)
    #[arg(long)]
    topology_file: Option<PathBuf>,
}

impl Args {
    /// Layer flags and environment over the file configuration
    fn apply(&self, config: &mut OperatorConfig) {
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(holder) = &self.lease_holder {
            config.lease_holder = holder.clone();
        }
        if let Some(ttl) = self.lease_ttl_secs {
            config.lease_ttl_secs = ttl;
        }
        if let Some(resync) = self.resync_interval_secs {
            config.resync_interval_secs = resync;
        }
        if let Some(initial) = self.backoff_initial_secs {
            config.backoff_initial_secs = initial;
        }
        if let Some(max) = self.backoff_max_secs {
            config.backoff_max_secs = max;
        }
        if let Some(addr) = &self.api_addr {
            config.api_addr = addr.clone();
        }
        if let Some(addr) = &self.health_addr {
            config.health_addr = addr.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics_addr = addr.clone();
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => OperatorConfig::from_file(path)?,
        None => OperatorConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    if args.standalone {
        return run_standalone(&args, &config).await;
    }

    info!("Starting Pool Topology Operator");
    info!("  Version: {}", pool_topology_operator::VERSION);
    info!("  Namespace: {}", config.namespace);
    info!("  REST API: {}", config.api_addr);
    info!("  Lease holder: {}", config.lease_holder);

    let metrics = OperatorMetrics::new()?;
    let reports = Arc::new(ReportStore::new());
    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = parse_addr("health", &config.health_addr)?;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr("metrics", &config.metrics_addr)?;
    let served = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, served).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Start API server
    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig {
            rest_addr: parse_addr("REST API", &config.api_addr)?,
        },
        reports.clone(),
    ));
    let api = api_server.clone();
    let api_handle = tokio::spawn(async move { api.run().await });

    // Stop everything on Ctrl-C
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        signal.cancel();
    });

    let client = kube::Client::try_default().await?;
    let ctx = Context::new(client, config, metrics, reports);
    controller::run(ctx, shutdown.clone()).await;

    api_server.shutdown();
    match api_handle.await {
        Ok(Err(e)) => error!("REST server error: {}", e),
        Err(e) => error!("REST server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Standalone Mode
// =============================================================================

async fn run_standalone(args: &Args, config: &OperatorConfig) -> Result<()> {
    let (Some(state_file), Some(topology_file)) = (&args.state_file, &args.topology_file) else {
        return Err(Error::Configuration(
            "standalone mode needs --state-file and --topology-file".into(),
        ));
    };

    let cluster = Arc::new(InMemoryCluster::load_yaml(state_file)?);
    let topology: PoolTopology = serde_yaml::from_str(&std::fs::read_to_string(topology_file)?)?;
    info!(
        topology = %topology.name(),
        state = %state_file.display(),
        "Running standalone operations pass"
    );

    let ports = ClusterPorts {
        control: Arc::new(PoolLeaseControl::new(
            cluster.clone(),
            config.lease_holder.clone(),
            config.lease_ttl_secs,
        )),
        ..cluster.ports()
    };

    let started = Instant::now();
    let report = OperationDispatcher::new(ports).run(&topology).await?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Pass finished");

    println!("{}", serde_json::to_string_pretty(&report.summary())?);
    cluster.save_yaml(state_file)?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,kube=info,tower=warn,axum=info",
            level
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

fn parse_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", name, addr, e)))
}

fn text_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Request, Server};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {
                    text_response(StatusCode::OK, "text/plain", "ok")
                }
                _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: OperatorMetrics) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((format, buffer)) => text_response(StatusCode::OK, &format, buffer),
                            Err(e) => text_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "text/plain",
                                e.to_string(),
                            ),
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_backoff() {
        let args = Args::try_parse_from([
            "pool-topology-operator",
            "--backoff-initial-secs",
            "2",
            "--backoff-max-secs",
            "60",
            "--lease-ttl-secs",
            "120",
        ])
        .unwrap();

        let mut config = OperatorConfig::default();
        args.apply(&mut config);

        assert_eq!(config.backoff_initial_secs, 2);
        assert_eq!(config.backoff_max_secs, 60);
        assert_eq!(config.lease_ttl_secs, 120);
        assert_eq!(config.resync_interval_secs, OperatorConfig::default().resync_interval_secs);
        config.validate().unwrap();
    }
}
