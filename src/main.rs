//! StorageCluster Operator
//!
//! Converges composite StorageCluster resources (Ceph cluster, NooBaa
//! object gateway, generated configuration, metrics exporter).
//!
//! # Startup
//!
//! ```text
//! parse flags ─► init logging ─► resolve Facts (images + server version)
//!      │                              │ missing image / probe failure
//!      │                              └──────────────► exit non-zero
//!      ▼
//! health + metrics servers ─► watches (one per registered kind) ─► engine
//!                                                                    │
//!                                          SIGINT / SIGTERM ─► shutdown
//! ```

use clap::Parser;
use futures::Stream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DynamicObject};
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource};
use prometheus::Registry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storagecluster_operator::controller::registry::{KUBEVIRT_VM_CRD, ONBOARDING_TICKET_KEY_SECRET};
use storagecluster_operator::controller::{pump_events, EventSender, RetryConfig};
use storagecluster_operator::crd::crd_manifests;
use storagecluster_operator::domain::DependentKind;
use storagecluster_operator::resources::{
    api_resource, DiscoveryVersionProbe, KubeApplier, KubeEventRecorder, KubeStatusSink,
    NodePlatformProbe, ReflectorCache,
};
use storagecluster_operator::{
    ControllerConfig, Engine, Error, Facts, PipelineMetrics, Reconciler, ReconcilerDeps,
    ResourceKind, Result, StorageCluster, StorageConsumer, StorageProfile,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// StorageCluster Operator - convergence engine for composite storage clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Namespace the operator runs in
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "openshift-storage")]
    operator_namespace: String,

    /// Concurrent convergence workers
    #[arg(long, env = "WORKERS", default_value = "4")]
    workers: usize,

    /// Capacity of the event channel; overflow triggers a full resync
    #[arg(long, env = "EVENT_QUEUE_CAPACITY", default_value = "1024")]
    event_queue_capacity: usize,

    /// Full resync interval in seconds (minimum 30)
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value = "600")]
    resync_interval_secs: u64,

    /// Timeout for cache lookups while mapping events, in milliseconds
    #[arg(long, env = "LOOKUP_TIMEOUT_MS", default_value = "2000")]
    lookup_timeout_ms: u64,

    /// Seconds in-flight convergence runs get to finish on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "30")]
    shutdown_grace_secs: u64,

    /// Do not watch NooBaa resources
    #[arg(long, env = "SKIP_NOOBAA_CRD_WATCH")]
    skip_noobaa_crd_watch: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the CRD manifests as YAML and exit
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            event_queue_capacity: self.event_queue_capacity,
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
            retry: RetryConfig::default(),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            operator_namespace: self.operator_namespace.clone(),
            skip_noobaa_watch: self.skip_noobaa_crd_watch,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crds {
        let manifests = crd_manifests()
            .map_err(|e| Error::Internal(format!("Failed to render CRDs: {}", e)))?;
        print!("{}", manifests);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args);

    let config = args.controller_config();
    info!("Starting StorageCluster Operator");
    info!("  Version: {}", storagecluster_operator::VERSION);
    info!("  Namespace: {}", config.operator_namespace);
    info!("  Workers: {}", config.workers);
    info!("  Resync interval: {:?}", config.effective_resync_interval());
    info!("  Skip NooBaa watch: {}", config.skip_noobaa_watch);

    let client = Client::try_default().await?;

    // Bootstrap preconditions: nothing is wired up unless these resolve
    let facts = match Facts::resolve(
        |k| std::env::var(k).ok(),
        &DiscoveryVersionProbe::new(client.clone()),
    )
    .await
    {
        Ok(facts) => facts,
        Err(e) => {
            error!(error = %e, "Bootstrap preconditions failed, refusing to start");
            return Err(e);
        }
    };

    // Metrics
    let registry = Arc::new(Registry::new());
    let metrics = PipelineMetrics::new()?;
    metrics.register(&registry)?;

    // Start health server
    let ready = Arc::new(AtomicBool::new(false));
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Engine
    let shutdown = CancellationToken::new();
    let (store, writer) = reflector::store::<StorageCluster>();
    let cache = Arc::new(ReflectorCache::new(store));

    let reconciler = Reconciler::new(
        ReconcilerDeps {
            facts,
            cache: cache.clone(),
            applier: Arc::new(KubeApplier::new(client.clone())),
            status: Arc::new(KubeStatusSink::new(client.clone())),
            recorder: Arc::new(KubeEventRecorder::new(client.clone(), cache.clone())),
            platform: Arc::new(NodePlatformProbe::new(client.clone())),
        },
        config.retry.clone(),
    );
    let engine = Engine::new(
        config,
        cache,
        Arc::new(reconciler),
        metrics,
        shutdown.clone(),
    );

    // One watch per registered kind
    let sender = engine.sender();
    let mut writer = Some(writer);
    for kind in engine.table().kinds() {
        let namespace = engine.config().watch_namespace(kind);
        start_watch(kind, namespace, &client, &mut writer, sender.clone(), shutdown.clone());
    }
    drop(sender);

    tokio::spawn(shutdown_signal(shutdown.clone()));

    ready.store(true, Ordering::SeqCst);
    info!("Operator ready");

    let result = engine.run().await;
    match &result {
        Ok(()) => info!("Operator shutdown complete"),
        Err(e) => error!(error = %e, "Operator stopped on fatal error"),
    }
    result
}

// =============================================================================
// Watches
// =============================================================================

fn start_watch(
    kind: ResourceKind,
    namespace: Option<&str>,
    client: &Client,
    writer: &mut Option<Writer<StorageCluster>>,
    sender: EventSender,
    shutdown: CancellationToken,
) {
    info!(kind = %kind, namespace = namespace.unwrap_or("*"), "Starting watch");
    let all = watcher::Config::default();
    let ns = match (kind.is_namespaced(), namespace) {
        (true, Some(ns)) => ns,
        (true, None) => {
            warn!(kind = %kind, "No namespace for namespaced kind, watch not started");
            return;
        }
        (false, _) => {
            // Only the kubevirt CRD is cluster-scoped
            spawn_watch(
                kind,
                Api::<CustomResourceDefinition>::all(client.clone()),
                all.fields(&format!("metadata.name={}", KUBEVIRT_VM_CRD)),
                sender,
                shutdown,
            );
            return;
        }
    };

    match kind {
        ResourceKind::StorageCluster => match writer.take() {
            Some(writer) => {
                let stream = reflector::reflector(
                    writer,
                    watcher(Api::<StorageCluster>::namespaced(client.clone(), ns), all),
                )
                .default_backoff();
                spawn_stream(kind, stream, sender, shutdown);
            }
            None => warn!("StorageCluster watch registered twice"),
        },
        ResourceKind::CephCluster | ResourceKind::NooBaa => {
            let dependent = if kind == ResourceKind::CephCluster {
                DependentKind::CephCluster
            } else {
                DependentKind::NooBaa
            };
            let api = api_resource(dependent);
            spawn_watch(
                kind,
                Api::<DynamicObject>::namespaced_with(client.clone(), ns, &api),
                all,
                sender,
                shutdown,
            );
        }
        ResourceKind::PersistentVolumeClaim => spawn_watch(
            kind,
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), ns),
            all,
            sender,
            shutdown,
        ),
        ResourceKind::Deployment => {
            spawn_watch(kind, Api::<Deployment>::namespaced(client.clone(), ns), all, sender, shutdown)
        }
        ResourceKind::Service => {
            spawn_watch(kind, Api::<Service>::namespaced(client.clone(), ns), all, sender, shutdown)
        }
        ResourceKind::ConfigMap => {
            spawn_watch(kind, Api::<ConfigMap>::namespaced(client.clone(), ns), all, sender, shutdown)
        }
        ResourceKind::StorageProfile => spawn_watch(
            kind,
            Api::<StorageProfile>::namespaced(client.clone(), ns),
            all,
            sender,
            shutdown,
        ),
        ResourceKind::StorageConsumer => spawn_watch(
            kind,
            Api::<StorageConsumer>::namespaced(client.clone(), ns),
            all,
            sender,
            shutdown,
        ),
        ResourceKind::Secret => spawn_watch(
            kind,
            Api::<Secret>::namespaced(client.clone(), ns),
            all.fields(&format!("metadata.name={}", ONBOARDING_TICKET_KEY_SECRET)),
            sender,
            shutdown,
        ),
        ResourceKind::CustomResourceDefinition => {}
    }
}

fn spawn_watch<K>(
    kind: ResourceKind,
    api: Api<K>,
    config: watcher::Config,
    sender: EventSender,
    shutdown: CancellationToken,
) where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    spawn_stream(kind, watcher(api, config).default_backoff(), sender, shutdown);
}

fn spawn_stream<K, S>(kind: ResourceKind, stream: S, sender: EventSender, shutdown: CancellationToken)
where
    K: Resource + Serialize + Send + 'static,
    S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
{
    tokio::spawn(pump_events(kind, stream, sender, shutdown));
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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

// =============================================================================
// Health Server
// =============================================================================

fn respond(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/readyz" if ready => respond(StatusCode::OK, "ok"),
                        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

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

async fn run_metrics_server(addr: &str, registry: Arc<Registry>) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut families = registry.gather();
                            families.extend(prometheus::gather());
                            let mut buffer = Vec::new();
                            match encoder.encode(&families, &mut buffer) {
                                Ok(()) => {
                                    let mut response = respond(StatusCode::OK, buffer);
                                    if let Ok(value) = encoder.format_type().parse() {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    response
                                }
                                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                            }
                        }
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
