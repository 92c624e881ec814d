use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher;
use kube::Api;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serverless_controller::cache::Cache;
use serverless_controller::config::ControllerConfig;
use serverless_controller::config::RateLimitConfig;
use serverless_controller::controller::Controller;
use serverless_controller::crd::ServerlessFunc;
use serverless_controller::events::EventRecorder;
use serverless_controller::informer;
use serverless_controller::k8s::CachedApiProvider;
use serverless_controller::k8s::K8sRepository;
use serverless_controller::reconciler::Reconciler;
use serverless_controller::reconciler::Stores;
use tokio::sync::mpsc;

const COMPONENT: &str = "serverless-controller";

#[derive(Parser, Debug)]
#[command(name = "serverless-controller", version, about = "Reconciles ServerlessFunc resources")]
struct Args {
    /// Number of concurrent reconcile workers
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    workers: usize,

    /// Only watch this namespace instead of the whole cluster
    #[arg(long, env = "NAMESPACE")]
    namespace: Option<String>,

    /// Requeue every ServerlessFunc at this interval, 0 disables
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 60)]
    resync_interval_secs: u64,

    #[arg(long, env = "RATE_LIMIT_BASE_DELAY_MS", default_value_t = 5)]
    rate_limit_base_delay_ms: u64,

    #[arg(long, env = "RATE_LIMIT_MAX_DELAY_SECS", default_value_t = 1000)]
    rate_limit_max_delay_secs: u64,

    #[arg(long, env = "RATE_LIMIT_QPS", default_value_t = 10.0)]
    rate_limit_qps: f64,

    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 100)]
    rate_limit_burst: u32,

    #[arg(long, env = "CACHE_SYNC_TIMEOUT_SECS", default_value_t = 120)]
    cache_sync_timeout_secs: u64,

    /// Also reconcile a ServerlessFunc when its deployment changes
    #[arg(long, env = "WATCH_RUNNER_DRIFT", default_value_t = false)]
    watch_runner_drift: bool,
}

impl Args {
    fn into_config(self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            namespace: self.namespace,
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            rate_limit: RateLimitConfig {
                base_delay: Duration::from_millis(self.rate_limit_base_delay_ms),
                max_delay: Duration::from_secs(self.rate_limit_max_delay_secs),
                qps: self.rate_limit_qps,
                burst: self.rate_limit_burst,
            },
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            watch_runner_drift: self.watch_runner_drift,
            ..Default::default()
        }
    }
}

fn init_tracing() {
    let env = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter =
        tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn watched<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn repository<K>(client: &Client) -> Arc<K8sRepository<K, CachedApiProvider<K>>>
where
    K: kube::Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    K::DynamicType: Default,
{
    Arc::new(K8sRepository::new(CachedApiProvider::new(client.clone())))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(error) => {
                tracing::warn!(%error, "can't listen for SIGTERM, only Ctrl-C stops the controller");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Args::parse().into_config();
    config.validate().context("invalid configuration")?;

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    let funcs = Cache::<ServerlessFunc>::new();
    let runners = Cache::<Deployment>::new();
    let (func_tx, func_rx) = mpsc::unbounded_channel();
    let (runner_tx, runner_rx) = mpsc::unbounded_channel();

    let namespace = config.namespace.as_deref();
    tokio::spawn(informer::run(
        watched::<ServerlessFunc>(&client, namespace),
        watcher::Config::default(),
        funcs.clone(),
        func_tx,
    ));
    tokio::spawn(informer::run(
        watched::<Deployment>(&client, namespace),
        watcher::Config::default(),
        runners.clone(),
        runner_tx,
    ));

    let stores = Stores {
        funcs: repository::<ServerlessFunc>(&client),
        deployments: repository::<Deployment>(&client),
        services: repository::<Service>(&client),
        ingresses: repository::<Ingress>(&client),
    };
    let recorder = Arc::new(EventRecorder::new(
        Arc::new(CachedApiProvider::<Event>::new(client)),
        COMPONENT,
    ));
    let reconciler = Reconciler::new(
        funcs.clone(),
        runners.clone(),
        stores,
        recorder,
        Arc::new(config.resources.clone()),
    );

    tracing::info!(
        namespace = namespace.unwrap_or("<all>"),
        workers = config.workers,
        watch_runner_drift = config.watch_runner_drift,
        "starting {COMPONENT}"
    );
    Controller::new(config, funcs, runners, reconciler)
        .run(func_rx, runner_rx, shutdown_signal())
        .await
        .context("controller failed")?;

    tracing::info!("controller stopped");
    Ok(())
}
