use clap::Parser;
use componentkit::{EngineContext, FactoryRegistry, KubeComponentStore, ProviderRegistration, RequeuePolicy};
use componentkit_helm::{default_chart_sources, HelmOperationsFactory, KubeSecretReader};
use componentkit_providers::{
    ConfigReaderOperationsFactory, IamPolicyOperationsFactory, IamRoleOperationsFactory,
    ManifestOperationsFactory, SecretPushOperationsFactory,
};
use kube::client::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod controller;
mod metrics;

/// Top-level CLI configuration for the binary. Any command line flags
/// should go in here.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Prometheus metrics server scrape port. Disabled if unset.
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Directory used to cache downloaded Helm chart archives and index
    /// files across reconciles.
    #[arg(long, env = "HELM_CACHE_DIR", default_value = "/var/cache/componentkit-helm")]
    helm_cache_dir: PathBuf,

    /// Providers to start a controller for. Defaults to every provider
    /// this binary knows how to build operations for.
    #[arg(long, value_delimiter = ',')]
    providers: Option<Vec<String>>,
}

/// Builds the registry of every provider this binary knows how to run,
/// keyed by the same `providerName` a Component's `spec.providerName`
/// carries.
async fn build_registry(client: Client, helm_cache_dir: PathBuf) -> FactoryRegistry {
    let mut registry = FactoryRegistry::new();

    let secret_reader = Arc::new(KubeSecretReader::new(client.clone()));
    let chart_sources = Arc::new(default_chart_sources(helm_cache_dir.clone(), secret_reader));
    registry.register(ProviderRegistration {
        factory: Arc::new(HelmOperationsFactory::new(chart_sources, helm_cache_dir)),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        max_concurrent_reconciles: 4,
    });

    registry.register(ProviderRegistration {
        factory: Arc::new(ManifestOperationsFactory::new(client.clone())),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        max_concurrent_reconciles: 4,
    });

    let aws_config = aws_config::load_from_env().await;
    let iam_client = aws_sdk_iam::Client::new(&aws_config);
    let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);

    registry.register(ProviderRegistration {
        factory: Arc::new(IamPolicyOperationsFactory::new(iam_client.clone())),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        max_concurrent_reconciles: 2,
    });
    registry.register(ProviderRegistration {
        factory: Arc::new(IamRoleOperationsFactory::new(iam_client)),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        max_concurrent_reconciles: 2,
    });
    registry.register(ProviderRegistration {
        factory: Arc::new(SecretPushOperationsFactory::new(secrets_client)),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        max_concurrent_reconciles: 2,
    });
    registry.register(ProviderRegistration {
        factory: Arc::new(ConfigReaderOperationsFactory::new()),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        max_concurrent_reconciles: 4,
    });

    registry
}

/// Secondary entrypoint: builds the provider registry, then spawns one
/// controller task per selected provider plus an optional metrics
/// server, and waits on all of them forever.
async fn run(client: Client) {
    let cli = Cli::parse();

    if let Some(metrics_port) = cli.metrics_port {
        tokio::spawn(metrics::run_server(metrics_port));
    }

    let registry = build_registry(client.clone(), cli.helm_cache_dir).await;
    let store = Arc::new(KubeComponentStore::new(client.clone()));

    let selected: Vec<String> = match cli.providers {
        Some(names) => names,
        None => registry.provider_names().map(str::to_owned).collect(),
    };

    let mut handles = Vec::with_capacity(selected.len());
    for provider_name in selected {
        let Some(registration) = registry.get(&provider_name) else {
            panic!("no factory registered for provider {provider_name}");
        };
        let engine = Arc::new(EngineContext {
            store: store.clone(),
            provider_name: provider_name.clone(),
            factory: registration.factory.clone(),
            classifier: registration.classifier.clone(),
            requeue: registration.requeue,
            cancellation: CancellationToken::new(),
            metrics: componentkit::ControllerMetrics::new(provider_name.clone()),
        });
        handles.push(tokio::spawn(controller::run(client.clone(), engine)));
    }

    for handle in handles {
        let _ = handle.await;
    }

    panic!("all controllers exited unexpectedly");
}

/// Main entrypoint that sets up the environment before running the
/// secondary entrypoint `run`.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Set the panic hook to exit the process with a non-zero exit code
    // when a panic occurs on any thread. A controller task or the
    // metrics server panicking should always restart the container.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // Create a kubernetes client using the default configuration.
    // In-cluster, the kubeconfig will be set by the service account.
    let client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    run(client).await;

    // This is an unreachable branch. The controllers and metrics
    // server should never exit without a panic.
    panic!("exited prematurely");
}
