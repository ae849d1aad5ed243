//! rmq-heal CLI
//!
//! Runs RabbitMQ health cycles once (`check`) or continuously (`watch`), and
//! prints the raw state the rules work from (`inventory`, `describe`, `logs`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rmq_heal::collectors::{BrokerApi, KubeOrchestrator, ManagementClient, Orchestrator};
use rmq_heal::reporter::{render_inventory, ConsoleSink, LogSink, MetricsSink, OutputFormat};
use rmq_heal::server::{self, ServerState};
use rmq_heal::{Config, CycleOutcome, Doctor, FetchPlan, Reporter, Severity, SnapshotFetcher};

/// RabbitMQ health diagnostics with rate-limited pod remediation
#[derive(Parser)]
#[command(name = "rmq-heal")]
#[command(about = "RabbitMQ health diagnostics with rate-limited pod remediation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(long, short, global = true, env = "RMQ_HEAL_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Management API base URL
    #[arg(long, global = true, env = "RABBITMQ_URL")]
    url: Option<String>,

    /// Management API user
    #[arg(long, global = true, env = "RABBITMQ_USER")]
    user: Option<String>,

    /// Management API password
    #[arg(long, global = true, env = "RABBITMQ_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Namespace of the broker pods
    #[arg(long, short, global = true)]
    namespace: Option<String>,

    /// Label selector matching the broker pods
    #[arg(long, global = true)]
    label_selector: Option<String>,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single health cycle and exit
    Check {
        /// Restart unhealthy broker pods
        #[arg(long)]
        remediate: bool,
    },
    /// Run health cycles until interrupted
    Watch {
        /// Restart unhealthy broker pods
        #[arg(long)]
        remediate: bool,

        /// Seconds between cycles (overrides cycle.interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Serve /metrics, /healthz and /remediations on this address
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
    /// Print bindings, queues, connections, channels, nodes and pods
    Inventory,
    /// Print the broker custom resource as YAML
    Describe,
    /// Print the log tail of every broker pod
    Logs {
        /// Lines per pod (overrides orchestrator.log_tail_lines)
        #[arg(long)]
        tail: Option<i64>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rmq_heal=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(url) = &cli.url {
        config.broker.url.clone_from(url);
    }
    if let Some(user) = &cli.user {
        config.broker.username.clone_from(user);
    }
    if let Some(password) = &cli.password {
        config.broker.password.clone_from(password);
    }
    if let Some(namespace) = &cli.namespace {
        config.orchestrator.namespace.clone_from(namespace);
    }
    if let Some(selector) = &cli.label_selector {
        config.orchestrator.label_selector.clone_from(selector);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn connect_broker(config: &Config) -> Result<Arc<ManagementClient>> {
    let client = ManagementClient::new(&config.broker).context("Failed to build HTTP client")?;
    let version = client
        .check_connection()
        .await
        .with_context(|| format!("RabbitMQ management API unreachable at {}", config.broker.url))?;
    info!(url = %config.broker.url, version = %version, "Connected to RabbitMQ");
    Ok(Arc::new(client))
}

async fn connect_orchestrator(config: &Config) -> Result<Arc<KubeOrchestrator>> {
    let orchestrator = KubeOrchestrator::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let pods = orchestrator
        .list_pods(
            &config.orchestrator.namespace,
            &config.orchestrator.label_selector,
        )
        .await
        .with_context(|| {
            format!(
                "Kubernetes API unreachable for namespace {}",
                config.orchestrator.namespace
            )
        })?;
    info!(
        namespace = %config.orchestrator.namespace,
        pods = pods.len(),
        "Connected to Kubernetes"
    );
    Ok(Arc::new(orchestrator))
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        token.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Check { remediate } => {
            let broker = connect_broker(&config).await?;
            let orchestrator = connect_orchestrator(&config).await?;
            let reporter = Reporter::default().with_sink(Arc::new(ConsoleSink::new(cli.format)));
            let mut doctor = Doctor::from_config(
                &config,
                broker,
                orchestrator,
                reporter,
                *remediate || config.remediation.enabled,
            );

            let outcome = doctor.run_cycle(&shutdown_token()).await;
            Ok(exit_code(&outcome))
        }
        Commands::Watch {
            remediate,
            interval,
            metrics_addr,
        } => {
            let broker = connect_broker(&config).await?;
            let orchestrator = connect_orchestrator(&config).await?;
            let metrics = Arc::new(MetricsSink::new());
            let reporter = Reporter::default()
                .with_sink(Arc::new(ConsoleSink::new(cli.format)))
                .with_sink(Arc::new(LogSink::new()))
                .with_sink(metrics.clone());
            let mut doctor = Doctor::from_config(
                &config,
                broker,
                orchestrator,
                reporter,
                *remediate || config.remediation.enabled,
            );

            let cancel = shutdown_token();
            let server = metrics_addr.map(|addr| {
                let state = Arc::new(ServerState {
                    metrics,
                    remediation: doctor.remediation().cloned(),
                });
                tokio::spawn(server::serve(addr, state, cancel.clone()))
            });

            let interval = Duration::from_secs(interval.unwrap_or(config.cycle.interval_secs));
            doctor.run(interval, cancel.clone()).await;

            if let Some(server) = server {
                match server.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Metrics endpoint failed"),
                    Err(e) => warn!(error = %e, "Metrics endpoint task panicked"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inventory => {
            let broker = connect_broker(&config).await?;
            let orchestrator = connect_orchestrator(&config).await?;
            let fetcher = SnapshotFetcher::new(
                broker as Arc<dyn BrokerApi>,
                orchestrator as Arc<dyn Orchestrator>,
                FetchPlan::from_config(&config),
            );
            let snapshot = fetcher
                .fetch(&shutdown_token())
                .await
                .context("Failed to collect inventory")?;

            match cli.format {
                OutputFormat::Text => print!("{}", render_inventory(&snapshot)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Describe => {
            let orchestrator = KubeOrchestrator::try_default()
                .await
                .context("Failed to create Kubernetes client")?;
            let resource = &config.orchestrator.custom_resource;
            let object = orchestrator
                .get_custom_resource(resource, &config.orchestrator.namespace)
                .await
                .with_context(|| format!("Failed to read {} {}", resource.kind, resource.name))?;

            match cli.format {
                OutputFormat::Text => print!("{}", serde_yaml::to_string(&object)?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&object)?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Logs { tail } => {
            let orchestrator = KubeOrchestrator::try_default()
                .await
                .context("Failed to create Kubernetes client")?;
            let namespace = &config.orchestrator.namespace;
            let pods = orchestrator
                .list_pods(namespace, &config.orchestrator.label_selector)
                .await
                .context("Failed to list broker pods")?;
            let tail = Some(tail.unwrap_or(config.orchestrator.log_tail_lines));

            for pod in &pods {
                println!("{}", format!("==> {namespace}/{} <==", pod.name).bold());
                match orchestrator.get_pod_logs(namespace, &pod.name, tail).await {
                    Ok(logs) => print!("{logs}"),
                    Err(e) => eprintln!("{}", format!("Failed to fetch logs: {e}").red()),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 0 when healthy or only informational, 1 when the cycle aborted,
/// 2 on warnings, 3 on critical findings
fn exit_code(outcome: &CycleOutcome) -> ExitCode {
    match outcome {
        CycleOutcome::Aborted(_) => ExitCode::from(1),
        CycleOutcome::Completed { findings, .. } => {
            match findings.iter().map(|f| f.severity).max() {
                Some(Severity::Critical) => ExitCode::from(3),
                Some(Severity::Warning) => ExitCode::from(2),
                Some(Severity::Info) | None => ExitCode::SUCCESS,
            }
        }
    }
}
