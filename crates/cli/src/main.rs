use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use conformity_config::Config;
use conformity_core::CycleReport;
use conformity_kubehub::{connect, ClientOptions, KubeSource};
use conformity_notify::{has_findings, present_lines, EmailReporter, LogReporter, Reporter};
use conformity_runner::{ConformityRunner, CycleError};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod http;

#[derive(Parser, Debug)]
#[command(name = "kube-conformity", version, about = "Report cluster objects that break conformity rules")]
struct Cli {
    /// Path to the YAML config
    #[arg(long = "config-location", global = true, default_value = "config.yaml")]
    config_location: PathBuf,

    /// Kubeconfig file (default: in-cluster or ~/.kube/config)
    #[arg(long = "kube-config", global = true)]
    kube_config: Option<PathBuf>,

    /// API server URL, overrides the kubeconfig
    #[arg(long = "master", global = true)]
    master: Option<String>,

    #[arg(long = "debug", global = true, action = ArgAction::SetTrue)]
    debug: bool,

    #[arg(long = "json-logging", global = true, action = ArgAction::SetTrue)]
    json_logging: bool,

    /// Address for /metrics, /healthz and the config page while running
    #[arg(long = "metrics-addr", global = true, env = "KUBE_CONFORMITY_METRICS_ADDR", default_value = "0.0.0.0:8000")]
    metrics_addr: String,

    /// Do not start the HTTP endpoints
    #[arg(long = "disable-http", global = true, action = ArgAction::SetTrue)]
    disable_http: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// Evaluate every interval until interrupted (default)
    Run,
    /// Evaluate once and exit non-zero on findings
    Check {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
        output: Output,
    },
    /// Load the config and print the resulting rules
    Validate {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
        output: Output,
    },
}

fn filter_directive(debug: bool, env: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    env.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| "info".to_string())
}

fn init_tracing(debug: bool, json: bool) {
    let env = filter_directive(debug, std::env::var("KUBE_CONFORMITY_LOG").ok());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

/// Install the Prometheus recorder and serve it with the health and config endpoints.
async fn start_http(cli: &Cli, config: &Config, cancel: CancellationToken) -> Result<Option<tokio::task::JoinHandle<()>>> {
    if cli.disable_http {
        return Ok(None);
    }
    let addr: SocketAddr = cli
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {}; expected host:port", cli.metrics_addr))?;
    let handle = PrometheusBuilder::new().install_recorder().context("installing metrics recorder")?;
    let page = http::landing_page(config)?;
    Ok(Some(http::spawn(addr, http::HttpState::new(handle, page), cancel).await?))
}

async fn build_runner(cli: &Cli, config: &Config) -> Result<ConformityRunner<KubeSource>> {
    let opts = ClientOptions { kube_config: cli.kube_config.clone(), master: cli.master.clone() };
    let client = connect(&opts).await?;
    let rules = config.rule_set()?;
    info!(rules = rules.len(), interval_secs = config.interval.as_secs(), "conformity rules loaded");
    let source = KubeSource::new(client).with_page_size(config.page_size);
    Ok(ConformityRunner::new(source, rules).with_list_timeout(config.list_timeout))
}

fn reporters(config: &Config) -> Result<Vec<Box<dyn Reporter>>> {
    let mut out: Vec<Box<dyn Reporter>> = vec![Box::new(LogReporter)];
    if let Some(email) = config.enabled_email() {
        out.push(Box::new(EmailReporter::new(email.clone())?));
        info!(to = %email.to, host = %email.host, "email reporting enabled");
    }
    Ok(out)
}

async fn publish(reporters: &[Box<dyn Reporter>], report: &CycleReport) {
    for r in reporters {
        if let Err(e) = r.report(report).await {
            warn!(error = ?e, "reporter failed");
            metrics::counter!("conformity_report_failures_total", 1u64);
        }
    }
}

async fn run_loop(runner: ConformityRunner<KubeSource>, reporters: Vec<Box<dyn Reporter>>, interval: Duration, cancel: CancellationToken) {
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("interrupt received; stopping after the current kind");
                cancel.cancel();
            }
        }
    });
    loop {
        match runner.run_cycle(&cancel).await {
            Ok(report) => publish(&reporters, &report).await,
            Err(CycleError::Cancelled(kind)) => {
                info!(kind = %kind, "cycle abandoned");
                break;
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    interrupt.abort();
    info!("shut down");
}

fn print_report(report: &CycleReport, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for line in present_lines(report) {
                println!("{}", line);
            }
            for failure in report.failures.iter() {
                println!("error: {}", failure);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.json_logging);

    let config = Config::from_path(&cli.config_location)
        .with_context(|| format!("loading config {}", cli.config_location.display()))?;

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => {
            let reporters = reporters(&config)?;
            let runner = build_runner(&cli, &config).await?;
            let cancel = CancellationToken::new();
            let server = start_http(&cli, &config, cancel.clone()).await?;
            run_loop(runner, reporters, config.interval, cancel.clone()).await;
            cancel.cancel();
            if let Some(server) = server {
                let _ = server.await;
            }
        }
        Commands::Check { output } => {
            let runner = build_runner(&cli, &config).await?;
            let report = runner.run_cycle(&CancellationToken::new()).await?;
            print_report(&report, output)?;
            if has_findings(&report) {
                std::process::exit(1);
            }
        }
        Commands::Validate { output } => {
            let summary = config.rule_set()?.summary();
            match output {
                Output::Human => {
                    println!("interval: {:?}", config.interval);
                    println!("KIND         NAME                      FILTERS");
                    for s in summary.iter() {
                        let stages = if s.filter_stages.is_empty() { "-".to_string() } else { s.filter_stages.join(",") };
                        println!("{:<12} {:<25} {}", s.kind.as_str(), s.name, stages);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
        }
    }
    Ok(())
}
