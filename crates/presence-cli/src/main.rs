use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use presence_core::probe::measure;
use presence_core::{
    parse_request, ConfigField, ConfigStore, MqttTransport, Notification, NotificationBridge,
    PingProber, PresenceMonitor, PresenceService, ProbeReport, RuntimeConfig,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(test)]
mod main_tests;
mod settings;

use settings::FlagOverrides;

#[derive(Debug, Parser)]
#[command(name = "presenced")]
#[command(about = "Ping a host and publish its presence over MQTT")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with config keys (brokerAddress, pingTarget, targetTopics, ...)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    broker: Option<String>,

    #[arg(long)]
    port: Option<i64>,

    #[arg(long)]
    ping_target: Option<String>,

    #[arg(long)]
    wait_time: Option<i64>,

    #[arg(long)]
    monitor_topic: Option<String>,

    #[arg(long)]
    leds_topic: Option<String>,

    #[arg(long)]
    scenario_topic: Option<String>,

    /// Repeat for several stable-state topics
    #[arg(long = "target-topic")]
    target_topics: Vec<String>,

    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    retry_ms: u64,

    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout_ms: u64,

    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    probe_timeout_ms: u64,

    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    ready_interval_ms: u64,

    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    keep_alive_secs: u64,

    #[arg(long, default_value = "presenced")]
    instance: String,

    /// Overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn flag_overrides(&self) -> FlagOverrides {
        FlagOverrides {
            broker: self.broker.clone(),
            port: self.port,
            ping_target: self.ping_target.clone(),
            wait_time: self.wait_time,
            monitor_topic: self.monitor_topic.clone(),
            leds_topic: self.leds_topic.clone(),
            scenario_topic: self.scenario_topic.clone(),
            target_topics: self.target_topics.clone(),
        }
    }

    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            tick_interval: Duration::from_millis(self.interval_ms),
            retry_interval: Duration::from_millis(self.retry_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            ready_interval: Duration::from_millis(self.ready_interval_ms),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            instance: self.instance.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the monitor; config patches are read as JSON lines on stdin
    Run {
        #[arg(long, value_enum, default_value = "ndjson")]
        format: OutputFormat,
    },
    /// Probe the ping target once without touching the broker
    Once {
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Validate the configuration and exit
    Check,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let overrides = settings::collect_overrides(cli.config.as_deref(), &cli.flag_overrides())?;
    let store = ConfigStore::seeded(&overrides);
    let runtime = cli.runtime_config();

    match cli.command {
        Command::Run { format } => {
            run_daemon(store, runtime, format).await?;
            // The stdin reader sits in a blocking read that runtime shutdown would wait on.
            std::process::exit(0);
        }
        Command::Once { format } => {
            let Some(target) = store.current().ping_target.clone() else {
                bail!("pingTarget is not configured");
            };
            let mut prober = PingProber::new(runtime.probe_timeout);
            let report = measure(&mut prober, &target).await;
            print_probe(&report, format)?;
        }
        Command::Check => {
            let fields = ConfigField::ALL
                .iter()
                .map(|field| {
                    (
                        field.key().to_string(),
                        Value::Bool(store.is_valid(Some(&[*field]))),
                    )
                })
                .collect::<Map<String, Value>>();
            let ready = store.is_valid(None);
            let out = serde_json::json!({
                "ready": ready,
                "fields": fields,
                "config": store.current(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            if !ready {
                let invalid = store
                    .invalid_fields()
                    .iter()
                    .map(|f| f.key())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!("configuration is not ready: {invalid}");
            }
        }
    }

    Ok(())
}

async fn run_daemon(store: ConfigStore, runtime: RuntimeConfig, format: OutputFormat) -> Result<()> {
    let (bridge, notifications) = NotificationBridge::channel();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_requests(requests_tx));
    let printer = tokio::spawn(print_notifications(notifications, format));

    let transport = MqttTransport::new(&runtime.instance, runtime.keep_alive);
    info!(client_id = %transport.client_id(), "mqtt client");
    let monitor = PresenceMonitor::new(PingProber::new(runtime.probe_timeout));
    let service = PresenceService::new(runtime, store, transport, monitor, bridge);

    service
        .run(requests_rx, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    printer.await??;
    Ok(())
}

async fn read_requests(tx: mpsc::UnboundedSender<Map<String, Value>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match parse_request(&line) {
                Ok(patch) => {
                    if tx.send(patch).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "skipping config request"),
            },
            Ok(None) => {
                info!("stdin closed, no further config requests");
                break;
            }
            Err(err) => {
                warn!(error = %err, "failed to read config requests");
                break;
            }
        }
    }
}

async fn print_notifications(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    format: OutputFormat,
) -> Result<()> {
    while let Some(notification) = notifications.recv().await {
        print_notification(&notification, format)?;
    }
    Ok(())
}

fn print_notification(notification: &Notification, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(notification)?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(notification)?),
        OutputFormat::Human => match notification {
            Notification::State(state) => println!("State:      {state}"),
            Notification::Ready(ready) => println!("Ready:      {ready}"),
            Notification::ConfigApplied { changed } => println!("Config:     applied (changed={changed})"),
            Notification::ConfigRejected { error } => println!("Config:     rejected ({error})"),
        },
    }
    Ok(())
}

fn print_probe(report: &ProbeReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Human => {
            println!("=== Presence Probe ===");
            println!("Time:       {}", report.ts.to_rfc3339());
            println!("Target:     {}", report.target);
            println!("Alive:      {} rtt_ms={}", report.alive, report.rtt_ms);
            if let Some(error) = &report.error {
                println!("Error:      {error}");
            }
        }
    }
    Ok(())
}
