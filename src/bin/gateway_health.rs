//! gateway-health: operator view of the gateway's downstream services
//!
//! Usage:
//!   gateway-health status [--wait-ms <n>] [--config <file>]   Breaker and instance health as JSON
//!   gateway-health probe <base-url> [--path <p>]              Probe one instance once

use anyhow::{bail, Context};
use gateway_resilience::health::probe_endpoint;
use gateway_resilience::transport::HttpTransport;
use gateway_resilience::{Gateway, GatewayConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "status" => cmd_status(&args[2..]).await,
        "probe" => cmd_probe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"gateway-health: downstream health and circuit breaker status

USAGE:
    gateway-health <COMMAND> [OPTIONS]

COMMANDS:
    status [--wait-ms <n>] [--config <file>]
                                Start the resilience layer, run one probe round,
                                print breaker and instance health as JSON
    probe <base-url> [--path <p>] [--timeout-ms <n>]
                                Probe a single instance and print its classification
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    <SERVICE>_SERVICE_URL       Comma-separated static URLs (SEGMENTATION, RUNNER, ARCHIVE)
    USE_SERVICE_REGISTRY        Enable the central service registry
    SERVICE_REGISTRY_URL        Central service registry base URL
    HEALTH_CHECK_TIMEOUT_MS     Per-probe timeout
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn cmd_version() {
    println!("gateway-health {}", env!("CARGO_PKG_VERSION"));
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn flag_millis(args: &[String], name: &str) -> anyhow::Result<Option<Duration>> {
    flag_value(args, name)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("{name} expects milliseconds, got {raw:?}"))
        })
        .transpose()
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let config = match flag_value(args, "--config") {
        Some(path) => GatewayConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => GatewayConfig::from_env(),
    };
    let wait = flag_millis(args, "--wait-ms")?;

    let mut gateway = Gateway::start(config).context("starting gateway")?;
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => {
            gateway.probe_now().await;
        }
    }

    let status = gateway.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    gateway.shutdown();
    Ok(())
}

async fn cmd_probe(args: &[String]) -> anyhow::Result<()> {
    let Some(base_url) = args.first().filter(|a| !a.starts_with("--")) else {
        bail!("probe requires a base URL");
    };
    url::Url::parse(base_url).with_context(|| format!("invalid base URL {base_url:?}"))?;

    let path = flag_value(args, "--path").unwrap_or("/health");
    let timeout = flag_millis(args, "--timeout-ms")?.unwrap_or(Duration::from_secs(5));
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);

    let transport = HttpTransport::new()?;
    let outcome = probe_endpoint(&transport, &url, timeout).await;

    let report = serde_json::json!({
        "url": url,
        "status": outcome.status,
        "version": outcome.version,
        "metadata": outcome.metadata,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
