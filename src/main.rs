//! numpulse CLI entry point

use anyhow::{Context, Result};
use numpulse::config::cli::{Cli, ExecutionMode};
use numpulse::config::{toml, validator, Config};
use numpulse::distributed::node_service::spawn_local_fleet;
use numpulse::distributed::protocol::{read_line, write_line, ClientRequest};
use numpulse::distributed::{DistributedCoordinator, NodeService};
use numpulse::output::json::{write_json_output, JsonReport};
use numpulse::output::{text, QueryResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;
    init_tracing(cli.debug);

    println!("numpulse v{}", env!("CARGO_PKG_VERSION"));
    println!("Distributed number store and query engine");
    println!();

    let config = toml::load_config(&cli)?;
    validator::validate_config(&config, cli.mode).context("Configuration validation failed")?;

    if cli.dry_run {
        print!("{}", config);
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async {
        match cli.mode {
            ExecutionMode::Standalone => run_standalone(&cli, config).await,
            ExecutionMode::Service => run_service(config).await,
            ExecutionMode::Coordinator => run_coordinator(config).await,
            ExecutionMode::Query => run_query(&cli, config).await,
        }
    })
}

/// Logs go to stderr; `RUST_LOG` wins over `--debug`
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Run queries against in-process workers, or serve clients if none were given
async fn run_standalone(cli: &Cli, config: Config) -> Result<()> {
    print!("{}", config);
    println!("  Workers: {} (in-process)", cli.workers);
    println!();

    let fleet = spawn_local_fleet(&config.store, cli.workers)?;
    let listen_addr = config.coordinator.listen_addr.clone();
    let json_output = config.output.json_output.clone();
    let coordinator = Arc::new(DistributedCoordinator::from_fleet(Arc::new(config), fleet));

    if cli.queries.is_empty() {
        let listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen_addr))?;
        println!("Serving clients on {}", listen_addr);
        return coordinator.serve(listener).await;
    }

    let mut report = JsonReport::new("standalone", coordinator.worker_ids().await);
    for query in &cli.queries {
        let request = ClientRequest::parse(query).with_context(|| format!("Invalid query '{}'", query))?;
        let start = Instant::now();
        let outcome = coordinator.execute(request).await;
        let elapsed = start.elapsed();

        match &outcome {
            Ok(result) => text::print_result(query, result, elapsed),
            Err(e) => text::print_failure(query, &e.to_string()),
        }
        report.record(query, outcome.as_ref().map_err(|e| e.to_string()), elapsed);
    }

    if let Some(path) = json_output {
        write_json_output(&path, &report, true)?;
        println!();
        println!("JSON report written to {}", path.display());
    }
    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    let service = NodeService::bind(&config).await.context("Failed to start worker service")?;
    println!("Worker service listening on {}", service.local_addr()?);
    println!("Node ID: {}", service.node_id());
    println!("Data dir: {}", config.store.data_dir.display());
    println!("Waiting for coordinator connection...");
    service.run().await
}

async fn run_coordinator(config: Config) -> Result<()> {
    print!("{}", config);
    println!();

    let listen_addr = config.coordinator.listen_addr.clone();
    let coordinator = Arc::new(DistributedCoordinator::connect(Arc::new(config)).await?);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;

    println!("Coordinator listening on {}", listen_addr);
    for (i, worker) in coordinator.worker_ids().await.iter().enumerate() {
        println!("  Worker {}: {}", i, worker);
    }
    coordinator.serve(listener).await
}

/// Send queries to a running coordinator and print the replies
async fn run_query(cli: &Cli, config: Config) -> Result<()> {
    let stream = TcpStream::connect(&cli.coordinator)
        .await
        .with_context(|| format!("Failed to connect to coordinator {}", cli.coordinator))?;
    info!(coordinator = %cli.coordinator, "connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut report = JsonReport::new("query", vec![cli.coordinator.clone()]);
    for query in &cli.queries {
        let request = ClientRequest::parse(query).with_context(|| format!("Invalid query '{}'", query))?;
        let start = Instant::now();
        write_line(&mut write_half, &request.encode()).await?;
        let line = read_line(&mut reader)
            .await?
            .context("Coordinator closed the connection")?;
        let elapsed = start.elapsed();

        match QueryResult::parse_reply(&request, &line) {
            Ok(result) => {
                text::print_result(query, &result, elapsed);
                report.record(query, Ok(&result), elapsed);
            }
            Err(e) => {
                text::print_failure(query, &e.to_string());
                report.record(query, Err(e.to_string()), elapsed);
            }
        }
    }

    if let Some(ref path) = config.output.json_output {
        write_json_output(path, &report, true)?;
        println!();
        println!("JSON report written to {}", path.display());
    }
    Ok(())
}
