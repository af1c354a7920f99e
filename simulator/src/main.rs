//! FXQL Simulator
//!
//! Drives an in-process gateway with simulated clients, either through a
//! named scenario or continuously with generated traffic.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use fxql_gateway::GatewayConfig;
use scenario::Scenario;

/// FXQL Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Load and scenario simulator for the FXQL gateway")]
struct Args {
    /// Number of simulated clients to create
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Scenario to run
    #[arg(short, long)]
    scenario: Option<String>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = infinite)
    #[arg(long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting FXQL Simulator");
    info!("Clients: {}", args.clients);
    info!("Speed: {}x", args.speed);

    let config = GatewayConfig::from_env();
    config.validate()?;

    let mut controller = SimulationController::new(config, args.clients, args.speed, args.seed);
    controller.initialize().await?;

    info!("Simulator initialized with {} clients", args.clients);

    let outcome = if let Some(scenario_name) = &args.scenario {
        info!("Running scenario: {}", scenario_name);

        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await
    } else {
        info!("Running in continuous mode");
        info!("Press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(std::time::Duration::from_secs(args.duration))
        } else {
            None
        };

        controller.run(duration).await
    };

    controller.stop().await?;

    let metrics = controller.get_metrics().await;
    info!("Simulation complete");
    info!("Total requests: {}", metrics.total_requests);
    info!("Successful: {}", metrics.successful_requests);
    info!("Replayed: {}", metrics.replayed_requests);
    info!("Rate limited: {}", metrics.rate_limited_requests);
    info!("Rejected: {}", metrics.rejected_requests);
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );
    info!("Gateway metrics:\n{}", controller.gateway_metrics());

    outcome
}
