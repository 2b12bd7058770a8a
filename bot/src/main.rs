// bot/src/main.rs

// --- Imports ---
use clap::Parser;
use converter_keeper::{
    events::{ChannelSink, FanoutSink, JsonLinesSink, TracingSink},
    load_config, ConversionFilter, EthersGateway, EventSink, Keeper, QuoterRouter, RunStatus, SubgraphIndex,
};
use ethers::types::Address;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// --- CLI Argument Parsing ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Token converter keeper", long_about = None)]
struct Cli {
    /// Only consider configurations of this converter.
    #[arg(long, value_name = "ADDRESS")]
    converter: Option<Address>,

    /// Token the converter receives.
    #[arg(long = "asset-in", value_name = "ADDRESS")]
    asset_in: Option<Address>,

    /// Token the converter pays out.
    #[arg(long = "asset-out", value_name = "ADDRESS")]
    asset_out: Option<Address>,

    /// Simulate conversions without submitting them.
    #[arg(long)]
    dry_run: bool,

    /// Release market reserves before converting.
    #[arg(long)]
    pre_release: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Skip accrueInterest and reduceReserves.
    #[arg(long)]
    skip_maintenance: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

// --- Main Execution ---
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config()?;
    config.dry_run |= cli.dry_run;
    config.pre_release |= cli.pre_release;

    let gateway = EthersGateway::connect(&config).await?;
    config.chain_id.get_or_insert(gateway.chain_id());
    let client = gateway.client();

    // --- Event sinks ---
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sinks = FanoutSink::new().with(Arc::new(TracingSink)).with(Arc::new(ChannelSink::new(tx)));
    if let Some(path) = &config.event_log_path {
        sinks = sinks.with(Arc::new(JsonLinesSink::create(path)?));
    }
    let sink: Arc<dyn EventSink> = Arc::new(sinks);

    let status_task = tokio::spawn(async move {
        let mut status = RunStatus::default();
        while let Some(event) = rx.recv().await {
            status.apply(&event);
        }
        status
    });

    let index = SubgraphIndex::new(config.subgraph_url.clone()).wrap_err("Failed to build subgraph client")?;
    let optimizer = QuoterRouter::new(client, &config);
    let filter = ConversionFilter { converter: cli.converter, asset_in: cli.asset_in, asset_out: cli.asset_out };
    let keeper = Keeper::new(config, Arc::new(gateway), Arc::new(index), Arc::new(optimizer), sink);
    let with_maintenance = !cli.skip_maintenance;

    if cli.once {
        let report = keeper.run_cycle(&filter, with_maintenance).await?;
        info!(?report, "Single cycle finished");
    } else {
        tokio::select! {
            _ = keeper.run_forever(filter, with_maintenance) => {}
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, shutting down"),
        }
    }

    // Dropping the keeper closes the channel so the status task can finish.
    drop(keeper);
    let status = status_task.await.wrap_err("Status task panicked")?;
    info!(status = %serde_json::to_string(&status).unwrap_or_default(), "Final status");
    Ok(())
}
