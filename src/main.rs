use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use stackyield_sequencer::api::{create_router, AppState};
use stackyield_sequencer::chain::{DestinationChain, EthereumGateway, SourceChain, StacksClient};
use stackyield_sequencer::config::load_config;
use stackyield_sequencer::db::{DBClient, StateStore};
use stackyield_sequencer::events::DepositWatcher;
use stackyield_sequencer::logging::init_tracing;
use stackyield_sequencer::queue::{BridgeQueue, WithdrawalQueue};
use stackyield_sequencer::reconcile::Reconciler;
use stackyield_sequencer::scheduler::{run_job, shutdown_channel, wait_for_shutdown, Job};
use stackyield_sequencer::withdrawal_request::WithdrawalRequester;

#[derive(Parser, Debug)]
#[command(name = "stackyield-sequencer", about = "Deposit/withdrawal sequencer for StackYield")]
struct Cli {
    /// Optional TOML config file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Starting StackYield sequencer");

    let db = DBClient::new(&config).await.context("connecting to Postgres")?;
    db.run_migrations().await?;
    let store: Arc<dyn StateStore> = Arc::new(db.state_store());

    let gateway = EthereumGateway::connect(&config.ethereum).await?;
    let height = gateway.current_height().await?;
    info!(height, gateway = %config.ethereum.gateway_address, "Connected to Ethereum");
    let source: Arc<dyn SourceChain> = Arc::new(gateway);

    let stacks = StacksClient::new(&config.stacks)?;
    let tip = stacks.tip_height().await?;
    info!(tip, api = %config.stacks.api_url, "Connected to Stacks");
    let destination: Arc<dyn DestinationChain> = Arc::new(stacks);

    if config.jobs.reconcile_on_startup {
        let report = Reconciler::new(store.clone(), source.clone())
            .sweep()
            .await?;
        if report.deposits.needs_reconciliation() + report.withdrawals.needs_reconciliation() > 0 {
            error!("Some records need manual reconciliation, see the operator CLI");
        }
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut tasks = Vec::new();

    let watcher = Arc::new(DepositWatcher::new(
        store.clone(),
        source.clone(),
        config.fees.schedule()?,
        config.ingestor.clone(),
    ));
    if config.ingestor.subscribe {
        let watcher = watcher.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { watcher.run_subscription(rx).await }));
    }

    let ingestor: Arc<dyn Job> = watcher;
    let bridge: Arc<dyn Job> = Arc::new(BridgeQueue::new(
        store.clone(),
        source.clone(),
        destination.clone(),
    ));
    let settlement: Arc<dyn Job> = Arc::new(WithdrawalQueue::new(
        store.clone(),
        source.clone(),
        destination.clone(),
    ));
    let jobs = [
        (ingestor, config.ingestor.poll_interval()),
        (bridge, config.jobs.bridge_interval()),
        (settlement, config.jobs.withdrawal_interval()),
    ];
    for (job, interval) in jobs {
        tasks.push(tokio::spawn(run_job(job, interval, shutdown_rx.clone())));
    }

    let state = Arc::new(AppState {
        store: store.clone(),
        requester: Arc::new(WithdrawalRequester::new(store.clone(), destination.clone())),
    });
    let listener = TcpListener::bind(config.server.bind_address()).await?;
    info!(address = %config.server.bind_address(), "API listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(async move { wait_for_shutdown(&mut server_shutdown).await })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for in-flight work");
    shutdown_tx.send(true)?;

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task panicked");
        }
    }
    server.await??;

    info!("StackYield sequencer stopped");
    Ok(())
}
