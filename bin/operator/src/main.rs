use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use stackyield_sequencer::chain::{EthereumGateway, SourceChain, StacksClient};
use stackyield_sequencer::config::{load_config, AppConfig};
use stackyield_sequencer::db::{DBClient, StateStore};
use stackyield_sequencer::lifecycle::{ItemOutcome, TickReport};
use stackyield_sequencer::logging::init_tracing;
use stackyield_sequencer::reconcile::Reconciler;
use stackyield_sequencer::withdrawal_request::WithdrawalRequester;

fn id_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name.replace('_', "-"))
        .value_name("UUID")
        .help(help)
        .required(true)
        .value_parser(clap::value_parser!(Uuid))
}

fn get_id(matches: &ArgMatches, name: &str) -> anyhow::Result<Uuid> {
    matches
        .get_one::<Uuid>(name)
        .copied()
        .with_context(|| format!("missing --{}", name.replace('_', "-")))
}

fn cli() -> Command {
    Command::new("operator")
        .version("0.1.0")
        .about("Operator actions for the StackYield sequencer")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("CONFIG_FILE")
                .help("Path to configuration file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand_required(true)
        .subcommand(Command::new("reconcile").about("Run the reconciliation sweep once"))
        .subcommand(
            Command::new("show")
                .about("Print a deposit and its active withdrawal")
                .arg(id_arg("deposit_id", "Deposit to inspect")),
        )
        .subcommand(
            Command::new("retry-withdrawal")
                .about("Re-issue the unstake for a deposit whose withdrawal failed")
                .arg(id_arg("deposit_id", "Deposit in WITHDRAW_REQUESTED")),
        )
        .subcommand(
            Command::new("abandon")
                .about("Mark a deposit with a failed withdrawal as FAILED")
                .arg(id_arg("deposit_id", "Deposit in WITHDRAW_REQUESTED")),
        )
        .subcommand(
            Command::new("clear-bridge-claim")
                .about("Allow the bridge scheduler to retry a stake that never landed")
                .arg(id_arg("deposit_id", "RECEIVED deposit with a bridge claim")),
        )
        .subcommand(
            Command::new("clear-release-claim")
                .about("Allow the withdrawal scheduler to retry a release that never landed")
                .arg(id_arg("withdrawal_id", "PENDING withdrawal with a release claim")),
        )
}

fn print_report(label: &str, report: &TickReport) {
    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Advanced => println!("{label} {}: settled", item.id),
            ItemOutcome::Unchanged => println!("{label} {}: unchanged", item.id),
            ItemOutcome::NeedsReconciliation(reason) => {
                println!("{label} {}: needs manual check ({reason})", item.id)
            }
            ItemOutcome::Failed { kind, message } => {
                println!("{label} {}: failed [{kind:?}] {message}", item.id)
            }
        }
    }
}

async fn connect_source(config: &AppConfig) -> anyhow::Result<Arc<dyn SourceChain>> {
    Ok(Arc::new(EthereumGateway::connect(&config.ethereum).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    init_tracing(&config.logging);

    let db = DBClient::new(&config).await.context("connecting to Postgres")?;
    let store: Arc<dyn StateStore> = Arc::new(db.state_store());

    match matches.subcommand() {
        Some(("reconcile", _)) => {
            let reconciler = Reconciler::new(store, connect_source(&config).await?);
            let report = reconciler.sweep().await?;
            print_report("deposit", &report.deposits);
            print_report("withdrawal", &report.withdrawals);
        }
        Some(("show", sub)) => {
            let deposit_id = get_id(sub, "deposit_id")?;
            let deposit = store
                .find_deposit(deposit_id)
                .await?
                .with_context(|| format!("deposit {deposit_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&deposit)?);
            if let Some(withdrawal) = store.find_active_withdrawal(deposit_id).await? {
                println!("{}", serde_json::to_string_pretty(&withdrawal)?);
            }
        }
        Some(("retry-withdrawal", sub)) => {
            let deposit_id = get_id(sub, "deposit_id")?;
            let destination = Arc::new(StacksClient::new(&config.stacks)?);
            let requester = WithdrawalRequester::new(store, destination);
            let tx_id = requester.retry_failed_withdrawal(deposit_id).await?;
            println!("unstake re-issued: {tx_id}");
        }
        Some(("abandon", sub)) => {
            let deposit_id = get_id(sub, "deposit_id")?;
            let destination = Arc::new(StacksClient::new(&config.stacks)?);
            let requester = WithdrawalRequester::new(store, destination);
            let deposit = requester.abandon_deposit(deposit_id).await?;
            println!("deposit {} is now {}", deposit.id, deposit.status);
        }
        Some(("clear-bridge-claim", sub)) => {
            let deposit_id = get_id(sub, "deposit_id")?;
            let reconciler = Reconciler::new(store, connect_source(&config).await?);
            reconciler.clear_bridge_claim(deposit_id).await?;
            println!("bridge claim cleared for {deposit_id}");
        }
        Some(("clear-release-claim", sub)) => {
            let withdrawal_id = get_id(sub, "withdrawal_id")?;
            let reconciler = Reconciler::new(store, connect_source(&config).await?);
            reconciler.clear_release_claim(withdrawal_id).await?;
            println!("release claim cleared for {withdrawal_id}");
        }
        _ => unreachable!("subcommand_required"),
    }

    info!("Operator command finished");
    Ok(())
}
