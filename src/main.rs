// wallet - command line front end over a sled data directory

use clap::{Parser, Subcommand};
use meshwallet::crypto::{Address, SecretMaterial};
use meshwallet::ledger::{ChainSnapshot, LedgerConfig};
use meshwallet::network::{DeviceInfo, NetworkConfig, TcpTransport, TcpTransportConfig, Transport};
use meshwallet::queue::Priority;
use meshwallet::storage::{keys, load, KvStore, SledStore};
use meshwallet::sync::{SyncConfig, SyncReport};
use meshwallet::wallet::{
    HistorySource, StaticSession, Wallet, WalletConfig, WalletError, WalletRecord,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "wallet", version, about = "Offline-first mesh wallet")]
struct Cli {
    /// Directory holding the sled database
    #[arg(long, env = "MESHWALLET_DATA_DIR", default_value = "wallet-data")]
    data_dir: PathBuf,

    /// Leading zero hex digits required of block hashes
    #[arg(long, default_value_t = 4)]
    difficulty: u32,

    /// Reward paid to the sealer of each block
    #[arg(long, default_value_t = 10)]
    reward: u64,

    /// Failed sync attempts before an entry needs requeue
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Days completed queue entries are kept
    #[arg(long, default_value_t = 30)]
    retention_days: u32,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a wallet, optionally restoring a hex secret
    Init {
        #[arg(long)]
        secret: Option<String>,
    },
    /// Print the wallet address
    Address,
    /// Print ledger, available and cached balances
    Balance,
    /// Send value; sealed immediately unless --offline
    Send {
        to: String,
        amount: u64,
        #[arg(long)]
        note: Option<String>,
        /// Queue the transfer instead of submitting it
        #[arg(long)]
        offline: bool,
        #[arg(long, value_parser = parse_priority, default_value = "medium")]
        priority: Priority,
    },
    /// Drain the queue into the ledger
    Sync,
    /// Seal a block and collect the reward
    Mine,
    /// Retry failed entries (all retryable ones if no ids are given)
    Retry { ids: Vec<String> },
    /// Give a terminally failed entry a fresh retry budget
    Requeue { id: String },
    /// Show queue entries
    Queue {
        /// Include completed entries
        #[arg(long)]
        all: bool,
    },
    /// Transactions touching this wallet, newest first
    History,
    /// Purge completed entries past the retention window
    Cleanup,
    /// Chain maintenance
    Chain {
        #[command(subcommand)]
        action: ChainAction,
    },
    /// Run a TCP peer node until Ctrl-C
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 7447)]
        port: u16,
        /// Endpoints to dial on startup
        #[arg(long)]
        dial: Vec<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ChainAction {
    /// Check every hash, link and merkle root
    Verify,
    /// Write the chain snapshot to a file
    Export { path: PathBuf },
    /// Replace the chain with a snapshot file, if it validates
    Import { path: PathBuf },
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    match s.to_ascii_lowercase().as_str() {
        "high" => Ok(Priority::High),
        "medium" => Ok(Priority::Medium),
        "low" => Ok(Priority::Low),
        other => Err(format!("unknown priority '{other}' (high, medium, low)")),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "meshwallet=debug,wallet=debug" } else { "meshwallet=info,wallet=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn wallet_config(cli: &Cli) -> WalletConfig {
    WalletConfig::new()
        .with_ledger(
            LedgerConfig::new()
                .with_difficulty(cli.difficulty)
                .with_mining_reward(cli.reward),
        )
        .with_sync(
            SyncConfig::new()
                .with_max_retries(cli.max_retries)
                .with_retention_days(cli.retention_days),
        )
}

fn open_wallet(store: Arc<dyn KvStore>, config: WalletConfig) -> Result<Wallet, WalletError> {
    let record: WalletRecord =
        load(store.as_ref(), keys::WALLET_RECORD)?.ok_or(WalletError::NotInitialized)?;
    let session = Arc::new(StaticSession::unlocked(record.secret));
    Wallet::open(store, session, config)
}

fn print_report(report: &SyncReport) {
    println!(
        "synced {} / failed {}",
        report.success_count, report.failure_count
    );
    for error in &report.errors {
        println!("  error: {error}");
    }
    for id in &report.skipped {
        println!("  skipped (retries exhausted, requeue first): {id}");
    }
    if let Some(block) = &report.block {
        println!(
            "sealed block #{} {} ({} transactions)",
            block.index(),
            block.hash(),
            block.transactions().len()
        );
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let sled = Arc::new(SledStore::open(&cli.data_dir)?);
    let store: Arc<dyn KvStore> = sled.clone();
    let mut config = wallet_config(&cli);
    if let Command::Serve {
        name: Some(name), ..
    } = &cli.command
    {
        config = config.with_network(
            NetworkConfig::new().with_device(DeviceInfo::new(name, std::env::consts::OS)),
        );
    }

    if let Command::Init { secret } = &cli.command {
        let record = match secret {
            Some(hex_secret) => {
                let bytes = hex::decode(hex_secret)?;
                Wallet::create_from_secret(store.as_ref(), SecretMaterial::from_bytes(&bytes)?)?
            }
            None => Wallet::create(store.as_ref())?,
        };
        sled.flush()?;
        println!("{}", record.address);
        return Ok(());
    }

    let wallet = open_wallet(Arc::clone(&store), config)?;

    match cli.command {
        Command::Init { .. } => {}

        Command::Address => println!("{}", wallet.address()),

        Command::Balance => {
            println!("ledger:    {}", wallet.ledger_balance().await);
            println!("available: {}", wallet.available_balance().await?);
            println!("cached:    {}", wallet.record()?.balance);
        }

        Command::Send {
            to,
            amount,
            note,
            offline,
            priority,
        } => {
            let to = Address::parse(&to)?;
            let tx = wallet.new_transfer(&to, amount, note.as_deref())?;
            if offline {
                let id = wallet.queue_offline(&tx, priority).await?;
                println!("queued {id}");
            } else {
                wallet.submit_online(tx).await?;
                let block = wallet.mine().await?;
                println!("sealed in block #{} {}", block.index(), block.hash());
            }
        }

        Command::Sync => print_report(&wallet.sync().await?),

        Command::Mine => {
            let block = wallet.mine().await?;
            println!("sealed block #{} {}", block.index(), block.hash());
        }

        Command::Retry { ids } => {
            let report = if ids.is_empty() {
                wallet.retry_all_failed().await?
            } else {
                wallet.retry(&ids).await?
            };
            print_report(&report);
        }

        Command::Requeue { id } => {
            wallet.requeue(&id).await?;
            println!("requeued {id}");
        }

        Command::Queue { all } => {
            let summary = wallet.queue_summary()?;
            println!(
                "pending {} / syncing {} / failed {} ({} terminal) / completed {} / total {}",
                summary.pending,
                summary.syncing,
                summary.failed,
                summary.terminal,
                summary.completed,
                summary.total
            );
            let entries = if all {
                wallet.queue().list_all()?
            } else {
                wallet
                    .queue()
                    .list_all()?
                    .into_iter()
                    .filter(|e| e.status() != meshwallet::TransactionStatus::Completed)
                    .collect()
            };
            for entry in entries {
                println!(
                    "{}  {:<9} retries={} hold={}{}",
                    entry.id(),
                    entry.status().to_string(),
                    entry.retry_count(),
                    entry.hold(),
                    entry
                        .last_error()
                        .map(|e| format!("  last error: {e}"))
                        .unwrap_or_default()
                );
            }
        }

        Command::History => {
            for entry in wallet.history().await? {
                let tx = &entry.transaction;
                let source = match entry.source {
                    HistorySource::Block(index) => format!("block #{index}"),
                    HistorySource::Unsealed => "unsealed".to_string(),
                    HistorySource::Queue(status) => format!("queue ({status})"),
                };
                println!(
                    "{}  {} -> {}  {}  [{}]{}",
                    tx.timestamp(),
                    tx.from(),
                    tx.to(),
                    tx.amount(),
                    source,
                    tx.note().map(|n| format!("  \"{n}\"")).unwrap_or_default()
                );
            }
        }

        Command::Cleanup => println!("removed {} entries", wallet.cleanup()?),

        Command::Chain { action } => match action {
            ChainAction::Verify => {
                wallet.verify_chain().await?;
                let height = wallet.ledger().read().await.height();
                println!("chain valid, height {height}");
            }
            ChainAction::Export { path } => {
                let snapshot = wallet.export_chain().await;
                std::fs::write(&path, snapshot.to_bytes()?)?;
                println!("exported {} blocks to {}", snapshot.len(), path.display());
            }
            ChainAction::Import { path } => {
                let snapshot = ChainSnapshot::from_bytes(&std::fs::read(&path)?)?;
                let blocks = snapshot.len();
                wallet.import_chain(snapshot).await?;
                println!("imported {blocks} blocks");
            }
        },

        Command::Serve {
            bind, port, dial, ..
        } => {
            let tcp = Arc::new(TcpTransport::new(
                TcpTransportConfig::new()
                    .with_bind_address(&bind)
                    .with_bind_port(port),
            ));
            let network = Arc::new(
                wallet
                    .peer_network()?
                    .with_transport(Arc::clone(&tcp) as Arc<dyn Transport>),
            );
            network.start().await?;
            if let Some(addr) = tcp.local_addr() {
                info!(address = %wallet.address(), listen = %addr, "Serving");
            }
            for endpoint in &dial {
                match tcp.dial(endpoint).await {
                    Ok(link) => info!(link = %link, "Dialed"),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "Dial failed"),
                }
            }
            network.announce().await?;

            tokio::signal::ctrl_c().await?;
            network.stop().await?;

            match wallet.sync().await {
                Ok(report) => print_report(&report),
                Err(e) => warn!(error = %e, "Final sync failed"),
            }
        }
    }

    sled.flush()?;
    Ok(())
}
