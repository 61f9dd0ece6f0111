use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use wallet_ledger::application::consumer::SettlementConsumer;
use wallet_ledger::application::delay::DelayConfig;
use wallet_ledger::application::guard::SubmissionGuard;
use wallet_ledger::application::wallet::WalletService;
use wallet_ledger::config::{
    DEFAULT_FAIL_COUNTER_TTL, DEFAULT_MAX_FAIL_COUNTER, DEFAULT_WORKERS, QueueTopology, RetryMode,
    SettlementConfig,
};
use wallet_ledger::domain::ports::{LedgerStoreRef, TtlCacheRef};
use wallet_ledger::infrastructure::broker::{BrokerConnection, InMemoryBroker};
use wallet_ledger::infrastructure::cache::InMemoryTtlCache;
use wallet_ledger::infrastructure::in_memory::InMemoryLedgerStore;
#[cfg(feature = "storage-rocksdb")]
use wallet_ledger::infrastructure::rocksdb::RocksDBStore;
use wallet_ledger::interfaces::csv::command_reader::{Command, CommandReader};
use wallet_ledger::interfaces::csv::wallet_writer::WalletWriter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input wallet commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "LEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Number of settlement workers
    #[arg(long, env = "LEDGER_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Failures tolerated per message before it is dead-lettered
    #[arg(long, env = "LEDGER_MAX_FAIL_COUNTER", default_value_t = DEFAULT_MAX_FAIL_COUNTER)]
    max_fail_counter: u32,

    /// Seconds without failure after which a message's fail counter resets
    #[arg(long, env = "LEDGER_FAIL_COUNTER_TTL_SECS", default_value_t = DEFAULT_FAIL_COUNTER_TTL.as_secs())]
    fail_counter_ttl_secs: u64,

    /// Delay before each settlement: none, fixed:MS or jitter:MIN-MAX
    #[arg(long, env = "LEDGER_DELAY", default_value = "none")]
    delay: DelayConfig,

    /// Retry failed settlements through the delayed queue after this many milliseconds
    #[arg(long, env = "LEDGER_RETRY_DELAY_MS")]
    retry_delay_ms: Option<u64>,

    /// Keep reading commands while earlier submissions are still settling
    #[arg(long, env = "LEDGER_PIPELINED")]
    pipelined: bool,
}

impl Cli {
    fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            workers: self.workers,
            max_fail_counter: self.max_fail_counter,
            fail_counter_ttl: Duration::from_secs(self.fail_counter_ttl_secs),
            delay: self.delay,
            retry_mode: self
                .retry_delay_ms
                .map_or(RetryMode::Requeue, |ms| RetryMode::Delayed(Duration::from_millis(ms))),
            topology: QueueTopology::default(),
        }
    }
}

fn open_store(db_path: Option<&Path>) -> Result<LedgerStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = cli.settlement_config();
    let store = open_store(cli.db_path.as_deref())?;

    let broker = InMemoryBroker::new();
    let connection =
        Arc::new(BrokerConnection::connect(broker.clone(), config.topology.clone()).into_diagnostic()?);
    let cache: TtlCacheRef = Arc::new(InMemoryTtlCache::new());
    let consumer = Arc::new(
        SettlementConsumer::new(connection.clone(), store.clone(), cache, &config).into_diagnostic()?,
    );

    let cancel = CancellationToken::new();
    let pool = tokio::spawn(consumer.run(cancel.clone()));

    let wallets = WalletService::new(store.clone());
    let guard = SubmissionGuard::new(store.clone(), connection.clone());
    let settling = [
        config.topology.incoming_queue.as_str(),
        config.topology.delayed_queue.as_str(),
    ];

    // Process commands
    let file = File::open(&cli.input).into_diagnostic()?;
    for command in CommandReader::new(file).commands() {
        let result = match command {
            Ok(Command::Init(owner)) => wallets.init(&owner).await.map(|_| ()),
            Ok(Command::Enable(owner)) => wallets.enable(&owner).await.map(|_| ()),
            Ok(Command::Disable(owner)) => wallets.disable(&owner).await.map(|_| ()),
            Ok(Command::Submit(request)) => match guard.submit(request).await {
                Ok(_) if !cli.pipelined => broker.wait_idle(&settling).await,
                other => other.map(|_| ()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            eprintln!("Error processing command: {}", e);
        }
    }

    broker.wait_idle(&settling).await.into_diagnostic()?;
    cancel.cancel();
    pool.await.into_diagnostic()?;
    connection.close().into_diagnostic()?;

    // Output final state
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer
        .write_wallets(&wallets.list().await.into_diagnostic()?)
        .into_diagnostic()?;

    Ok(())
}
