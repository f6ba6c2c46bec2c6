use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use futures::SinkExt;
use goldmine_config::{load_config, AppConfig};
use goldmine_core::{ClosedPosition, Fill, FillId, FillTime, PositionFilter};
use goldmine_ingest::{encode_message, format_execution_time, ShutdownSignal, TradeMessage};
use goldmine_netting::{BalanceOutcome, NettingEngine};
use goldmine_reporting::Reporter;
use goldmine_store::{FillStore, SqliteFillStore};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracing::info;

use crate::serve::run_ingest;
use crate::telemetry::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "Goldmine fill ingestion and position netting")]
pub struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long, default_value = "default", global = true)]
    env: String,
    /// SQLite database file, overriding `db_path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept fills over TCP and persist them until Ctrl-C
    Serve(ServeArgs),
    /// Net unbalanced fills into closed positions
    Balance,
    /// Balance, then print performance statistics and profit curves
    Report(FilterArgs),
    /// List stored fills, newest first
    Fills(FillsArgs),
    /// List accounts with stored fills
    Accounts,
    /// List closed positions
    Closed(FilterArgs),
    /// Remove a raw fill
    DeleteFill {
        id: FillId,
    },
    /// Send one fill message to a running listener
    Send(SendArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address, overriding `ingest.endpoint`
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Args)]
pub struct FillsArgs {
    #[arg(long)]
    account: Option<String>,
}

#[derive(Args)]
pub struct FilterArgs {
    #[arg(long)]
    account: Option<String>,
    #[arg(long)]
    strategy: Option<String>,
}

impl FilterArgs {
    fn filter(&self) -> PositionFilter {
        PositionFilter {
            account: self.account.clone(),
            strategy: self.strategy.clone(),
        }
    }
}

#[derive(Args)]
pub struct SendArgs {
    /// Listener address, defaults to `ingest.endpoint`
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long, default_value = "foo")]
    account: String,
    #[arg(long, default_value = "bar")]
    security: String,
    #[arg(long, default_value_t = 10.0)]
    price: f64,
    #[arg(long, default_value_t = 2, allow_hyphen_values = true)]
    quantity: i64,
    #[arg(long, default_value_t = 10_000.0)]
    volume: f64,
    #[arg(long, default_value = "RUB")]
    currency: String,
    /// `buy` or `sell`; other values are sent as-is
    #[arg(long, default_value = "buy")]
    operation: String,
    /// `YYYY-MM-DD HH:MM:SS.mmm` in UTC, defaults to now
    #[arg(long)]
    execution_time: Option<String>,
    #[arg(long, default_value = "foobar")]
    strategy: String,
    #[arg(long, default_value = "signal")]
    signal_id: String,
    #[arg(long, default_value = "")]
    comment: String,
}

impl SendArgs {
    fn message(&self) -> TradeMessage {
        let execution_time = self
            .execution_time
            .clone()
            .unwrap_or_else(|| format_execution_time(FillTime::from_datetime(Utc::now())));
        TradeMessage {
            account: self.account.clone(),
            security: self.security.clone(),
            price: self.price,
            quantity: self.quantity,
            volume: self.volume,
            volume_currency: self.currency.clone(),
            operation: self.operation.clone(),
            execution_time,
            strategy: self.strategy.clone(),
            signal_id: self.signal_id.clone(),
            order_comment: self.comment.clone(),
        }
    }

    async fn run(&self, config: &AppConfig) -> Result<()> {
        let endpoint = self
            .endpoint
            .as_deref()
            .unwrap_or(&config.ingest.endpoint);
        let payload = encode_message(&self.message()).context("failed to encode trade")?;
        let stream = TcpStream::connect(endpoint)
            .await
            .with_context(|| format!("failed to connect to {endpoint}"))?;
        let mut sink = FramedWrite::new(stream, LengthDelimitedCodec::new());
        let size = payload.len();
        sink.send(Bytes::from(payload)).await?;
        SinkExt::<Bytes>::close(&mut sink).await?;
        println!("sent {size} byte trade message to {endpoint}");
        Ok(())
    }
}

impl Cli {
    /// Fold command line overrides into the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Commands::Serve(ServeArgs {
            endpoint: Some(endpoint),
        }) = &self.command
        {
            config.ingest.endpoint = endpoint.clone();
        }
    }

    fn log_filter(&self, config: &AppConfig) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| match self.verbose {
            0 => config.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        })
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(Some(&cli.env)).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    init_tracing(&cli.log_filter(&config), config.telemetry.log_path.as_deref())
        .context("failed to initialize logging")?;

    match &cli.command {
        Commands::Serve(_) => {
            let shutdown = ShutdownSignal::new();
            shutdown.trigger_on_ctrl_c();
            run_ingest(&config, shutdown).await?;
        }
        Commands::Balance => {
            let outcome = with_store(&config.db_path, |store| balance(&store)).await?;
            print_positions(&outcome.closed);
            println!(
                "examined {} fills, closed {} positions, {} buckets still open",
                outcome.examined,
                outcome.closed.len(),
                outcome.open_buckets
            );
        }
        Commands::Report(args) => {
            let filter = args.filter();
            let reporter =
                with_store(&config.db_path, move |store| report(&store, &filter)).await?;
            print_report(&reporter);
        }
        Commands::Fills(args) => {
            let account = args.account.clone();
            let mut fills =
                with_store(&config.db_path, move |store| Ok(store.fills(account.as_deref())?))
                    .await?;
            fills.reverse();
            print_fills(&fills);
        }
        Commands::Accounts => {
            let accounts = with_store(&config.db_path, |store| Ok(store.accounts()?)).await?;
            for account in accounts {
                println!("{account}");
            }
        }
        Commands::Closed(args) => {
            let filter = args.filter();
            let positions =
                with_store(&config.db_path, move |store| Ok(store.closed_positions(&filter)?))
                    .await?;
            print_positions(&positions);
        }
        Commands::DeleteFill { id } => {
            let id = *id;
            with_store(&config.db_path, move |store| {
                store
                    .delete_fill(id)
                    .with_context(|| format!("failed to delete fill {id}"))
            })
            .await?;
            info!(fill_id = id, "fill deleted");
            println!("deleted fill {id}");
        }
        Commands::Send(args) => args.run(&config).await?,
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<Arc<SqliteFillStore>> {
    let store = SqliteFillStore::open(path)
        .with_context(|| format!("failed to open fill store {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Open the store and run `work` against it off the async runtime.
async fn with_store<T, F>(path: &Path, work: F) -> Result<T>
where
    F: FnOnce(Arc<SqliteFillStore>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || work(open_store(&path)?))
        .await
        .map_err(|err| anyhow!("fill store task failed: {err}"))?
}

fn balance(store: &Arc<SqliteFillStore>) -> Result<BalanceOutcome> {
    let engine = NettingEngine::new(store.clone());
    engine.balance().context("netting pass failed")
}

fn report(store: &Arc<SqliteFillStore>, filter: &PositionFilter) -> Result<Reporter> {
    balance(store)?;
    Ok(Reporter::new(store.closed_positions(filter)?, filter))
}

fn print_report(reporter: &Reporter) {
    print!("{}", reporter.summary());
    for (account, curve) in reporter.profit_curves() {
        println!();
        println!("Cumulative profit: {account}");
        for point in curve {
            println!(
                "{:<23} {:<12} {:<12} {:>14.2} {:>14.2}",
                point.exit_time.to_string(),
                point.security,
                point.strategy,
                point.profit,
                point.cumulative
            );
        }
    }
}

fn print_fills(fills: &[Fill]) {
    println!(
        "{:>6} {:<23} {:<12} {:<12} {:<12} {:>8} {:>12} {:>14} {:<5} {}",
        "ID", "TIME", "ACCOUNT", "SECURITY", "STRATEGY", "QTY", "PRICE", "VOLUME", "CCY", "BALANCED"
    );
    for fill in fills {
        println!(
            "{:>6} {:<23} {:<12} {:<12} {:<12} {:>8} {:>12.4} {:>14.2} {:<5} {}",
            fill.id,
            fill.executed_at.to_string(),
            fill.account,
            fill.security,
            fill.strategy,
            fill.quantity,
            fill.price,
            fill.volume,
            fill.volume_currency,
            fill.balanced
        );
    }
}

fn print_positions(positions: &[ClosedPosition]) {
    if positions.is_empty() {
        println!("no closed positions");
        return;
    }
    println!(
        "{:<12} {:<12} {:<12} {:<5} {:<23} {:<23} {:>14} {:<5} FILLS",
        "ACCOUNT", "SECURITY", "STRATEGY", "DIR", "ENTRY", "EXIT", "PROFIT", "CCY"
    );
    for position in positions {
        let fills = position
            .fill_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<12} {:<12} {:<12} {:<5} {:<23} {:<23} {:>14.2} {:<5} {}",
            position.account,
            position.security,
            position.strategy,
            position.direction.as_str(),
            position.entry_time.to_string(),
            position.exit_time.to_string(),
            position.profit,
            position.profit_currency,
            fills
        );
    }
}
