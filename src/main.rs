use anyhow::{Context, Result, bail};
use chain_watch::{
    chain,
    config::Config,
    creds::Creds,
    error::ChainError,
    expiry::choose_nearest_expiry,
    poller::{ChainFrame, ChainView, PollSettings, Poller},
    store::{SnapshotStore, read_latest},
    table,
    upstox::UpstoxClient,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rustls::crypto::CryptoProvider;
use std::fs::File;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chain_watch", about = "Poll an Upstox option chain into a JSONL log")]
struct Cli {
    /// Config file, defaults to ~/.upstox/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    instrument: Option<String>,
    /// Poll interval in seconds (2-600)
    #[arg(long, global = true)]
    interval: Option<u64>,
    /// History JSONL file
    #[arg(long, global = true)]
    history: Option<PathBuf>,
    /// Expiry (YYYY-MM-DD), skips the nearest-expiry lookup
    #[arg(long, global = true)]
    expiry: Option<NaiveDate>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll until Ctrl-C
    Poll,
    /// Fetch and save one snapshot
    Fetch,
    /// Print the latest saved snapshot
    Show,
    /// Write the latest saved snapshot as CSV
    Export {
        #[arg(long, default_value = "option_chain_latest.csv")]
        out: PathBuf,
    },
    /// Show the nearest expiry and a sample of listed contracts
    Contracts,
}

/// Prints each fetched table to stdout.
struct ConsoleView;

impl ChainView for ConsoleView {
    fn render(&mut self, frame: ChainFrame<'_>) {
        println!(
            "\n{} expiry {} @ {} UTC",
            frame.instrument_key, frame.expiry, frame.snapshot.timestamp_utc
        );
        println!("{}", table::render_text(frame.rows));
    }
}

#[tokio::main]
async fn main() {
    CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider())
        .expect("Failed to install default crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_path(path).await?,
        None => Config::new().await?,
    };
    if let Some(instrument) = cli.instrument {
        config.instrument_key = instrument;
    }
    if let Some(interval) = cli.interval {
        config.poll_seconds = interval;
    }
    if let Some(history) = cli.history {
        config.history_file = history;
    }
    if cli.expiry.is_some() {
        config.expiry = cli.expiry;
    }

    match cli.command.unwrap_or(Command::Poll) {
        Command::Poll => poll(&config).await,
        Command::Fetch => fetch(&config).await,
        Command::Show => show(&config),
        Command::Export { out } => export(&config, out),
        Command::Contracts => contracts(&config).await,
    }
}

async fn make_poller(config: &Config) -> Result<Poller> {
    let creds = Creds::load(&config.token_file).await;
    let client = UpstoxClient::new(&config.base_url, creds)?;
    let store = SnapshotStore::new(config.history_file.clone(), config.latest_file.clone());
    let settings = PollSettings {
        instrument_key: config.instrument_key.clone(),
        interval: config.poll_interval(),
    };

    Ok(Poller::new(client, store, settings).with_expiry(config.expiry))
}

async fn poll(config: &Config) -> Result<()> {
    let mut poller = make_poller(config).await?;
    let switch = poller.switch();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested, finishing current cycle");
            switch.stop();
        }
    });

    info!("History file (JSONL): {:?}", config.history_file);
    poller.start();
    poller.run(&mut ConsoleView).await?;

    Ok(())
}

async fn fetch(config: &Config) -> Result<()> {
    let mut poller = make_poller(config).await?;
    match poller.fetch_once(&mut ConsoleView).await {
        Ok(_) => {
            info!("Saved snapshot to {:?} and {:?}", config.history_file, config.latest_file);
            Ok(())
        }
        Err(ChainError::MissingCredentials) => {
            bail!("No token loaded, put one in {:?}", config.token_file)
        }
        Err(ChainError::NoExpiry(key)) => {
            bail!("No expiry found for {key}, pass --expiry YYYY-MM-DD")
        }
        Err(e) => Err(e.into()),
    }
}

fn show(config: &Config) -> Result<()> {
    let Some(latest) = read_latest(&config.latest_file)? else {
        println!("No latest snapshot file found yet at {:?}", config.latest_file);
        return Ok(());
    };

    println!("Snapshot timestamp (UTC): {}", latest.timestamp_utc);
    println!("{}", table::render_text(&chain::to_rows(&latest.snapshot)));
    Ok(())
}

fn export(config: &Config, out: PathBuf) -> Result<()> {
    let Some(latest) = read_latest(&config.latest_file)? else {
        bail!("No latest snapshot file at {:?}", config.latest_file);
    };
    let rows = chain::to_rows(&latest.snapshot);
    if rows.is_empty() {
        bail!("Latest snapshot has no strikes, nothing to export");
    }

    let file = File::create(&out).with_context(|| format!("creating {out:?}"))?;
    table::write_csv(&rows, file)?;
    info!("Wrote {} rows to {out:?}", rows.len());
    Ok(())
}

async fn contracts(config: &Config) -> Result<()> {
    let creds = Creds::load(&config.token_file).await;
    let client = UpstoxClient::new(&config.base_url, creds)?;
    if !client.has_credentials() {
        bail!("No token loaded, put one in {:?}", config.token_file);
    }

    let contracts = client.get_contracts(&config.instrument_key).await?;
    if let Some(err) = contracts.get("error") {
        error!("Contracts endpoint reported {err}");
    }

    match choose_nearest_expiry(&contracts) {
        Some(expiry) => println!("Nearest expiry: {expiry}"),
        None => println!("No expiry on or after today in the contract list"),
    }

    if let Some(data) = contracts.get("data").and_then(|d| d.as_array()) {
        println!("Sample contract data (first 10):");
        for item in data.iter().take(10) {
            println!("{item}");
        }
    }

    Ok(())
}
