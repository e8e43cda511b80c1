use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payment_rails::application::context::RailContext;
use payment_rails::application::service::PaymentRailService;
use payment_rails::config::RailConfig;
use payment_rails::domain::payment::RailType;
use payment_rails::domain::ports::AuthorizationStoreRef;
use payment_rails::infrastructure::clock::SystemClock;
use payment_rails::infrastructure::in_memory::InMemoryAuthorizationStore;
use payment_rails::infrastructure::otp::InMemoryOtpProvider;
use payment_rails::infrastructure::simulated_rail::SimulatedRail;
use payment_rails::interfaces::batch::run_commands;
use payment_rails::interfaces::csv::authorization_writer::AuthorizationWriter;
use payment_rails::interfaces::csv::command_reader::CommandReader;
use payment_rails::observability::TracingObserver;
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// YAML file with resilience and authorization settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rail the sandbox simulates
    #[arg(long, default_value = "sepa")]
    rail: RailType,

    /// Amounts at or above this ask for strong customer authentication
    #[arg(long)]
    sca_threshold: Option<Decimal>,

    /// Amounts above this are refused for insufficient funds
    #[arg(long)]
    max_amount: Option<Decimal>,

    /// Deliver this fixed code for every SCA challenge instead of a random one
    #[arg(long)]
    sandbox_otp: Option<String>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter, e.g. `info` or `payment_rails=debug`
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Cli {
    #[cfg(feature = "storage-rocksdb")]
    fn store(&self) -> Result<AuthorizationStoreRef> {
        use payment_rails::infrastructure::rocksdb::RocksDBStore;

        Ok(match &self.db_path {
            Some(db_path) => Arc::new(RocksDBStore::open(db_path).into_diagnostic()?),
            None => Arc::new(InMemoryAuthorizationStore::new()),
        })
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn store(&self) -> Result<AuthorizationStoreRef> {
        if self.db_path.is_some() {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
        }
        Ok(Arc::new(InMemoryAuthorizationStore::new()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the CSV report.
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let config = match &cli.config {
        Some(path) => RailConfig::from_yaml_file(path).into_diagnostic()?,
        None => RailConfig::default(),
    };

    let mut rail = SimulatedRail::new(cli.rail);
    if let Some(threshold) = cli.sca_threshold {
        rail = rail.with_sca_threshold(threshold);
    }
    if let Some(max) = cli.max_amount {
        rail = rail.with_max_amount(max);
    }
    let sca = match &cli.sandbox_otp {
        Some(code) => InMemoryOtpProvider::with_fixed_code(code.as_str()),
        None => InMemoryOtpProvider::new(),
    };

    let service = PaymentRailService::new(
        Arc::new(rail),
        Arc::new(sca),
        cli.store()?,
        &config,
        RailContext::new(Arc::new(SystemClock), Arc::new(TracingObserver)),
    );

    let file = File::open(&cli.input).into_diagnostic()?;
    let summary = run_commands(&service, CommandReader::new(file).commands()).await;
    info!(applied = summary.applied, failed = summary.failed, "Batch finished");

    let authorizations = service.list_authorizations().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AuthorizationWriter::new(stdout.lock());
    writer
        .write_authorizations(&authorizations)
        .into_diagnostic()?;

    Ok(())
}
