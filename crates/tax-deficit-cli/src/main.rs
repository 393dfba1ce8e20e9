mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::allocate::AllocateArgs;
use commands::carve_outs::CarveOutArgs;
use commands::deficits::DeficitsArgs;
use commands::impute::ImputeArgs;
use commands::reconcile::ReconcileArgs;

/// Pillar Two tax-deficit estimation and allocation scenarios
#[derive(Parser)]
#[command(
    name = "tds",
    version,
    about = "Pillar Two tax-deficit estimation and allocation scenarios",
    long_about = "Estimates the tax deficit of multinationals under a global minimum tax \
                  from country-by-country data, and allocates it across jurisdictions \
                  through the QDMTT, IIR and UTPR with decimal precision."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log verbosity on stderr (RUST_LOG overrides)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Log line format
    #[arg(long, default_value = "compact", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Tax deficit of every (parent, partner) pair at a minimum rate
    Deficits(DeficitsArgs),
    /// Domestic / non-haven / tax-haven split with imputation for sparse parents
    Impute(ImputeArgs),
    /// Allocate deficits through the QDMTT, IIR and UTPR waterfall
    Allocate(AllocateArgs),
    /// Allocate, roll up by collecting country and reconcile against independent paths
    Reconcile(ReconcileArgs),
    /// Deficits with and without substance-based carve-outs
    CarveOutImpact(CarveOutArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Compact,
    Pretty,
    Json,
}

fn init_logging(level: &str, format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Deficits(args) => commands::deficits::run_deficits(args),
        Commands::Impute(args) => commands::impute::run_impute(args),
        Commands::Allocate(args) => commands::allocate::run_allocate(args),
        Commands::Reconcile(args) => commands::reconcile::run_reconcile(args),
        Commands::CarveOutImpact(args) => commands::carve_outs::run_carve_out_impact(args),
        Commands::Version => {
            println!("tds {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
