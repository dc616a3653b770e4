use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flash_dex::{read_transactions, Engine, EngineConfig, ReceiptLine, TokenBank};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Replay a CSV of exchange transactions against a fresh engine")]
struct Args {
    /// Engine configuration (TOML)
    #[arg(long)]
    config: PathBuf,

    /// Transaction log (CSV)
    #[arg(long)]
    input: PathBuf,

    /// Decimals used to scale CSV amounts to base units
    #[arg(long, default_value = "18")]
    decimals: u32,

    /// Print only the final balances
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = EngineConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let mut engine = Engine::new(&config)?;

    let file = File::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?;
    let transactions = read_transactions(file, args.decimals)?;
    info!(count = transactions.len(), "replaying transactions");

    let mut rejected = 0usize;
    for tx in transactions {
        let receipt = engine.process(tx);
        if !receipt.is_success() {
            rejected += 1;
        }
        if !args.quiet {
            let line = serde_json::to_string(&ReceiptLine::new(&tx, &receipt))?;
            println!("{line}");
        }
    }

    let exchange = &engine.exchange;
    println!("\n=== Custody Balances ===");
    for (token, owner, amount) in exchange.ledger().entries() {
        println!("{token}  {owner}  {amount}");
    }
    println!("\n=== Exchange Holdings ===");
    let mut tokens: Vec<_> = exchange.tokens().tokens().collect();
    tokens.sort_unstable();
    for token in tokens {
        println!("{token}  {}", exchange.tokens().balance_of(token, exchange.address()));
    }
    println!("\nOrders: {}  Rejected: {}  State hash: {:016x}", exchange.order_count(), rejected, engine.state_hash());

    Ok(())
}
