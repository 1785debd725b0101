//! Rollhouse CLI
//!
//! Offline simulation of full game sessions, third-party outcome
//! verification, and settled-round archive inspection.

use clap::{Parser, Subcommand};
use rollhouse::entropy::StaticEntropy;
use rollhouse::games::case_battle::{TicketTable, WeightedItem};
use rollhouse::games::plinko::PlinkoRisk;
use rollhouse::round::RoundParams;
use rollhouse::{
    Amount, EngineConfig, PayoutLedger, RocksRoundStore, RoundStore, SettlementOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rollhouse")]
#[command(about = "Provably-fair casino settlement engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full session: battle, plinko, wheel and a rugged epoch
    Demo {
        /// Case battles to play
        #[arg(short, long, default_value = "3")]
        battles: usize,

        /// Buys against the rugged pool
        #[arg(short = 'p', long, default_value = "200")]
        pool_buys: usize,

        /// Fetch seeds from the configured entropy endpoints instead of
        /// locally generated fixtures
        #[arg(long)]
        live: bool,
    },

    /// Recompute an outcome from a revealed seed and check the commitment
    Verify {
        /// Revealed server seed
        #[arg(long)]
        server_seed: String,

        /// Published commitment hash
        #[arg(long)]
        hash: String,

        /// Hybrid seed from the reveal
        #[arg(long)]
        hybrid_seed: String,

        /// Draw nonce to recompute
        #[arg(long, default_value = "0")]
        nonce: u64,

        /// Upper bound of the draw domain
        #[arg(long, default_value = "100000")]
        upper: u64,
    },

    /// List settled rounds from a durable archive
    InspectArchive {
        /// Path to the archive database
        #[arg(short, long)]
        db_path: PathBuf,

        /// Rounds per page
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "rollhouse=debug"
    } else {
        "rollhouse=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let config: EngineConfig = toml::from_str(&raw)?;
            config.validate()?;
            config
        }
        None => EngineConfig::offline(),
    };

    match cli.command {
        Commands::Demo {
            battles,
            pool_buys,
            live,
        } => run_demo(config, battles, pool_buys, live).await,
        Commands::Verify {
            server_seed,
            hash,
            hybrid_seed,
            nonce,
            upper,
        } => {
            let recomputed = rollhouse::seed::sha256_hex(server_seed.as_bytes());
            if recomputed != hash.to_lowercase() {
                println!("❌ commitment mismatch: sha256(server_seed) != published hash");
                println!("   recomputed: {}", recomputed);
                std::process::exit(1);
            }
            let value = rollhouse::seed::derive_value(&hybrid_seed, nonce, upper);
            println!("✅ commitment verified");
            println!("   derive_value(hybrid_seed, {}, {}) = {}", nonce, upper, value);
            Ok(())
        }
        Commands::InspectArchive { db_path, limit } => {
            let store = RocksRoundStore::open(db_path)?;
            let mut cursor: Option<String> = None;
            let mut total = 0usize;
            loop {
                let (page, next) = store.list_settled(cursor.as_deref(), limit).await?;
                if page.is_empty() {
                    break;
                }
                for round in &page {
                    println!(
                        "{}  {}  pot {}  settled {}",
                        round.id,
                        round.kind,
                        round.pot.display_currency(),
                        round
                            .settled_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string()),
                    );
                }
                total += page.len();
                match next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            println!("{} settled rounds", total);
            Ok(())
        }
    }
}

async fn run_demo(
    config: EngineConfig,
    battles: usize,
    pool_buys: usize,
    live: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🎲 Rollhouse Settlement Demo");
    println!("============================");

    let provider: Box<dyn rollhouse::EntropyProvider> = if live {
        Box::new(rollhouse::HttpEntropySource::new(config.entropy.clone())?)
    } else {
        Box::new(StaticEntropy {
            external: Some(rollhouse::seed::generate_server_seed()),
            block: Some(rollhouse::seed::generate_server_seed()),
        })
    };

    let ledger = Arc::new(PayoutLedger::new());
    let engine = SettlementOrchestrator::new(
        provider,
        ledger.clone(),
        Arc::new(rollhouse::MemoryRoundStore::new()),
        config.clone(),
    );

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(20_000_000));
    ledger.fund(bob, Amount::from_minor(20_000_000));
    println!(
        "💰 funded alice and bob with {} each",
        Amount::from_minor(20_000_000).display_currency()
    );

    // Case battles, alice vs bob.
    for i in 0..battles {
        let params = RoundParams::CaseBattle {
            table: demo_table()?,
            cases_per_participant: 3,
        };
        let round = engine
            .create_round(alice, Amount::from_minor(2_500), 0, 2, params)
            .await?;
        engine
            .join_round(round.id, bob, Amount::from_minor(2_500), 1)
            .await?;
        let report = engine.settle_round(round.id, None).await?;
        println!(
            "⚔️  battle {} -> team {} takes {}",
            i + 1,
            report.winning_team,
            round.pot.display_currency()
        );
    }

    // One plinko drop and one wheel spin.
    let drop = engine
        .create_round(
            alice,
            Amount::from_minor(1_000),
            0,
            1,
            RoundParams::Plinko {
                rows: 16,
                risk: PlinkoRisk::Medium,
            },
        )
        .await?;
    engine.settle_round(drop.id, None).await?;
    let reveal = engine.reveal(drop.id).await?;
    println!(
        "🟡 plinko settled; reveal verifies: {}",
        rollhouse::verify_reveal(&reveal)
    );

    let spin = engine
        .create_round(
            bob,
            Amount::from_minor(1_000),
            0,
            1,
            RoundParams::Wheel {
                segments: config.games.wheel_segments.clone(),
                boost_count: config.games.wheel_boost_count,
            },
        )
        .await?;
    // The layout is fixed by the committed seed, so it can be shown before
    // the spin resolves.
    let layout = spin.wheel_layout()?;
    println!("🎡 wheel layout published with {} boosts", layout.boosts.len());
    engine.settle_round(spin.id, None).await?;
    println!("🎡 wheel settled");

    // Rugged pool epoch.
    engine.create_rugged_pool("demo").await?;
    let mut crashes = 0usize;
    for _ in 0..pool_buys {
        // Above the pool floor so only the crash roll ends an epoch.
        let receipt = engine.pool_buy("demo", alice, Amount::from_minor(25_000)).await?;
        if let Some(split) = receipt.split {
            crashes += 1;
            println!(
                "💥 pool crashed: jackpot {} / house {}",
                split.jackpot.display_currency(),
                split.house.display_currency()
            );
        }
    }
    println!("🪙 {} pool buys, {} crashes", pool_buys, crashes);

    println!(
        "📒 final balances: alice {} bob {}",
        ledger.balance(alice).display_currency(),
        ledger.balance(bob).display_currency()
    );
    Ok(())
}

fn demo_table() -> Result<TicketTable, Box<dyn std::error::Error>> {
    Ok(TicketTable::new(vec![
        WeightedItem {
            name: "common".to_string(),
            weight: 80.0,
            value: Amount::from_minor(1_000),
        },
        WeightedItem {
            name: "rare".to_string(),
            weight: 19.0,
            value: Amount::from_minor(10_000),
        },
        WeightedItem {
            name: "legendary".to_string(),
            weight: 1.0,
            value: Amount::from_minor(200_000),
        },
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }
}
