#![forbid(unsafe_code)]
//! ConsentChain command line: bulk load the patient tables, then query or
//! update consent against the freshly built ledger.

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use consentchain::config::{load_config, load_config_from, Config};
use consentchain::service::ConsentService;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Printed after every update: each run rebuilds the ledger from the tables.
const IN_MEMORY_NOTICE: &str =
    "ℹ️  In-memory only: the ledger is rebuilt from the tables on every run, so this update is not persisted.";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (default: ./consentchain.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Patient table, overriding the configured path
    #[arg(long, global = true)]
    patients: Option<PathBuf>,
    /// Consent table, overriding the configured path
    #[arg(long, global = true)]
    consents: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load both tables and report how many tokens were minted
    Import,
    /// Check whether a patient's data may be used for training
    Verify {
        patient_id: String,
    },
    /// Grant or withdraw a patient's consent
    Update {
        patient_id: String,
        #[arg(long, conflicts_with = "deny")]
        allow: bool,
        #[arg(long)]
        deny: bool,
        /// New expiry (RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`)
        #[arg(long)]
        expiry: Option<String>,
        /// Rebind the token to this wallet
        #[arg(long)]
        wallet: Option<String>,
    },
    /// Show the most recent blocks
    Chain {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show ledger and consent statistics
    Stats,
    /// Dump the consent audit log as JSON
    Audit,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    let service = ConsentService::from_config(&config);
    let imported = bulk_load(&service, &config, cli.patients.as_deref(), cli.consents.as_deref());

    match cli.command {
        Commands::Import => {
            println!(
                "{} {} tokens minted, chain height {}",
                "✅".green(),
                imported.to_string().bright_white().bold(),
                service.get_chain(Some(usize::MAX)).len()
            );
        }
        Commands::Verify { patient_id } => {
            let check = service.verify_consent(&patient_id);
            if check.valid {
                println!("{} {}: consent {}", "✅".green(), patient_id.bright_white(), check.reason.green());
            } else {
                println!("{} {}: consent {}", "❌".red(), patient_id.bright_white(), check.reason.red());
            }
        }
        Commands::Update {
            patient_id,
            allow,
            deny,
            expiry,
            wallet,
        } => {
            if allow == deny {
                return Err("pass exactly one of --allow or --deny".into());
            }
            if service.update_consent(&patient_id, allow, expiry.as_deref(), wallet.as_deref()) {
                let block = service.mine();
                println!("{} Consent updated for {}", "✅".green(), patient_id.bright_white());
                if let Some(block) = block {
                    println!("   Sealed in block #{} ({})", block.index, &block.hash[..16]);
                }
                println!("{}", IN_MEMORY_NOTICE.yellow());
            } else {
                return Err(format!("consent update rejected for patient {}", patient_id).into());
            }
        }
        Commands::Chain { limit } => print_chain(&service, limit),
        Commands::Stats => print_stats(&service),
        Commands::Audit => {
            println!("{}", serde_json::to_string_pretty(&service.export_audit_log())?);
        }
    }

    Ok(())
}

fn bulk_load(
    service: &ConsentService,
    config: &Config,
    patients: Option<&Path>,
    consents: Option<&Path>,
) -> usize {
    let patients = patients
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.import.patient_csv));
    let consents = consents
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.import.consent_csv));
    service.import_csv(&patients, &consents)
}

fn print_chain(service: &ConsentService, limit: Option<usize>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Index").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
            Cell::new("Txs").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
            Cell::new("Nonce").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
            Cell::new("Hash").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
            Cell::new("Previous").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
        ]);

    for block in service.get_chain(limit) {
        table.add_row(vec![
            Cell::new(block.index).fg(TableColor::Yellow),
            Cell::new(block.transactions.len()),
            Cell::new(block.nonce),
            Cell::new(short_hash(&block.hash)).fg(TableColor::Green),
            Cell::new(short_hash(&block.previous_hash)),
        ]);
    }
    println!("{}", table);

    if service.is_chain_valid() {
        println!("{}", "🔗 Chain is valid".green().bold());
    } else {
        println!("{}", "⚠️  Chain integrity check FAILED".red().bold());
    }
}

fn print_stats(service: &ConsentService) {
    let stats = service.stats();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Metric").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
            Cell::new("Value").add_attribute(Attribute::Bold).fg(TableColor::Cyan),
        ]);

    let rows: Vec<(&str, String)> = vec![
        ("Status", stats.system_status.to_string()),
        ("Contract", stats.contract_address.clone()),
        ("Blocks", stats.blockchain.total_blocks.to_string()),
        ("Transactions", stats.blockchain.total_transactions.to_string()),
        ("Pending", stats.blockchain.pending_transactions.to_string()),
        ("Chain valid", stats.blockchain.chain_valid.to_string()),
        ("Tokens", stats.consent.total_tokens.to_string()),
        ("Consented", stats.consent.consented_count.to_string()),
        ("Expired", stats.consent.expired_count.to_string()),
        ("Consent rate", format!("{:.1}%", stats.consent.consent_rate * 100.0)),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value).fg(TableColor::Green)]);
    }
    println!("{}", table);
}

fn short_hash(hash: &str) -> String {
    if hash.len() > 16 {
        format!("{}...", &hash[..16])
    } else {
        hash.to_string()
    }
}
