//! Command-line front-end for the compliance monitor.
//!
//! # Commands
//!
//! - `watch`: monitor contracts and print alerts until Ctrl-C
//! - `status`: print the current head and pool occupancy
//! - `history`: print classified past events of one kind
//!
//! # Example
//!
//! ```bash
//! chain-sentinel watch \
//!     --contract 0xdAC17F958D2ee523a2206206994597C13D831ec7:USDT \
//!     --events transfer,freeze --from-block 19000000
//!
//! chain-sentinel history --contract 0xdAC1...1ec7 --event transfer --from 19000000
//! ```

use crate::alerts::{AlertCallback, EventAlert, Severity};
use crate::config::Config;
use crate::error::{SentinelError, SentinelResult};
use crate::events::{ClassifiedEvent, EventKind};
use crate::monitor::EventMonitor;
use crate::rpc::AlloyHttpClient;
use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

/// Chain-event compliance monitor
#[derive(Parser, Debug)]
#[command(name = "chain-sentinel")]
#[command(about = "Watch token contracts and raise compliance alerts", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Monitor contracts until Ctrl-C
    Watch {
        /// Contract to watch, as ADDRESS or ADDRESS:NAME (repeatable)
        #[arg(short, long = "contract", required = true, value_parser = parse_contract)]
        contracts: Vec<ContractArg>,

        /// Event kinds to watch, comma-separated (default: all)
        #[arg(short, long, value_delimiter = ',', value_parser = parse_kind)]
        events: Vec<EventKind>,

        /// First block to scan (default: after the current head)
        #[arg(short, long)]
        from_block: Option<u64>,
    },

    /// Show node head and connection pool status
    Status,

    /// Fetch and print past events
    History {
        /// Contract address
        #[arg(short, long, value_parser = parse_address)]
        contract: Address,

        /// Event kind
        #[arg(short, long, value_parser = parse_kind)]
        event: EventKind,

        /// First block, inclusive
        #[arg(long)]
        from: u64,

        /// Last block, inclusive (default: current head)
        #[arg(long)]
        to: Option<u64>,
    },
}

/// `--contract` value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContractArg {
    address: Address,
    name: String,
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.trim()
        .parse::<Address>()
        .map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_contract(s: &str) -> Result<ContractArg, String> {
    let (addr, name) = match s.split_once(':') {
        Some((addr, name)) if !name.trim().is_empty() => (addr, name.trim().to_string()),
        Some((addr, _)) => (addr, addr.trim().to_string()),
        None => (s, s.trim().to_string()),
    };
    Ok(ContractArg {
        address: parse_address(addr)?,
        name,
    })
}

fn parse_kind(s: &str) -> Result<EventKind, String> {
    s.parse::<EventKind>().map_err(|e| e.to_string())
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration loading, connecting, or the command
/// itself fails.
pub async fn run() -> SentinelResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Watch {
            contracts,
            events,
            from_block,
        } => run_watch_command(&config, contracts, events, from_block).await,
        Commands::Status => run_status_command(&config).await,
        Commands::History {
            contract,
            event,
            from,
            to,
        } => run_history_command(&config, contract, event, from, to).await,
    }
}

async fn run_watch_command(
    config: &Config,
    contracts: Vec<ContractArg>,
    events: Vec<EventKind>,
    from_block: Option<u64>,
) -> SentinelResult<()> {
    let callback: AlertCallback = Arc::new(|alert: &EventAlert| {
        print_alert(alert);
        Ok(())
    });
    let monitor = EventMonitor::connect(config).await?.with_alert_callback(callback);

    let kinds: BTreeSet<EventKind> = events.into_iter().collect();
    for contract in contracts {
        monitor
            .add_contract(contract.address, kinds.clone(), contract.name.clone(), from_block)
            .await?;
        println!(
            "{} {} ({})",
            "Watching".cyan().bold(),
            contract.name.white().bold(),
            contract.address.to_string().dimmed()
        );
    }

    monitor.start()?;
    println!("{}", "Monitor running, press Ctrl-C to stop".cyan());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutdown signal received");
    println!();
    println!("{}", "Shutting down...".yellow().bold());

    let stopped = monitor.stop().await;
    print_summary(&monitor);
    stopped
}

async fn run_status_command(config: &Config) -> SentinelResult<()> {
    let monitor = EventMonitor::connect(config).await?;
    let status = monitor.connection_status().await;

    match (status.head, status.error) {
        (Some(head), _) => println!("{} {}", "Head:".cyan().bold(), head.to_string().yellow()),
        (None, Some(e)) => println!("{} {}", "Head unavailable:".red().bold(), e),
        (None, None) => println!("{}", "Head unavailable".red().bold()),
    }
    println!(
        "{} {} live / {} configured, {} available, {} leased",
        "Pool:".cyan().bold(),
        status.pool.size,
        status.pool.capacity,
        status.pool.available,
        status.pool.leased
    );
    Ok(())
}

async fn run_history_command(
    config: &Config,
    contract: Address,
    kind: EventKind,
    from: u64,
    to: Option<u64>,
) -> SentinelResult<()> {
    let monitor: EventMonitor<AlloyHttpClient> = EventMonitor::connect(config).await?;

    let to = match to {
        Some(to) => to,
        None => {
            let status = monitor.connection_status().await;
            status.head.ok_or_else(|| {
                SentinelError::rpc(
                    format!(
                        "Failed to read head: {}",
                        status.error.unwrap_or_else(|| "unknown error".to_string())
                    ),
                    None,
                )
            })?
        }
    };

    let events = monitor.get_historical_events(contract, kind, from, to).await?;
    if events.is_empty() {
        println!(
            "{}",
            format!("No {kind} events in blocks {from}..={to}").yellow()
        );
        return Ok(());
    }

    for event in &events {
        print_event(event);
    }
    println!("{} {}", "Total:".cyan().bold(), events.len());
    Ok(())
}

fn severity_label(severity: Severity) -> String {
    let label = format!("[{severity}]");
    match severity {
        Severity::Info => label.blue().to_string(),
        Severity::Warning => label.yellow().bold().to_string(),
        Severity::Critical => label.red().bold().to_string(),
        Severity::Emergency => label.on_red().white().bold().to_string(),
    }
}

fn print_alert(alert: &EventAlert) {
    println!(
        "{} {} {} | block {} | {} | tx {}",
        alert.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        severity_label(alert.severity),
        alert.message.white().bold(),
        alert.block_number.to_string().yellow(),
        alert.contract_address.to_string().dimmed(),
        alert.transaction_hash.to_string().dimmed()
    );
}

fn print_event(event: &ClassifiedEvent) {
    let args = event
        .args
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "{} {} {} {}",
        event.raw.block_number.to_string().yellow(),
        event.kind.to_string().cyan().bold(),
        args,
        event.raw.transaction_hash.to_string().dimmed()
    );
}

fn print_summary(monitor: &EventMonitor<AlloyHttpClient>) {
    let metrics = monitor.get_metrics();
    let snapshot = &metrics.snapshot;
    println!(
        "{} {} events, {} alerts ({} dispatched, {} dropped), {} decode failures",
        "Summary:".green().bold(),
        snapshot.total_transactions,
        snapshot.alerts_generated,
        snapshot.alerts_dispatched,
        snapshot.dropped_alerts,
        snapshot.decode_failures
    );
    if !monitor.is_healthy() {
        println!("{}", "Monitor stopped unhealthy, see logs".red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

    #[test]
    fn test_parse_contract_with_and_without_name() {
        let named = parse_contract(&format!("{USDT}:Tether"));
        assert!(matches!(named, Ok(ref c) if c.name == "Tether"));

        let bare = parse_contract(USDT);
        assert!(matches!(bare, Ok(ref c) if c.name == USDT));

        assert!(parse_contract("0x1234:short").is_err());
    }

    #[test]
    fn test_watch_parsing() {
        let args = vec![
            "chain-sentinel",
            "watch",
            "--contract",
            USDT,
            "--events",
            "transfer,Freeze",
            "--from-block",
            "100",
        ];
        let cli = Cli::try_parse_from(args);
        assert!(cli.is_ok());

        if let Ok(Cli {
            command:
                Commands::Watch {
                    contracts,
                    events,
                    from_block,
                },
        }) = cli
        {
            assert_eq!(contracts.len(), 1);
            assert_eq!(events, vec![EventKind::Transfer, EventKind::Freeze]);
            assert_eq!(from_block, Some(100));
        }
    }

    #[test]
    fn test_watch_requires_contract() {
        let cli = Cli::try_parse_from(vec!["chain-sentinel", "watch"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_unknown_event_kind_rejected() {
        let args = vec!["chain-sentinel", "watch", "--contract", USDT, "--events", "swap"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_history_parsing() {
        let args = vec![
            "chain-sentinel",
            "history",
            "--contract",
            USDT,
            "--event",
            "mint",
            "--from",
            "10",
        ];
        let cli = Cli::try_parse_from(args);
        assert!(cli.is_ok());

        if let Ok(Cli {
            command: Commands::History { event, from, to, .. },
        }) = cli
        {
            assert_eq!(event, EventKind::Mint);
            assert_eq!(from, 10);
            assert_eq!(to, None);
        }
    }

    #[test]
    fn test_status_parsing() {
        let cli = Cli::try_parse_from(vec!["chain-sentinel", "status"]);
        assert!(matches!(cli, Ok(Cli { command: Commands::Status })));
    }
}
