//! # chain-sentinel
//!
//! Chain-event monitoring and compliance alerting for EVM token contracts,
//! built on [Alloy](https://github.com/alloy-rs/alloy) and Tokio.
//!
//! The monitor polls a pool of chain-node connections for logs emitted by a
//! set of contracts, classifies them (transfer, mint, burn, freeze,
//! unfreeze), aggregates metrics, evaluates compliance rules and dispatches
//! alerts to a callback.
//!
//! ## Architecture
//!
//! 1. **Node access** ([`rpc`]) - client trait, connection pool, retries
//! 2. **Ingestion** ([`ingest`]) - confirmation-safe block ranges per contract
//! 3. **Classification** ([`events`], [`classifier`]) - signature table and decoding
//! 4. **Rules** ([`rules`]) - large transfers, rapid transfers, gas, freezes
//! 5. **Metrics** ([`metrics`]) - running counters and snapshots
//! 6. **Alerts** ([`alerts`]) - severity-aware logging, history, callback
//! 7. **Lifecycle** ([`monitor`]) - start, stop, read APIs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chain_sentinel::{config::Config, events::EventKind, monitor::EventMonitor};
//! use std::collections::BTreeSet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let monitor = EventMonitor::connect(&config).await?;
//!
//!     let token = "0xdAC17F958D2ee523a2206206994597C13D831ec7".parse()?;
//!     let kinds = BTreeSet::from([EventKind::Transfer, EventKind::Freeze]);
//!     monitor.add_contract(token, kinds, "USDT", None).await?;
//!
//!     monitor.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     monitor.stop().await?;
//!
//!     println!("{:?}", monitor.get_stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Setup
//!
//! ```text
//! RPC_URLS=https://rpc-a.example,https://rpc-b.example
//! ```
//!
//! See [`config`] for every variable.
//!
//! ## Error Handling
//!
//! All fallible operations return
//! [`error::SentinelResult<T>`](error::SentinelResult):
//!
//! ```rust
//! use chain_sentinel::error::{SentinelError, SentinelResult};
//!
//! fn example() -> SentinelResult<()> {
//!     Err(SentinelError::filter("no signature registered"))
//! }
//! assert!(example().is_err());
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod alerts;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod monitor;
pub mod observability;
pub mod rpc;
pub mod rules;
