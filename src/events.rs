//! Event model for monitored token contracts.
//!
//! Raw logs enter the pipeline as [`RawEvent`] values, are classified into an
//! [`EventKind`] and become [`ClassifiedEvent`] values carrying a best-effort
//! decoded argument map.
//!
//! ## Signatures
//!
//! The known compliance-token events are declared with Alloy's `sol!` macro so
//! their topic hashes are computed at compile time instead of being copied
//! around as hex literals:
//!
//! | Event | Canonical signature |
//! |---|---|
//! | `Transfer` | `Transfer(address,address,uint256)` |
//! | `Mint` | `Mint(address,uint256)` |
//! | `Burn` | `Burn(address,uint256)` |
//! | `Freeze` | `Freeze(address)` |
//! | `Unfreeze` | `Unfreeze(address)` |
//!
//! ## Example
//!
//! ```
//! use chain_sentinel::events::{EventKind, Transfer};
//! use alloy::sol_types::SolEvent;
//!
//! assert_eq!(EventKind::Transfer.signature_hash(), Some(Transfer::SIGNATURE_HASH));
//! assert_eq!(EventKind::Unknown.signature_hash(), None);
//! ```

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{SentinelError, SentinelResult};

// Compliance token interface. Only the events matter here; indexing of the
// address arguments does not change the topic hash.
sol! {
    interface IComplianceToken {
        /// Emitted on every balance movement between two holders.
        event Transfer(address indexed from, address indexed to, uint256 value);

        /// Emitted when new supply is issued to `to`.
        event Mint(address indexed to, uint256 amount);

        /// Emitted when supply held by `from` is destroyed.
        event Burn(address indexed from, uint256 amount);

        /// Emitted when an account is frozen by the issuer.
        event Freeze(address indexed account);

        /// Emitted when a frozen account is released.
        event Unfreeze(address indexed account);
    }
}

pub use IComplianceToken::{Burn, Freeze, Mint, Transfer, Unfreeze};

/// Kind of a classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Token transfer between two addresses
    Transfer,
    /// Supply issuance
    Mint,
    /// Supply destruction
    Burn,
    /// Account frozen by the issuer
    Freeze,
    /// Account released by the issuer
    Unfreeze,
    /// Signature not present in the classifier table
    Unknown,
}

impl EventKind {
    /// Every kind that has a built-in signature.
    pub const KNOWN: [Self; 5] = [
        Self::Transfer,
        Self::Mint,
        Self::Burn,
        Self::Freeze,
        Self::Unfreeze,
    ];

    /// Built-in topic-0 hash for this kind, `None` for [`EventKind::Unknown`].
    #[must_use]
    pub fn signature_hash(self) -> Option<B256> {
        match self {
            Self::Transfer => Some(Transfer::SIGNATURE_HASH),
            Self::Mint => Some(Mint::SIGNATURE_HASH),
            Self::Burn => Some(Burn::SIGNATURE_HASH),
            Self::Freeze => Some(Freeze::SIGNATURE_HASH),
            Self::Unfreeze => Some(Unfreeze::SIGNATURE_HASH),
            Self::Unknown => None,
        }
    }

    /// Lower-case name used in logs, metrics keys and alert messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Mint => "mint",
            Self::Burn => "burn",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transfer" => Ok(Self::Transfer),
            "mint" => Ok(Self::Mint),
            "burn" => Ok(Self::Burn),
            "freeze" => Ok(Self::Freeze),
            "unfreeze" => Ok(Self::Unfreeze),
            other => Err(SentinelError::config(
                format!("unknown event kind '{other}' (expected transfer, mint, burn, freeze or unfreeze)"),
                None,
            )),
        }
    }
}

/// A log as returned by the chain node, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics; topic 0 is the event signature hash
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed payload
    pub data: Bytes,
    /// Transaction that emitted the log
    pub transaction_hash: B256,
    /// Block containing the transaction
    pub block_number: u64,
    /// Position of the log within the block
    pub log_index: u64,
    /// Gas used by the emitting transaction, when receipts were fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

impl RawEvent {
    /// First topic, if any.
    #[must_use]
    pub fn signature(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

impl TryFrom<&alloy::rpc::types::Log> for RawEvent {
    type Error = SentinelError;

    /// Convert an RPC log into a [`RawEvent`].
    ///
    /// Pending logs carry no block number, transaction hash or log index and
    /// are rejected.
    fn try_from(log: &alloy::rpc::types::Log) -> SentinelResult<Self> {
        let block_number = log
            .block_number
            .ok_or_else(|| SentinelError::decoding("Log missing block number", None))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_else(|| SentinelError::decoding("Log missing transaction hash", None))?;
        let log_index = log
            .log_index
            .ok_or_else(|| SentinelError::decoding("Log missing log index", None))?;

        Ok(Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            transaction_hash,
            block_number,
            log_index,
            gas_used: None,
        })
    }
}

/// A decoded event argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgValue {
    /// 20-byte account address
    Address(Address),
    /// Unsigned 256-bit integer
    Uint(U256),
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Address(address) => serializer.serialize_str(&address.to_checksum(None)),
            // Decimal rather than the 0x form alloy emits.
            Self::Uint(value) => serializer.serialize_str(&value.to_string()),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}", address.to_checksum(None)),
            Self::Uint(value) => write!(f, "{value}"),
        }
    }
}

/// Best-effort decoded arguments, keyed by parameter name.
pub type EventArgs = BTreeMap<String, ArgValue>;

/// A raw event together with its kind and decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedEvent {
    /// Underlying log
    pub raw: RawEvent,
    /// Classified kind
    pub kind: EventKind,
    /// Decoded arguments (may be empty)
    pub args: EventArgs,
}

impl ClassifiedEvent {
    /// Look up a decoded integer argument.
    #[must_use]
    pub fn uint_arg(&self, name: &str) -> Option<U256> {
        match self.args.get(name) {
            Some(ArgValue::Uint(value)) => Some(*value),
            _ => None,
        }
    }

    /// Look up a decoded address argument.
    #[must_use]
    pub fn address_arg(&self, name: &str) -> Option<Address> {
        match self.args.get(name) {
            Some(ArgValue::Address(address)) => Some(*address),
            _ => None,
        }
    }
}
