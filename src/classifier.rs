//! Event classification by topic signature.
//!
//! [`SignatureRegistry`] maps a 32-byte topic-0 hash to an [`EventKind`]. It
//! starts with the built-in compliance-token signatures and can be extended
//! with [`SignatureRegistry::register`] or [`SignatureRegistry::register_signature`]
//! without touching the dispatch logic.
//!
//! Classification never fails for unknown signatures (they become
//! [`EventKind::Unknown`]); it fails only when a known signature's log does
//! not have the shape needed to decode it.
//!
//! ## Example
//!
//! ```
//! use chain_sentinel::classifier::SignatureRegistry;
//! use chain_sentinel::events::EventKind;
//!
//! let mut registry = SignatureRegistry::with_defaults();
//! registry.register_signature("AddressFrozen(address,bool,address)", EventKind::Freeze);
//! assert_eq!(registry.signatures_for(EventKind::Freeze).len(), 2);
//! ```

use alloy::primitives::{keccak256, Address, B256, U256};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{SentinelError, SentinelResult};
use crate::events::{ArgValue, ClassifiedEvent, EventArgs, EventKind, RawEvent};

/// Registerable table from signature hash to event kind.
#[derive(Debug, Clone, Default)]
pub struct SignatureRegistry {
    table: HashMap<B256, EventKind>,
}

impl SignatureRegistry {
    /// Empty registry: every log classifies as [`EventKind::Unknown`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in signatures.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in EventKind::KNOWN {
            if let Some(hash) = kind.signature_hash() {
                registry.register(hash, kind);
            }
        }
        registry
    }

    /// Map `hash` to `kind`, replacing any previous mapping.
    pub fn register(&mut self, hash: B256, kind: EventKind) {
        debug!(signature = %hash, kind = %kind, "Registering event signature");
        self.table.insert(hash, kind);
    }

    /// Register a canonical Solidity signature such as `"Freeze(address)"`.
    ///
    /// Returns the computed topic hash.
    pub fn register_signature(&mut self, signature: &str, kind: EventKind) -> B256 {
        let hash = keccak256(signature.as_bytes());
        self.register(hash, kind);
        hash
    }

    /// Kind for a topic-0 hash.
    #[must_use]
    pub fn kind_of(&self, signature: &B256) -> EventKind {
        self.table
            .get(signature)
            .copied()
            .unwrap_or(EventKind::Unknown)
    }

    /// All registered hashes for `kind`, sorted for stable filters.
    #[must_use]
    pub fn signatures_for(&self, kind: EventKind) -> Vec<B256> {
        let mut hashes: Vec<B256> = self
            .table
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(hash, _)| *hash)
            .collect();
        hashes.sort_unstable();
        hashes
    }

    /// Topic-0 filter for a contract's kind set.
    ///
    /// An empty set yields an empty filter, meaning every event.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::FilterCreationError`] if a requested kind has
    /// no registered signature.
    pub fn topic_filter(&self, kinds: &BTreeSet<EventKind>) -> SentinelResult<Vec<B256>> {
        let mut topics = Vec::new();
        for kind in kinds {
            let hashes = self.signatures_for(*kind);
            if hashes.is_empty() {
                return Err(SentinelError::filter(format!(
                    "no signature registered for event kind '{kind}'"
                )));
            }
            topics.extend(hashes);
        }
        Ok(topics)
    }

    /// Classify a raw log and decode its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::DecodingError`] when a Transfer log lacks its
    /// indexed addresses or carries a value wider than 256 bits.
    pub fn classify(&self, raw: RawEvent) -> SentinelResult<ClassifiedEvent> {
        let kind = raw
            .signature()
            .map_or(EventKind::Unknown, |sig| self.kind_of(&sig));

        let args = match kind {
            EventKind::Transfer => decode_transfer(&raw)?,
            EventKind::Mint | EventKind::Burn => decode_supply(&raw),
            EventKind::Freeze | EventKind::Unfreeze => decode_account(&raw),
            EventKind::Unknown => EventArgs::new(),
        };

        Ok(ClassifiedEvent { raw, kind, args })
    }
}

/// Address stored left-padded in a 32-byte topic.
fn topic_address(topic: &B256) -> Address {
    Address::from_word(*topic)
}

/// Big-endian integer payload of at most one word. Empty data decodes as zero.
fn data_uint(data: &[u8]) -> Option<U256> {
    match data.len() {
        0 => Some(U256::ZERO),
        1..=32 => U256::try_from_be_slice(data),
        _ => None,
    }
}

fn decode_transfer(raw: &RawEvent) -> SentinelResult<EventArgs> {
    if raw.topics.len() < 3 {
        return Err(SentinelError::decoding(
            format!(
                "Transfer log in tx {} has {} topics, expected 3",
                raw.transaction_hash,
                raw.topics.len()
            ),
            None,
        ));
    }

    let value = data_uint(&raw.data).ok_or_else(|| {
        SentinelError::decoding(
            format!(
                "Transfer value in tx {} is {} bytes, wider than uint256",
                raw.transaction_hash,
                raw.data.len()
            ),
            None,
        )
    })?;

    let mut args = EventArgs::new();
    args.insert("from".into(), ArgValue::Address(topic_address(&raw.topics[1])));
    args.insert("to".into(), ArgValue::Address(topic_address(&raw.topics[2])));
    args.insert("value".into(), ArgValue::Uint(value));
    Ok(args)
}

fn decode_supply(raw: &RawEvent) -> EventArgs {
    let mut args = decode_account(raw);
    if !raw.data.is_empty() {
        if let Some(amount) = data_uint(&raw.data) {
            args.insert("amount".into(), ArgValue::Uint(amount));
        }
    }
    args
}

fn decode_account(raw: &RawEvent) -> EventArgs {
    let mut args = EventArgs::new();
    if let Some(topic) = raw.topics.get(1) {
        args.insert("account".into(), ArgValue::Address(topic_address(topic)));
    }
    args
}
