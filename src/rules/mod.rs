//! Compliance rule evaluation.
//!
//! [`ComplianceRuleEngine`] owns an ordered list of [`Rule`]s and all of their
//! state. The built-in order is large transfer, rapid transfers, suspicious
//! gas, then freeze/unfreeze; every rule sees every classified event and may
//! add one alert. Unknown events never reach the rules.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

use crate::alerts::EventAlert;
use crate::error::SentinelResult;
use crate::events::{ClassifiedEvent, EventKind};

pub mod checks;
pub mod thresholds;
pub mod window;

pub use checks::{
    ComplianceActionRule, LargeTransferRule, RapidTransferRule, SuspiciousGasRule, BASELINE_GAS,
};
pub use thresholds::{ComplianceThresholds, SharedThresholds, THRESHOLD_KEYS};
pub use window::{SlidingWindow, WindowScope};

/// A single compliance check.
pub trait Rule: Send + Sync + Debug {
    /// Stable identifier used in logs.
    fn name(&self) -> &'static str;

    /// Inspect `event`, updating any internal state, and maybe raise an alert.
    fn evaluate(
        &mut self,
        event: &ClassifiedEvent,
        thresholds: &ComplianceThresholds,
        now: DateTime<Utc>,
    ) -> Option<EventAlert>;
}

/// Ordered, stateful rule set.
#[derive(Debug)]
pub struct ComplianceRuleEngine {
    rules: Vec<Box<dyn Rule>>,
    thresholds: SharedThresholds,
}

impl ComplianceRuleEngine {
    /// Engine with the built-in rules.
    #[must_use]
    pub fn new(thresholds: SharedThresholds, scope: WindowScope) -> Self {
        let mut engine = Self::empty(thresholds);
        engine.add_rule(Box::new(LargeTransferRule));
        engine.add_rule(Box::new(RapidTransferRule::new(scope)));
        engine.add_rule(Box::new(SuspiciousGasRule));
        engine.add_rule(Box::new(ComplianceActionRule));
        engine
    }

    /// Engine without rules.
    #[must_use]
    pub fn empty(thresholds: SharedThresholds) -> Self {
        Self {
            rules: Vec::new(),
            thresholds,
        }
    }

    /// Append a rule; it runs after the existing ones.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Rule names in evaluation order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Shared threshold handle.
    #[must_use]
    pub fn thresholds(&self) -> SharedThresholds {
        Arc::clone(&self.thresholds)
    }

    /// Update one threshold.
    ///
    /// # Errors
    ///
    /// See [`ComplianceThresholds::set`].
    pub fn set_threshold(&self, key: &str, value: &str) -> SentinelResult<()> {
        self.thresholds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value)
    }

    /// Run every rule over `event`, in order.
    pub fn evaluate(&mut self, event: &ClassifiedEvent, now: DateTime<Utc>) -> Vec<EventAlert> {
        if event.kind == EventKind::Unknown {
            return Vec::new();
        }

        let thresholds = self
            .thresholds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut alerts = Vec::new();
        for rule in &mut self.rules {
            if let Some(alert) = rule.evaluate(event, &thresholds, now) {
                trace!(rule = rule.name(), tx = %event.raw.transaction_hash, "Rule fired");
                alerts.push(alert);
            }
        }
        alerts
    }
}

/// Wrap `thresholds` for sharing with a running engine.
#[must_use]
pub fn shared_thresholds(thresholds: ComplianceThresholds) -> SharedThresholds {
    Arc::new(RwLock::new(thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Severity;
    use crate::events::{ArgValue, EventArgs, RawEvent};
    use alloy::primitives::{Address, Bytes, B256, U256};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .unwrap_or_default()
    }

    fn event(kind: EventKind, contract: u8, value: Option<U256>, gas: Option<u64>) -> ClassifiedEvent {
        let mut args = EventArgs::new();
        if let Some(value) = value {
            args.insert("value".into(), ArgValue::Uint(value));
        }
        ClassifiedEvent {
            raw: RawEvent {
                address: Address::repeat_byte(contract),
                topics: vec![B256::repeat_byte(0x01), B256::repeat_byte(0x02)],
                data: Bytes::new(),
                transaction_hash: B256::repeat_byte(0x33),
                block_number: 12,
                log_index: 0,
                gas_used: gas,
            },
            kind,
            args,
        }
    }

    fn engine_with(thresholds: ComplianceThresholds, scope: WindowScope) -> ComplianceRuleEngine {
        ComplianceRuleEngine::new(shared_thresholds(thresholds), scope)
    }

    #[test]
    fn test_large_transfer_is_strictly_greater() {
        let threshold = U256::from(1_000u64);
        let thresholds = ComplianceThresholds {
            large_transfer_amount: threshold,
            ..ComplianceThresholds::default()
        };
        let mut engine = engine_with(thresholds, WindowScope::Global);

        let equal = engine.evaluate(&event(EventKind::Transfer, 1, Some(threshold), None), at(0));
        assert!(equal.is_empty());

        let above = threshold + U256::from(1u64);
        let alerts = engine.evaluate(&event(EventKind::Transfer, 1, Some(above), None), at(1));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].details["amount"], json!("1001"));
        assert_eq!(alerts[0].details["threshold"], json!("1000"));
    }

    #[test]
    fn test_freeze_yields_one_critical_alert() {
        let mut engine = engine_with(ComplianceThresholds::default(), WindowScope::Global);
        let alerts = engine.evaluate(&event(EventKind::Freeze, 1, None, None), at(0));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].event_type, EventKind::Freeze);
        assert_eq!(alerts[0].message, "Compliance action: freeze");
        assert_eq!(alerts[0].details["topics"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_unfreeze_is_critical() {
        let mut engine = engine_with(ComplianceThresholds::default(), WindowScope::Global);
        let alerts = engine.evaluate(&event(EventKind::Unfreeze, 1, None, None), at(0));
        assert!(matches!(alerts.as_slice(), [a] if a.event_type == EventKind::Unfreeze));
    }

    #[test]
    fn test_rapid_transfers_fire_past_count() {
        let thresholds = ComplianceThresholds {
            rapid_transfers_count: 3,
            rapid_transfers_window: 60,
            ..ComplianceThresholds::default()
        };
        let mut engine = engine_with(thresholds, WindowScope::Global);

        let mut fired = Vec::new();
        for i in 0..5 {
            let alerts = engine.evaluate(&event(EventKind::Mint, 1, None, None), at(i));
            fired.push(alerts.len());
        }
        assert_eq!(fired, vec![0, 0, 0, 1, 1]);

        // The window has emptied by now.
        let later = engine.evaluate(&event(EventKind::Mint, 1, None, None), at(500));
        assert!(later.is_empty());
    }

    #[test]
    fn test_rapid_transfer_alert_details() {
        let thresholds = ComplianceThresholds {
            rapid_transfers_count: 1,
            rapid_transfers_window: 30,
            ..ComplianceThresholds::default()
        };
        let mut engine = engine_with(thresholds, WindowScope::Global);
        let _ = engine.evaluate(&event(EventKind::Burn, 1, None, None), at(0));
        let alerts = engine.evaluate(&event(EventKind::Burn, 1, None, None), at(1));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event_type, EventKind::Transfer);
        assert_eq!(alerts[0].details["transfer_count"], json!(2));
        assert_eq!(alerts[0].details["window_seconds"], json!(30));
    }

    #[test]
    fn test_window_scope() {
        let thresholds = ComplianceThresholds {
            rapid_transfers_count: 1,
            ..ComplianceThresholds::default()
        };

        let mut global = engine_with(thresholds.clone(), WindowScope::Global);
        let _ = global.evaluate(&event(EventKind::Mint, 1, None, None), at(0));
        assert_eq!(global.evaluate(&event(EventKind::Mint, 2, None, None), at(1)).len(), 1);

        let mut per_contract = engine_with(thresholds, WindowScope::PerContract);
        let _ = per_contract.evaluate(&event(EventKind::Mint, 1, None, None), at(0));
        assert!(per_contract
            .evaluate(&event(EventKind::Mint, 2, None, None), at(1))
            .is_empty());
        assert_eq!(
            per_contract
                .evaluate(&event(EventKind::Mint, 1, None, None), at(2))
                .len(),
            1
        );
    }

    #[test]
    fn test_suspicious_gas() {
        let mut engine = engine_with(ComplianceThresholds::default(), WindowScope::Global);

        let at_limit = engine.evaluate(&event(EventKind::Mint, 1, None, Some(500_000)), at(0));
        assert!(at_limit.is_empty());

        let alerts = engine.evaluate(&event(EventKind::Mint, 1, None, Some(500_001)), at(1));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Info);
        assert_eq!(alerts[0].details["gas_used"], json!(500_001));
        assert_eq!(alerts[0].details["average_gas"], json!(100_000));

        let big = engine.evaluate(&event(EventKind::Mint, 1, None, Some(1_000_000)), at(2));
        assert_eq!(big[0].details["multiplier"], json!(10.0));
        assert_eq!(big[0].details["threshold_multiplier"], json!(5.0));

        let no_receipt = engine.evaluate(&event(EventKind::Mint, 1, None, None), at(3));
        assert!(no_receipt.is_empty());
    }

    #[test]
    fn test_rules_run_in_order() {
        let thresholds = ComplianceThresholds {
            large_transfer_amount: U256::from(10u64),
            rapid_transfers_count: 0,
            ..ComplianceThresholds::default()
        };
        let mut engine = engine_with(thresholds, WindowScope::Global);
        let alerts = engine.evaluate(
            &event(EventKind::Transfer, 1, Some(U256::from(11u64)), Some(10_000_000)),
            at(0),
        );
        let severities: Vec<Severity> = alerts.iter().map(|a| a.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Warning, Severity::Warning, Severity::Info]
        );
        assert!(alerts[0].message.starts_with("Large transfer"));
        assert!(alerts[1].message.starts_with("Rapid transfer"));
        assert_eq!(
            engine.rule_names(),
            vec!["large_transfer", "rapid_transfers", "suspicious_gas", "compliance_action"]
        );
    }

    #[test]
    fn test_unknown_events_bypass_rules() {
        let thresholds = ComplianceThresholds {
            rapid_transfers_count: 0,
            ..ComplianceThresholds::default()
        };
        let mut engine = engine_with(thresholds, WindowScope::Global);
        assert!(engine
            .evaluate(&event(EventKind::Unknown, 1, None, Some(u64::MAX)), at(0))
            .is_empty());
    }

    #[test]
    fn test_set_threshold_applies_to_next_event() {
        let mut engine = engine_with(ComplianceThresholds::default(), WindowScope::Global);
        let value = Some(U256::from(50u64));

        assert!(engine.evaluate(&event(EventKind::Transfer, 1, value, None), at(0)).is_empty());
        assert!(engine.set_threshold("large_transfer_amount", "49").is_ok());
        assert_eq!(
            engine.evaluate(&event(EventKind::Transfer, 1, value, None), at(1)).len(),
            1
        );
        assert!(engine.set_threshold("large_transfer_amount", "0").is_err());
    }
}
