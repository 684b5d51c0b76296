//! Built-in compliance rules.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::{ComplianceThresholds, Rule, SlidingWindow, WindowScope};
use crate::alerts::{EventAlert, Severity};
use crate::events::{ClassifiedEvent, EventKind};

/// Fixed gas baseline the anomaly multiplier applies to.
pub const BASELINE_GAS: u64 = 100_000;

const TOKEN_DECIMALS: u32 = 18;

/// Raw units as whole tokens with two decimals, truncated.
fn format_tokens(amount: U256) -> String {
    let unit = U256::from(10u64).pow(U256::from(TOKEN_DECIMALS));
    let whole = amount / unit;
    let cents = (amount % unit) / U256::from(10u64).pow(U256::from(TOKEN_DECIMALS - 2));
    format!("{whole}.{:02}", u64::try_from(cents).unwrap_or(0))
}

fn details(pairs: Vec<(&str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Transfers whose value is strictly above the threshold.
#[derive(Debug, Default)]
pub struct LargeTransferRule;

impl Rule for LargeTransferRule {
    fn name(&self) -> &'static str {
        "large_transfer"
    }

    fn evaluate(
        &mut self,
        event: &ClassifiedEvent,
        thresholds: &ComplianceThresholds,
        now: DateTime<Utc>,
    ) -> Option<EventAlert> {
        if event.kind != EventKind::Transfer {
            return None;
        }
        let amount = event.uint_arg("value")?;
        if amount <= thresholds.large_transfer_amount {
            return None;
        }

        Some(EventAlert::for_event(
            event,
            Severity::Warning,
            format!("Large transfer detected: {} tokens", format_tokens(amount)),
            details(vec![
                ("amount", json!(amount.to_string())),
                ("threshold", json!(thresholds.large_transfer_amount.to_string())),
            ]),
            now,
        ))
    }
}

/// Bursts of events inside the rapid-transfer window.
#[derive(Debug, Default)]
pub struct RapidTransferRule {
    scope: WindowScope,
    global: SlidingWindow,
    per_contract: HashMap<Address, SlidingWindow>,
}

impl RapidTransferRule {
    /// Rule with the given window scope.
    #[must_use]
    pub fn new(scope: WindowScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    /// Window scope in use.
    #[must_use]
    pub const fn scope(&self) -> WindowScope {
        self.scope
    }
}

impl Rule for RapidTransferRule {
    fn name(&self) -> &'static str {
        "rapid_transfers"
    }

    fn evaluate(
        &mut self,
        event: &ClassifiedEvent,
        thresholds: &ComplianceThresholds,
        now: DateTime<Utc>,
    ) -> Option<EventAlert> {
        let span = thresholds.window();
        let window = match self.scope {
            WindowScope::Global => &mut self.global,
            WindowScope::PerContract => self.per_contract.entry(event.raw.address).or_default(),
        };
        let count = window.record(now, span);
        if (count as u64) <= thresholds.rapid_transfers_count {
            return None;
        }

        let mut alert = EventAlert::for_event(
            event,
            Severity::Warning,
            format!(
                "Rapid transfer pattern detected: {count} transfers in {} seconds",
                thresholds.rapid_transfers_window
            ),
            details(vec![
                ("transfer_count", json!(count)),
                ("window_seconds", json!(thresholds.rapid_transfers_window)),
            ]),
            now,
        );
        alert.event_type = EventKind::Transfer;
        Some(alert)
    }
}

/// Receipts whose gas is far above the baseline.
#[derive(Debug, Default)]
pub struct SuspiciousGasRule;

impl Rule for SuspiciousGasRule {
    fn name(&self) -> &'static str {
        "suspicious_gas"
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(
        &mut self,
        event: &ClassifiedEvent,
        thresholds: &ComplianceThresholds,
        now: DateTime<Utc>,
    ) -> Option<EventAlert> {
        let gas_used = event.raw.gas_used?;
        let limit = BASELINE_GAS as f64 * thresholds.suspicious_gas_multiplier;
        if gas_used as f64 <= limit {
            return None;
        }

        Some(EventAlert::for_event(
            event,
            Severity::Info,
            format!("High gas usage detected: {gas_used} gas"),
            details(vec![
                ("gas_used", json!(gas_used)),
                ("average_gas", json!(BASELINE_GAS)),
                ("multiplier", json!(gas_used as f64 / BASELINE_GAS as f64)),
                ("threshold_multiplier", json!(thresholds.suspicious_gas_multiplier)),
            ]),
            now,
        ))
    }
}

/// Every freeze or unfreeze.
#[derive(Debug, Default)]
pub struct ComplianceActionRule;

impl Rule for ComplianceActionRule {
    fn name(&self) -> &'static str {
        "compliance_action"
    }

    fn evaluate(
        &mut self,
        event: &ClassifiedEvent,
        _thresholds: &ComplianceThresholds,
        now: DateTime<Utc>,
    ) -> Option<EventAlert> {
        if !matches!(event.kind, EventKind::Freeze | EventKind::Unfreeze) {
            return None;
        }

        let topics: Vec<String> = event.raw.topics.iter().map(ToString::to_string).collect();
        Some(EventAlert::for_event(
            event,
            Severity::Critical,
            format!("Compliance action: {}", event.kind),
            details(vec![
                ("event_type", json!(event.kind)),
                ("topics", json!(topics)),
            ]),
            now,
        ))
    }
}
