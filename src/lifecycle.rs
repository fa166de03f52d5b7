//! Reporting period lifecycle
//!
//! A period moves `draft -> ranked -> paid`, with an operator-only
//! `on_hold` state reachable from anywhere. The engine never blocks a
//! payment on ranking state; it only logs the anomaly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store::{RankingStore, ReportingPeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Draft,
    Ranked,
    Paid,
    OnHold,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Draft => "draft",
            PeriodStatus::Ranked => "ranked",
            PeriodStatus::Paid => "paid",
            PeriodStatus::OnHold => "on_hold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(PeriodStatus::Draft),
            "ranked" => Some(PeriodStatus::Ranked),
            "paid" => Some(PeriodStatus::Paid),
            "on_hold" => Some(PeriodStatus::OnHold),
            _ => None,
        }
    }
}

/// Payment metadata recorded when a period's reward purchase settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub exchange_name: String,
    pub conversion_rate: f64,
    pub transaction_id: String,
    pub purchased_at: DateTime<Utc>,
}

impl PaymentDetails {
    fn validate(&self) -> Result<()> {
        if self.transaction_id.trim().is_empty() {
            return Err(Error::InvalidPayment("transaction_id is required"));
        }
        if self.exchange_name.trim().is_empty() {
            return Err(Error::InvalidPayment("exchange_name is required"));
        }
        if !self.conversion_rate.is_finite() || self.conversion_rate <= 0.0 {
            return Err(Error::InvalidPayment(
                "conversion_rate must be a positive number",
            ));
        }
        Ok(())
    }
}

pub struct PeriodLifecycle {
    store: Arc<RankingStore>,
}

impl PeriodLifecycle {
    pub fn new(store: Arc<RankingStore>) -> Self {
        Self { store }
    }

    /// Record the reward purchase for a period and move it to `paid`.
    ///
    /// All four payment fields are written in one statement. Recording
    /// again on an already-paid period overwrites them (a correction).
    /// Validation happens before any write, so an invalid payment leaves
    /// the period untouched.
    pub fn record_payment(
        &self,
        period_id: i64,
        details: &PaymentDetails,
    ) -> Result<ReportingPeriod> {
        details.validate()?;
        let period = self.store.get_period(period_id)?;

        if self.store.list_rankings(period_id)?.is_empty() {
            warn!(
                "Recording payment for period {} ({}) with no rankings",
                period_id, period.label
            );
        }
        if period.status == PeriodStatus::Paid {
            info!(
                "Overwriting payment fields for already-paid period {}",
                period_id
            );
        }

        let updated = self.store.record_period_payment(period_id, details)?;
        info!(
            "Recorded payment for period {}: tx {} on {}",
            period_id, details.transaction_id, details.exchange_name
        );
        Ok(updated)
    }

    /// Advance `draft -> ranked` once the first ranking lands. Any other
    /// starting state is left alone.
    pub fn mark_ranked(&self, period_id: i64) -> Result<ReportingPeriod> {
        let period = self.store.get_period(period_id)?;
        if period.status != PeriodStatus::Draft {
            return Ok(period);
        }
        self.store
            .update_period_status(period_id, PeriodStatus::Ranked, None)
    }

    /// Operator escape hatch: park the period for manual intervention.
    pub fn place_on_hold(&self, period_id: i64, reason: &str) -> Result<ReportingPeriod> {
        let period = self
            .store
            .update_period_status(period_id, PeriodStatus::OnHold, Some(reason))?;
        warn!("Period {} placed on hold: {}", period_id, reason);
        Ok(period)
    }

    /// Return a held period to `draft`. Not on hold: no-op.
    pub fn release_hold(&self, period_id: i64) -> Result<ReportingPeriod> {
        let period = self.store.get_period(period_id)?;
        if period.status != PeriodStatus::OnHold {
            return Ok(period);
        }
        self.store
            .update_period_status(period_id, PeriodStatus::Draft, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> (Arc<RankingStore>, PeriodLifecycle) {
        let store = Arc::new(RankingStore::in_memory().unwrap());
        let lifecycle = PeriodLifecycle::new(store.clone());
        (store, lifecycle)
    }

    fn payment() -> PaymentDetails {
        PaymentDetails {
            exchange_name: "Binance".to_string(),
            conversion_rate: 0.000124,
            transaction_id: "abc123".to_string(),
            purchased_at: Utc::now(),
        }
    }

    #[test]
    fn payment_moves_period_to_paid() {
        let (store, lifecycle) = lifecycle();
        let period = store.create_period("2026-07").unwrap();

        let paid = lifecycle.record_payment(period.id, &payment()).unwrap();
        assert_eq!(paid.status, PeriodStatus::Paid);
        assert_eq!(paid.payment_transaction_id.as_deref(), Some("abc123"));
        assert_eq!(paid.purchase_exchange_name.as_deref(), Some("Binance"));
        assert!(paid.purchased_at.is_some());
        assert_eq!(paid.purchase_conversion_rate, Some(0.000124));
    }

    #[test]
    fn empty_transaction_id_is_rejected_without_side_effects() {
        let (store, lifecycle) = lifecycle();
        let period = store.create_period("2026-07").unwrap();

        let details = PaymentDetails {
            transaction_id: String::new(),
            ..payment()
        };
        let err = lifecycle.record_payment(period.id, &details).unwrap_err();
        assert!(matches!(err, Error::InvalidPayment(_)));

        let unchanged = store.get_period(period.id).unwrap();
        assert_eq!(unchanged.status, PeriodStatus::Draft);
        assert!(unchanged.payment_transaction_id.is_none());
    }

    #[test]
    fn repeated_payment_is_a_correction() {
        let (store, lifecycle) = lifecycle();
        let period = store.create_period("2026-07").unwrap();

        lifecycle.record_payment(period.id, &payment()).unwrap();
        let corrected = lifecycle
            .record_payment(
                period.id,
                &PaymentDetails {
                    transaction_id: "def456".to_string(),
                    ..payment()
                },
            )
            .unwrap();

        assert_eq!(corrected.status, PeriodStatus::Paid);
        assert_eq!(corrected.payment_transaction_id.as_deref(), Some("def456"));
    }

    #[test]
    fn hold_and_release() {
        let (store, lifecycle) = lifecycle();
        let period = store.create_period("2026-07").unwrap();

        let held = lifecycle
            .place_on_hold(period.id, "payout under review")
            .unwrap();
        assert_eq!(held.status, PeriodStatus::OnHold);
        assert_eq!(held.hold_reason.as_deref(), Some("payout under review"));

        let released = lifecycle.release_hold(period.id).unwrap();
        assert_eq!(released.status, PeriodStatus::Draft);
        assert!(released.hold_reason.is_none());

        // Releasing a period that is not held changes nothing.
        let again = lifecycle.release_hold(period.id).unwrap();
        assert_eq!(again.status, PeriodStatus::Draft);
    }

    #[test]
    fn hold_is_reachable_from_paid() {
        let (store, lifecycle) = lifecycle();
        let period = store.create_period("2026-07").unwrap();

        lifecycle.record_payment(period.id, &payment()).unwrap();
        let held = lifecycle.place_on_hold(period.id, "chargeback").unwrap();
        assert_eq!(held.status, PeriodStatus::OnHold);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(PeriodStatus::OnHold).unwrap(),
            serde_json::json!("on_hold")
        );
        assert_eq!(PeriodStatus::parse("on_hold"), Some(PeriodStatus::OnHold));
    }

    #[test]
    fn unknown_period_is_not_found() {
        let (_store, lifecycle) = lifecycle();
        let err = lifecycle.record_payment(999, &payment()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
