//! Deposit and withdrawal state machines, fee arithmetic and per-item tick reporting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// One basis point is 1/10_000 of the gross amount.
pub const BPS_DENOMINATOR: u32 = 10_000;
pub const DEFAULT_FEE_BPS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Lifecycle of a deposit:
/// `RECEIVED -> STACKED -> WITHDRAW_REQUESTED -> {WITHDRAWN | FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Received,
    Stacked,
    WithdrawRequested,
    Withdrawn,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Received => "RECEIVED",
            DepositStatus::Stacked => "STACKED",
            DepositStatus::WithdrawRequested => "WITHDRAW_REQUESTED",
            DepositStatus::Withdrawn => "WITHDRAWN",
            DepositStatus::Failed => "FAILED",
        }
    }

    /// Whether `self -> next` is an edge of the state machine. Stages are never
    /// skipped and never revisited.
    pub fn can_transition_to(self, next: DepositStatus) -> bool {
        use DepositStatus::*;
        matches!(
            (self, next),
            (Received, Stacked)
                | (Stacked, WithdrawRequested)
                | (WithdrawRequested, Withdrawn)
                | (WithdrawRequested, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DepositStatus::Withdrawn | DepositStatus::Failed)
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(DepositStatus::Received),
            "STACKED" => Ok(DepositStatus::Stacked),
            "WITHDRAW_REQUESTED" => Ok(DepositStatus::WithdrawRequested),
            "WITHDRAWN" => Ok(DepositStatus::Withdrawn),
            "FAILED" => Ok(DepositStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Completed => "COMPLETED",
            WithdrawalStatus::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        matches!(
            (self, next),
            (WithdrawalStatus::Pending, WithdrawalStatus::Completed)
                | (WithdrawalStatus::Pending, WithdrawalStatus::Failed)
        )
    }

    /// A deposit may have any number of failed withdrawals but at most one
    /// active (pending or completed) one.
    pub fn is_active(self) -> bool {
        !matches!(self, WithdrawalStatus::Failed)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(WithdrawalStatus::Pending),
            "COMPLETED" => Ok(WithdrawalStatus::Completed),
            "FAILED" => Ok(WithdrawalStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("fee rate of {0} bps exceeds {BPS_DENOMINATOR}")]
    RateTooHigh(u32),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),
}

/// Gross amount split into protocol fee and the net amount put to work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub gross: i64,
    pub fee: i64,
    pub net: i64,
}

/// Fixed basis-point fee, computed with integer arithmetic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    bps: u32,
}

impl FeeSchedule {
    pub fn new(bps: u32) -> Result<Self, FeeError> {
        if bps > BPS_DENOMINATOR {
            return Err(FeeError::RateTooHigh(bps));
        }
        Ok(Self { bps })
    }

    pub fn bps(&self) -> u32 {
        self.bps
    }

    /// `fee = gross * bps / 10_000` (floored), `net = gross - fee`.
    pub fn split(&self, gross: i64) -> Result<FeeSplit, FeeError> {
        if gross <= 0 {
            return Err(FeeError::NonPositiveAmount(gross));
        }
        // fee <= gross, so narrowing back cannot overflow
        let fee = (i128::from(gross) * i128::from(self.bps) / i128::from(BPS_DENOMINATOR)) as i64;
        Ok(FeeSplit {
            gross,
            fee,
            net: gross - fee,
        })
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            bps: DEFAULT_FEE_BPS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// RPC or network trouble; retried on the next tick.
    Transient,
    /// The chain rejected or reverted the action.
    Permanent,
    /// Missing record or unexpected status.
    Integrity,
    /// The local store could not be read or written.
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The record moved to its next status.
    Advanced,
    /// Nothing to do yet, e.g. a destination transaction still pending.
    Unchanged,
    /// A previous attempt left a chain action with no local record of its
    /// outcome. The item is skipped until reconciled.
    NeedsReconciliation(String),
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub id: Uuid,
    pub outcome: ItemOutcome,
}

/// Result of one scheduler tick, one entry per item touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub items: Vec<ItemReport>,
}

impl TickReport {
    pub fn record(&mut self, id: Uuid, outcome: ItemOutcome) {
        self.items.push(ItemReport { id, outcome });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn advanced(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Advanced))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Unchanged))
    }

    pub fn needs_reconciliation(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::NeedsReconciliation(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, id: Uuid) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|item| item.id == id)
            .map(|item| &item.outcome)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_split_at_default_rate() {
        let split = FeeSchedule::default().split(1_000_000).unwrap();
        assert_eq!(split.fee, 2_000);
        assert_eq!(split.net, 998_000);
        assert_eq!(split.fee + split.net, split.gross);
    }

    #[test]
    fn fee_split_never_loses_units_to_rounding() {
        let fees = FeeSchedule::new(20).unwrap();
        for gross in [1, 49, 499, 501, 12_345, 9_999_999, i64::MAX] {
            let split = fees.split(gross).unwrap();
            assert_eq!(split.fee + split.net, gross, "gross {gross}");
        }
        // below one fee unit everything goes to net
        assert_eq!(fees.split(499).unwrap().fee, 0);
        assert_eq!(fees.split(500).unwrap().fee, 1);
    }

    #[test]
    fn fee_schedule_rejects_bad_input() {
        assert_eq!(FeeSchedule::new(10_001), Err(FeeError::RateTooHigh(10_001)));
        assert_eq!(
            FeeSchedule::default().split(0),
            Err(FeeError::NonPositiveAmount(0))
        );
        assert_eq!(
            FeeSchedule::default().split(-5),
            Err(FeeError::NonPositiveAmount(-5))
        );
    }

    #[test]
    fn deposit_transitions_follow_the_state_machine() {
        use DepositStatus::*;
        assert!(Received.can_transition_to(Stacked));
        assert!(Stacked.can_transition_to(WithdrawRequested));
        assert!(WithdrawRequested.can_transition_to(Withdrawn));
        assert!(WithdrawRequested.can_transition_to(Failed));

        assert!(!Received.can_transition_to(WithdrawRequested));
        assert!(!Stacked.can_transition_to(Received));
        assert!(!Withdrawn.can_transition_to(WithdrawRequested));
        assert!(!Failed.can_transition_to(Stacked));
        assert!(!Stacked.can_transition_to(Stacked));
    }

    #[test]
    fn withdrawal_only_leaves_pending() {
        use WithdrawalStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(Completed.is_active());
        assert!(!Failed.is_active());
    }

    #[test]
    fn statuses_parse_from_their_column_text() {
        for status in [
            DepositStatus::Received,
            DepositStatus::Stacked,
            DepositStatus::WithdrawRequested,
            DepositStatus::Withdrawn,
            DepositStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DepositStatus>(), Ok(status));
        }
        assert!("stacked".parse::<DepositStatus>().is_err());
        assert_eq!(
            "PENDING".parse::<WithdrawalStatus>(),
            Ok(WithdrawalStatus::Pending)
        );
    }

    #[test]
    fn tick_report_counts_outcomes() {
        let mut report = TickReport::default();
        let a = Uuid::new_v4();
        report.record(a, ItemOutcome::Advanced);
        report.record(Uuid::new_v4(), ItemOutcome::Unchanged);
        report.record(
            Uuid::new_v4(),
            ItemOutcome::Failed {
                kind: FailureKind::Transient,
                message: "rpc down".into(),
            },
        );
        assert_eq!(report.advanced(), 1);
        assert_eq!(report.unchanged(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcome_of(a), Some(&ItemOutcome::Advanced));
    }
}
