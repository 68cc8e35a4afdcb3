//! Fitting-session credit bookkeeping.
//!
//! A retailer holds two pools of sessions:
//!
//! - **included** sessions come with the plan and reset every billing period
//! - **bundle** sessions are bought one-off and carry over indefinitely
//!
//! Spending always drains the included pool first. Every mutation returns a
//! [`CreditChange`] so the caller can append it to the ledger in the same
//! transaction that persists the new state.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::billing::Plan;
use crate::types::SubscriptionStatus;

/// Errors raised when a session cannot be paid for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditError {
    /// Both pools are empty.
    #[error("no fitting sessions remaining")]
    Exhausted,

    /// Included sessions exist but the subscription does not allow spending them.
    #[error("subscription is {0:?}; only bundle sessions can be used")]
    SubscriptionInactive(SubscriptionStatus),
}

/// Which pool a session was paid from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "atelier.credit_source", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Included,
    Bundle,
}

/// Remaining sessions in each pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditBalance {
    pub included_remaining: u32,
    pub bundle_remaining: u32,
}

impl CreditBalance {
    /// Create a balance.
    #[must_use]
    pub const fn new(included_remaining: u32, bundle_remaining: u32) -> Self {
        Self {
            included_remaining,
            bundle_remaining,
        }
    }

    /// Total spendable sessions, ignoring subscription status.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.included_remaining
            .saturating_add(self.bundle_remaining)
    }

    /// Spend one session, included pool first.
    ///
    /// # Errors
    ///
    /// Returns [`CreditError::Exhausted`] when both pools are empty.
    pub const fn consume(&mut self) -> Result<CreditSource, CreditError> {
        if self.included_remaining > 0 {
            self.included_remaining -= 1;
            Ok(CreditSource::Included)
        } else if self.bundle_remaining > 0 {
            self.bundle_remaining -= 1;
            Ok(CreditSource::Bundle)
        } else {
            Err(CreditError::Exhausted)
        }
    }

    /// Spend one bundle session only.
    const fn consume_bundle(&mut self) -> Option<CreditSource> {
        if self.bundle_remaining > 0 {
            self.bundle_remaining -= 1;
            Some(CreditSource::Bundle)
        } else {
            None
        }
    }

    /// Return one session to the pool it was taken from.
    pub const fn refund(&mut self, source: CreditSource) {
        match source {
            CreditSource::Included => {
                self.included_remaining = self.included_remaining.saturating_add(1);
            }
            CreditSource::Bundle => {
                self.bundle_remaining = self.bundle_remaining.saturating_add(1);
            }
        }
    }

    /// Add bundle sessions.
    pub const fn add_bundle(&mut self, sessions: u32) {
        self.bundle_remaining = self.bundle_remaining.saturating_add(sessions);
    }
}

/// A billing period `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// Create a period from explicit bounds.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// A one-month period starting at `start`.
    ///
    /// Month arithmetic clamps to the last day of shorter months
    /// (Jan 31 → Feb 28/29).
    #[must_use]
    pub fn monthly_from(start: DateTime<Utc>) -> Self {
        let end = start
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| start + Duration::days(30));
        Self { start, end }
    }

    /// Whether `now` falls inside the period.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// The period that follows this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self::monthly_from(self.end)
    }
}

/// Why a balance changed. Persisted as the ledger `reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Consumed,
    Refunded,
    PeriodRollover,
    Upgrade,
    Downgrade,
    PlanUnchanged,
    StaleUpdate,
    NotActivated,
    Canceled,
    BundlePurchase,
    Grant,
}

impl ChangeReason {
    /// Ledger representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Consumed => "consumed",
            Self::Refunded => "refunded",
            Self::PeriodRollover => "period_rollover",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::PlanUnchanged => "plan_unchanged",
            Self::StaleUpdate => "stale_update",
            Self::NotActivated => "not_activated",
            Self::Canceled => "canceled",
            Self::BundlePurchase => "bundle_purchase",
            Self::Grant => "grant",
        }
    }
}

/// A signed change to both pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditChange {
    pub reason: ChangeReason,
    pub included_delta: i64,
    pub bundle_delta: i64,
}

impl CreditChange {
    const fn between(reason: ChangeReason, before: CreditBalance, after: CreditBalance) -> Self {
        Self {
            reason,
            included_delta: after.included_remaining as i64 - before.included_remaining as i64,
            bundle_delta: after.bundle_remaining as i64 - before.bundle_remaining as i64,
        }
    }

    /// Whether neither pool moved.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.included_delta == 0 && self.bundle_delta == 0
    }
}

/// Snapshot of a provider subscription, already mapped to domain values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub cancel_at_period_end: bool,
}

/// A retailer's plan, status, current period, and balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub balance: CreditBalance,
    pub cancel_at_period_end: bool,
}

impl SubscriptionState {
    /// State for a retailer who just signed up.
    #[must_use]
    pub fn free(now: DateTime<Utc>) -> Self {
        Self {
            plan: Plan::Free,
            status: SubscriptionStatus::Active,
            period: BillingPeriod::monthly_from(now),
            balance: CreditBalance::new(Plan::Free.included_sessions(), 0),
            cancel_at_period_end: false,
        }
    }

    /// Whether included sessions may be spent right now.
    ///
    /// The free tier has no provider subscription, so it is always usable.
    #[must_use]
    pub const fn included_usable(&self) -> bool {
        matches!(self.plan, Plan::Free) || self.status.grants_included_sessions()
    }

    /// Sessions that can actually be spent right now.
    #[must_use]
    pub const fn spendable(&self) -> u32 {
        if self.included_usable() {
            self.balance.total()
        } else {
            self.balance.bundle_remaining
        }
    }

    /// Advance a lapsed free-tier period.
    ///
    /// Paid plans are advanced by provider events instead; this is a no-op
    /// for them. Returns the change when the period moved.
    pub fn roll_free_period(&mut self, now: DateTime<Utc>) -> Option<CreditChange> {
        if self.plan != Plan::Free || now < self.period.end {
            return None;
        }

        let before = self.balance;
        while now >= self.period.end {
            self.period = self.period.next();
        }
        self.status = SubscriptionStatus::Active;
        self.balance.included_remaining = Plan::Free.included_sessions();
        Some(CreditChange::between(
            ChangeReason::PeriodRollover,
            before,
            self.balance,
        ))
    }

    /// Spend one session.
    ///
    /// Rolls a lapsed free period first, then spends included sessions if
    /// the subscription allows it, otherwise bundle sessions.
    ///
    /// # Errors
    ///
    /// Returns [`CreditError::SubscriptionInactive`] when only blocked
    /// included sessions remain, [`CreditError::Exhausted`] when nothing remains.
    pub fn consume(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<(CreditSource, Vec<CreditChange>), CreditError> {
        let mut changes = Vec::with_capacity(2);
        if let Some(rollover) = self.roll_free_period(now) {
            changes.push(rollover);
        }

        let before = self.balance;
        let source = if self.included_usable() {
            self.balance.consume()?
        } else {
            self.balance.consume_bundle().ok_or_else(|| {
                if self.balance.included_remaining > 0 {
                    CreditError::SubscriptionInactive(self.status)
                } else {
                    CreditError::Exhausted
                }
            })?
        };

        changes.push(CreditChange::between(
            ChangeReason::Consumed,
            before,
            self.balance,
        ));
        Ok((source, changes))
    }

    /// Give back a session whose fitting never produced a result.
    pub const fn refund(&mut self, source: CreditSource) -> CreditChange {
        let before = self.balance;
        self.balance.refund(source);
        CreditChange::between(ChangeReason::Refunded, before, self.balance)
    }

    /// Credit a purchased (or operator-granted) bundle.
    pub const fn add_bundle(&mut self, sessions: u32, reason: ChangeReason) -> CreditChange {
        let before = self.balance;
        self.balance.add_bundle(sessions);
        CreditChange::between(reason, before, self.balance)
    }

    /// Whether a snapshot describes a period older than the stored one.
    ///
    /// Paid plans compare period starts. Right after a cancellation the
    /// free period starts at the cancel time, so any snapshot of the deleted
    /// subscription started earlier. A free period reached by signup or by
    /// lazy rollover only rejects snapshots whose period already ended.
    #[must_use]
    pub fn is_stale(&self, update: &SubscriptionUpdate) -> bool {
        if self.plan == Plan::Free && self.status != SubscriptionStatus::Canceled {
            return update.period.end <= self.period.start;
        }
        update.period.start < self.period.start
    }

    /// Apply a provider subscription snapshot.
    ///
    /// - Earlier period: the snapshot is stale and ignored.
    /// - Coming from the free tier with a status that grants nothing
    ///   (`incomplete`, `unpaid`, ...): ignored until the provider activates it.
    /// - Coming from the free tier, or a later period start: the period
    ///   rolled over and included sessions reset to the plan allowance.
    /// - Same period, higher plan: the allowance difference is added.
    /// - Same period, lower plan: included sessions are capped.
    ///
    /// Bundle sessions are never touched.
    pub fn reconcile(&mut self, update: &SubscriptionUpdate) -> CreditChange {
        let before = self.balance;
        let from_free = self.plan == Plan::Free;

        if self.is_stale(update) {
            return CreditChange::between(ChangeReason::StaleUpdate, before, before);
        }
        if from_free && !update.status.grants_included_sessions() {
            return CreditChange::between(ChangeReason::NotActivated, before, before);
        }

        let reason = if from_free || update.period.start > self.period.start {
            self.balance.included_remaining = update.plan.included_sessions();
            ChangeReason::PeriodRollover
        } else if update.plan.is_upgrade_from(self.plan) {
            let extra = update
                .plan
                .included_sessions()
                .saturating_sub(self.plan.included_sessions());
            self.balance.included_remaining = self.balance.included_remaining.saturating_add(extra);
            ChangeReason::Upgrade
        } else if self.plan.is_upgrade_from(update.plan) {
            self.balance.included_remaining = self
                .balance
                .included_remaining
                .min(update.plan.included_sessions());
            ChangeReason::Downgrade
        } else {
            ChangeReason::PlanUnchanged
        };

        self.plan = update.plan;
        self.status = update.status;
        self.period = update.period;
        self.cancel_at_period_end = update.cancel_at_period_end;

        CreditChange::between(reason, before, self.balance)
    }

    /// The provider subscription was deleted: fall back to the free tier.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CreditChange {
        let before = self.balance;
        self.plan = Plan::Free;
        self.status = SubscriptionStatus::Canceled;
        self.period = BillingPeriod::monthly_from(now);
        self.cancel_at_period_end = false;
        self.balance.included_remaining = self
            .balance
            .included_remaining
            .min(Plan::Free.included_sessions());
        CreditChange::between(ChangeReason::Canceled, before, self.balance)
    }
}
