//! Subscription state and session balances.
//!
//! Every balance mutation runs in a transaction that locks the retailer's
//! row with `SELECT ... FOR UPDATE`, applies the pure transition from
//! `atelier_core::credits`, writes the new state, and appends one ledger row
//! per non-empty change.

use atelier_core::{
    BillingPeriod, ChangeReason, CreditBalance, CreditChange, CreditError, CreditSource, Plan,
    RetailerId, SubscriptionState, SubscriptionStatus, SubscriptionUpdate,
};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;

use super::stripe_events::{self, EventReceipt};
use super::{RepositoryError, fittings};
use crate::models::{FittingSession, NewFitting, Subscription};

/// Why a fitting could not be paid for.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The retailer has nothing left to spend.
    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for ConsumeError {
    fn from(e: sqlx::Error) -> Self {
        Self::Repository(e.into())
    }
}

/// What a provider event did to a retailer's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    /// The event was applied; the change may be empty.
    Changed(CreditChange),
    /// The event concerns a provider subscription the retailer does not track.
    Untracked,
    /// The event id was recorded before.
    Duplicate,
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    retailer_id: RetailerId,
    plan: Plan,
    status: SubscriptionStatus,
    stripe_subscription_id: Option<String>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    included_remaining: i32,
    bundle_remaining: i32,
    cancel_at_period_end: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = RepositoryError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let included = u32::try_from(row.included_remaining).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "negative included balance: {}",
                row.included_remaining
            ))
        })?;
        let bundle = u32::try_from(row.bundle_remaining).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "negative bundle balance: {}",
                row.bundle_remaining
            ))
        })?;

        Ok(Self {
            retailer_id: row.retailer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            state: SubscriptionState {
                plan: row.plan,
                status: row.status,
                period: BillingPeriod::new(row.period_start, row.period_end),
                balance: CreditBalance::new(included, bundle),
                cancel_at_period_end: row.cancel_at_period_end,
            },
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "retailer_id, plan, status, stripe_subscription_id, period_start, period_end, \
     included_remaining, bundle_remaining, cancel_at_period_end, updated_at";

fn column_value(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("balance out of range: {value}")))
}

/// Insert the free-tier row for a new retailer, inside the caller's transaction.
pub(crate) async fn insert_free(
    conn: &mut PgConnection,
    retailer_id: RetailerId,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let state = SubscriptionState::free(now);

    sqlx::query(
        "INSERT INTO atelier.subscriptions
             (retailer_id, plan, status, period_start, period_end,
              included_remaining, bundle_remaining, cancel_at_period_end)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(retailer_id)
    .bind(state.plan)
    .bind(state.status)
    .bind(state.period.start)
    .bind(state.period.end)
    .bind(column_value(state.balance.included_remaining)?)
    .bind(column_value(state.balance.bundle_remaining)?)
    .bind(state.cancel_at_period_end)
    .execute(&mut *conn)
    .await?;

    let opening = CreditChange {
        reason: ChangeReason::PeriodRollover,
        included_delta: i64::from(state.balance.included_remaining),
        bundle_delta: 0,
    };
    append_ledger(conn, retailer_id, &opening, Some("signup")).await
}

async fn lock(
    conn: &mut PgConnection,
    retailer_id: RetailerId,
) -> Result<Subscription, RepositoryError> {
    let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM atelier.subscriptions WHERE retailer_id = $1 FOR UPDATE"
    ))
    .bind(retailer_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or(RepositoryError::NotFound)?.try_into()
}

async fn save(conn: &mut PgConnection, record: &Subscription) -> Result<(), RepositoryError> {
    let state = &record.state;
    sqlx::query(
        "UPDATE atelier.subscriptions SET
             plan = $2, status = $3, stripe_subscription_id = $4,
             period_start = $5, period_end = $6,
             included_remaining = $7, bundle_remaining = $8,
             cancel_at_period_end = $9, updated_at = now()
         WHERE retailer_id = $1",
    )
    .bind(record.retailer_id)
    .bind(state.plan)
    .bind(state.status)
    .bind(record.stripe_subscription_id.as_deref())
    .bind(state.period.start)
    .bind(state.period.end)
    .bind(column_value(state.balance.included_remaining)?)
    .bind(column_value(state.balance.bundle_remaining)?)
    .bind(state.cancel_at_period_end)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn append_ledger(
    conn: &mut PgConnection,
    retailer_id: RetailerId,
    change: &CreditChange,
    reference: Option<&str>,
) -> Result<(), RepositoryError> {
    if change.is_empty() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO atelier.credit_ledger
             (retailer_id, included_delta, bundle_delta, reason, reference)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(retailer_id)
    .bind(change.included_delta)
    .bind(change.bundle_delta)
    .bind(change.reason.as_str())
    .bind(reference)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Repository for subscriptions and the credit ledger.
pub struct SubscriptionRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SubscriptionRepository<'a> {
    /// Create a new subscription repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create the free-tier row for an existing retailer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the retailer already has one.
    pub async fn create_free(
        &self,
        retailer_id: RetailerId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_free(&mut tx, retailer_id, now)
            .await
            .map_err(|e| match e {
                RepositoryError::Database(db) => super::conflict_on_unique(db, "subscription"),
                other => other,
            })?;
        tx.commit().await?;
        Ok(())
    }

    /// Current subscription, with a lapsed free period rolled forward.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(
        &self,
        retailer_id: RetailerId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM atelier.subscriptions WHERE retailer_id = $1"
        ))
        .bind(retailer_id)
        .fetch_optional(self.pool)
        .await?;

        let Some(record) = row.map(Subscription::try_from).transpose()? else {
            return Ok(None);
        };

        if record.state.plan != Plan::Free || now < record.state.period.end {
            return Ok(Some(record));
        }

        let (record, _) = self
            .mutate(retailer_id, None, |record| {
                record.state.roll_free_period(now).into_iter().collect()
            })
            .await?;
        Ok(Some(record))
    }

    /// Pay for a fitting and create its session row in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConsumeError::Credit` when nothing is spendable,
    /// `ConsumeError::Repository` on database failure or a missing row.
    pub async fn consume_credit(
        &self,
        fitting: &NewFitting,
        now: DateTime<Utc>,
    ) -> Result<FittingSession, ConsumeError> {
        let mut tx = self.pool.begin().await?;
        let mut record = lock(&mut tx, fitting.retailer_id).await?;

        let (source, changes) = record.state.consume(now)?;
        save(&mut tx, &record).await?;

        let reference = fitting.id.to_string();
        for change in &changes {
            append_ledger(&mut tx, fitting.retailer_id, change, Some(&reference)).await?;
        }

        let session = fittings::insert(&mut tx, fitting, source).await?;
        tx.commit().await?;

        tracing::info!(
            retailer_id = %fitting.retailer_id,
            fitting_id = %fitting.id,
            source = ?source,
            "Fitting credit consumed"
        );
        Ok(session)
    }

    /// Give back the session paid for a fitting that produced no result.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the retailer has no subscription.
    pub async fn refund_credit(
        &self,
        retailer_id: RetailerId,
        source: CreditSource,
        reference: &str,
    ) -> Result<CreditChange, RepositoryError> {
        let (_, changes) = self
            .mutate(retailer_id, Some(reference), |record| {
                vec![record.state.refund(source)]
            })
            .await?;
        Ok(first(changes, ChangeReason::Refunded))
    }

    /// Apply a provider subscription snapshot delivered by `receipt`.
    ///
    /// Snapshots of a provider subscription other than the tracked one are
    /// recorded and skipped, unless the tracked one no longer grants
    /// sessions.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the retailer has no subscription.
    pub async fn apply_update(
        &self,
        retailer_id: RetailerId,
        stripe_subscription_id: &str,
        update: &SubscriptionUpdate,
        receipt: EventReceipt<'_>,
    ) -> Result<EventEffect, RepositoryError> {
        self.apply_event(retailer_id, receipt, |record| {
            if !record.accepts_snapshot(stripe_subscription_id, update.status) {
                return None;
            }
            let change = record.state.reconcile(update);
            if change.reason != ChangeReason::StaleUpdate {
                record.stripe_subscription_id = Some(stripe_subscription_id.to_string());
            }
            Some(change)
        })
        .await
    }

    /// The tracked provider subscription is gone; fall back to the free tier.
    ///
    /// Deleting any other provider subscription changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the retailer has no subscription.
    pub async fn cancel(
        &self,
        retailer_id: RetailerId,
        stripe_subscription_id: &str,
        now: DateTime<Utc>,
        receipt: EventReceipt<'_>,
    ) -> Result<EventEffect, RepositoryError> {
        self.apply_event(retailer_id, receipt, |record| {
            if !record.tracks(stripe_subscription_id) {
                return None;
            }
            record.stripe_subscription_id = None;
            Some(record.state.cancel(now))
        })
        .await
    }

    /// Credit a purchased bundle delivered by `receipt`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the retailer has no subscription.
    pub async fn credit_purchase(
        &self,
        retailer_id: RetailerId,
        sessions: u32,
        receipt: EventReceipt<'_>,
    ) -> Result<EventEffect, RepositoryError> {
        self.apply_event(retailer_id, receipt, |record| {
            Some(record.state.add_bundle(sessions, ChangeReason::BundlePurchase))
        })
        .await
    }

    /// Credit bundle sessions (purchase or operator grant).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the retailer has no subscription.
    pub async fn add_bundle(
        &self,
        retailer_id: RetailerId,
        sessions: u32,
        reason: ChangeReason,
        reference: &str,
    ) -> Result<CreditChange, RepositoryError> {
        let (_, changes) = self
            .mutate(retailer_id, Some(reference), |record| {
                vec![record.state.add_bundle(sessions, reason)]
            })
            .await?;
        Ok(first(changes, reason))
    }

    /// Overwrite the status of the tracked provider subscription without
    /// touching balances. Returns `false` when `stripe_subscription_id` is not
    /// the tracked one.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn set_status(
        &self,
        retailer_id: RetailerId,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE atelier.subscriptions SET status = $3, updated_at = now()
             WHERE retailer_id = $1 AND stripe_subscription_id = $2",
        )
        .bind(retailer_id)
        .bind(stripe_subscription_id)
        .bind(status)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Lock the row, record the event, then apply it in the same transaction.
    ///
    /// `apply` returns `None` when the event does not concern this record; the
    /// event id is still recorded so redeliveries are skipped.
    async fn apply_event<F>(
        &self,
        retailer_id: RetailerId,
        receipt: EventReceipt<'_>,
        apply: F,
    ) -> Result<EventEffect, RepositoryError>
    where
        F: FnOnce(&mut Subscription) -> Option<CreditChange>,
    {
        let mut tx = self.pool.begin().await?;
        let mut record = lock(&mut tx, retailer_id).await?;

        if !stripe_events::record(&mut *tx, receipt).await? {
            return Ok(EventEffect::Duplicate);
        }

        let Some(change) = apply(&mut record) else {
            tx.commit().await?;
            return Ok(EventEffect::Untracked);
        };

        save(&mut tx, &record).await?;
        append_ledger(&mut tx, retailer_id, &change, Some(receipt.id)).await?;
        tx.commit().await?;
        Ok(EventEffect::Changed(change))
    }

    /// Lock the row, run `apply`, persist, and append its changes to the ledger.
    async fn mutate<F>(
        &self,
        retailer_id: RetailerId,
        reference: Option<&str>,
        apply: F,
    ) -> Result<(Subscription, Vec<CreditChange>), RepositoryError>
    where
        F: FnOnce(&mut Subscription) -> Vec<CreditChange>,
    {
        let mut tx = self.pool.begin().await?;
        let mut record = lock(&mut tx, retailer_id).await?;

        let changes = apply(&mut record);
        save(&mut tx, &record).await?;
        for change in &changes {
            append_ledger(&mut tx, retailer_id, change, reference).await?;
        }

        tx.commit().await?;
        Ok((record, changes))
    }
}

fn first(changes: Vec<CreditChange>, reason: ChangeReason) -> CreditChange {
    changes.into_iter().next().unwrap_or(CreditChange {
        reason,
        included_delta: 0,
        bundle_delta: 0,
    })
}
