//! Status and role enums.

use serde::{Deserialize, Serialize};

/// Which side of the marketplace an account belongs to.
///
/// Stored in the auth platform's user metadata under `role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A shopper trying garments on.
    Consumer,
    /// A merchant owning shops and paying for sessions.
    Retailer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Consumer => write!(f, "consumer"),
            Self::Retailer => write!(f, "retailer"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumer" => Ok(Self::Consumer),
            "retailer" => Ok(Self::Retailer),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

/// Lifecycle of a virtual fitting session.
///
/// ```text
/// pending ──► processing ──► completed
///    │             │
///    └─────────────┴───────► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "atelier.fitting_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum FittingStatus {
    /// Credit consumed, workflow not yet triggered.
    #[default]
    Pending,
    /// Workflow accepted the job.
    Processing,
    /// Result image delivered.
    Completed,
    /// Workflow rejected the job or reported a failure.
    Failed,
}

impl FittingStatus {
    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a session in this state may move to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing | Self::Completed | Self::Failed)
            | (Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for FittingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for FittingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid fitting status: {s}")),
        }
    }
}

/// Subscription status as reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "atelier.subscription_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    /// Whether included (plan) sessions may be spent in this status.
    ///
    /// `past_due` keeps access while the provider retries the payment.
    #[must_use]
    pub const fn grants_included_sessions(self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::PastDue)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "unpaid" => Ok(Self::Unpaid),
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("invalid subscription status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        assert_eq!("retailer".parse::<Role>().unwrap(), Role::Retailer);
        assert_eq!(Role::Consumer.to_string(), "consumer");
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_fitting_transitions() {
        use FittingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(Completed.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn test_subscription_status_grants() {
        assert!(SubscriptionStatus::Active.grants_included_sessions());
        assert!(SubscriptionStatus::PastDue.grants_included_sessions());
        assert!(!SubscriptionStatus::Canceled.grants_included_sessions());
        assert!(!SubscriptionStatus::Unpaid.grants_included_sessions());
    }

    #[test]
    fn test_subscription_status_parse() {
        assert_eq!(
            "incomplete_expired".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::IncompleteExpired
        );
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
    }
}
