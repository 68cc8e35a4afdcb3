//! Plan and bundle catalog.
//!
//! Plans are recurring subscriptions that include a number of fitting
//! sessions per billing period. Bundles are one-off purchases of extra
//! sessions that never expire. The payment provider only knows opaque
//! price ids; [`PriceCatalog`] maps them back to domain values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{CurrencyCode, Price};

/// Subscription plan tiers, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "atelier.plan", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Growth,
    Scale,
}

impl Plan {
    /// All plans in ascending rank.
    pub const ALL: [Self; 4] = [Self::Free, Self::Starter, Self::Growth, Self::Scale];

    /// Ordering used for upgrade/downgrade detection.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Starter => 1,
            Self::Growth => 2,
            Self::Scale => 3,
        }
    }

    /// Fitting sessions included per billing period.
    #[must_use]
    pub const fn included_sessions(self) -> u32 {
        match self {
            Self::Free => 5,
            Self::Starter => 100,
            Self::Growth => 500,
            Self::Scale => 2000,
        }
    }

    /// Maximum number of shops a retailer on this plan may own.
    #[must_use]
    pub const fn max_shops(self) -> u32 {
        match self {
            Self::Free | Self::Starter => 1,
            Self::Growth => 3,
            Self::Scale => 10,
        }
    }

    /// Monthly list price in cents.
    #[must_use]
    pub const fn monthly_price_cents(self) -> i64 {
        match self {
            Self::Free => 0,
            Self::Starter => 2900,
            Self::Growth => 9900,
            Self::Scale => 29900,
        }
    }

    /// Monthly list price.
    #[must_use]
    pub fn monthly_price(self) -> Price {
        Price::from_cents(self.monthly_price_cents(), CurrencyCode::USD)
    }

    /// Whether this plan can be bought through checkout.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Whether moving from `other` to `self` is an upgrade.
    #[must_use]
    pub const fn is_upgrade_from(self, other: Self) -> bool {
        self.rank() > other.rank()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Starter => write!(f, "starter"),
            Self::Growth => write!(f, "growth"),
            Self::Scale => write!(f, "scale"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "growth" => Ok(Self::Growth),
            "scale" => Ok(Self::Scale),
            _ => Err(format!("invalid plan: {s}")),
        }
    }
}

/// One-off session bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bundle {
    Small,
    Medium,
    Large,
}

impl Bundle {
    /// All bundles in ascending size.
    pub const ALL: [Self; 3] = [Self::Small, Self::Medium, Self::Large];

    /// Sessions granted by the bundle.
    #[must_use]
    pub const fn sessions(self) -> u32 {
        match self {
            Self::Small => 50,
            Self::Medium => 200,
            Self::Large => 1000,
        }
    }

    /// List price in cents.
    #[must_use]
    pub const fn price_cents(self) -> i64 {
        match self {
            Self::Small => 1900,
            Self::Medium => 5900,
            Self::Large => 24900,
        }
    }

    /// List price.
    #[must_use]
    pub fn price(self) -> Price {
        Price::from_cents(self.price_cents(), CurrencyCode::USD)
    }
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for Bundle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            _ => Err(format!("invalid bundle: {s}")),
        }
    }
}

/// What a provider price id buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTarget {
    Plan(Plan),
    Bundle(Bundle),
}

/// Bidirectional mapping between provider price ids and plans/bundles.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    plans: HashMap<Plan, String>,
    bundles: HashMap<Bundle, String>,
    by_price: HashMap<String, PriceTarget>,
}

impl PriceCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the provider price id for a paid plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan, price_id: impl Into<String>) -> Self {
        let price_id = price_id.into();
        self.by_price
            .insert(price_id.clone(), PriceTarget::Plan(plan));
        self.plans.insert(plan, price_id);
        self
    }

    /// Register the provider price id for a bundle.
    #[must_use]
    pub fn with_bundle(mut self, bundle: Bundle, price_id: impl Into<String>) -> Self {
        let price_id = price_id.into();
        self.by_price
            .insert(price_id.clone(), PriceTarget::Bundle(bundle));
        self.bundles.insert(bundle, price_id);
        self
    }

    /// Provider price id for a plan, if it is sold.
    #[must_use]
    pub fn plan_price(&self, plan: Plan) -> Option<&str> {
        self.plans.get(&plan).map(String::as_str)
    }

    /// Provider price id for a bundle, if it is sold.
    #[must_use]
    pub fn bundle_price(&self, bundle: Bundle) -> Option<&str> {
        self.bundles.get(&bundle).map(String::as_str)
    }

    /// Resolve a provider price id.
    #[must_use]
    pub fn lookup(&self, price_id: &str) -> Option<PriceTarget> {
        self.by_price.get(price_id).copied()
    }

    /// Resolve a provider price id that must be a plan.
    #[must_use]
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        match self.lookup(price_id)? {
            PriceTarget::Plan(plan) => Some(plan),
            PriceTarget::Bundle(_) => None,
        }
    }
}
