//! Atelier Core - Domain types and credit bookkeeping.
//!
//! This crate provides the types shared by every Atelier component:
//! - `server` - The HTTP API for consumers, retailers, and webhooks
//! - `cli` - Command-line tools for migrations and operator tasks
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! database access, no HTTP clients. Everything that decides how many
//! fitting sessions a retailer may still run lives here so it can be
//! tested without the payment provider or the database.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, prices, slugs, and statuses
//! - [`billing`] - Plan and bundle catalog, provider price mapping
//! - [`credits`] - Included/bundle session balances and period rollover

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod billing;
pub mod credits;
pub mod types;

pub use billing::{Bundle, Plan, PriceCatalog, PriceTarget};
pub use credits::{
    BillingPeriod, ChangeReason, CreditBalance, CreditChange, CreditError, CreditSource, SubscriptionState,
    SubscriptionUpdate,
};
pub use types::*;
