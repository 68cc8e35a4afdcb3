//! Rows the API reads and returns.

pub mod account;
pub mod fitting;
pub mod shop;
pub mod subscription;

pub use account::{Consumer, Retailer};
pub use fitting::{FittingSession, FittingStats, NewFitting};
pub use shop::Shop;
pub use subscription::Subscription;
