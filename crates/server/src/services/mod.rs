//! Flows that span the database and more than one external service.
//!
//! Route handlers stay thin: they parse and authorize, then call in here.

pub mod billing;
pub mod fitting;
