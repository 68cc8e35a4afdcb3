//! Atelier server library.
//!
//! This crate provides the HTTP API as a library, allowing it to be tested
//! and reused by the CLI.
//!
//! # Security
//!
//! This crate holds HIGH PRIVILEGE credentials:
//! - Supabase service-role key (storage, bypasses row-level security)
//! - Stripe secret key (customers, checkout, billing portal)
//! - Workflow engine shared secret
//!
//! Browsers only ever see short-lived signed storage URLs and hosted
//! checkout pages.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod stripe;
pub mod supabase;
pub mod workflow;
