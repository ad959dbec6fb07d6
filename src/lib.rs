//! Single-node proof-of-work ledger backing the donation demo.
//!
//! [`blockchain`] holds the ledger core. [`api`] and [`config`] are the
//! service around it: HTTP routes, persistence wiring and settings.

pub mod api;
pub mod blockchain;
pub mod config;
