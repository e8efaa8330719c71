//! Lead Marketplace Backend Library
//!
//! Time-gated allocation engine for financing leads: participant sets,
//! lifecycle state machine, auto-expiry sweeper and the background scheduler
//! that drives it, plus the thin HTTP layer in front of them.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod lead;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod sweeper;
