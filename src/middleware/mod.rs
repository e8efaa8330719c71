//! Middleware for the lead marketplace API

mod request_log;

pub use request_log::request_tracing;
