//! Local replica client for livedoor Reader style feed services.
//!
//! The remote service owns subscriptions and items; this crate mirrors them
//! into SQLite ([`storage`]), keeps them fresh ([`sync`]), tracks what the
//! user has read ([`browse`]) and replays pins back to the server.

pub mod api;
pub mod browse;
pub mod config;
pub mod storage;
pub mod sync;
pub mod util;
