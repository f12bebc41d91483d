//! Offline-first metering sync client and live change feed.
//!
//! Field readings are captured into a local SQLite queue ([`db`]) and
//! pushed to the remote service when the network allows ([`sync`]). The
//! [`server`] module relays database change notifications to browsers.

pub mod config;
pub mod db;
pub mod server;
pub mod sync;
