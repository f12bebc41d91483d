//! Server-side live updates.
//!
//! A database trigger calls `pg_notify` on every consumption write. The
//! [`NotificationBridge`] listens on that channel through a
//! [`ChangeListener`], turns each notification into a
//! [`ChangeEvent`](acueducto_core::ChangeEvent) and fans it out to every
//! client attached to the SSE feed.

pub mod bridge;
pub mod feed;
pub mod postgres;

pub use bridge::{ChangeListener, ListenerError, NotificationBridge, RawEvent, RawEventStream};
pub use feed::{router, AppState};
pub use postgres::{install_notify_trigger, PgChangeListener};

/// Channel the consumption trigger notifies on.
pub const DEFAULT_CHANNEL: &str = "consumo_channel";
