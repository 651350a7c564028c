//! In-memory outbox.

/// Ordered queue of unconfirmed commands.
pub mod outbox;
