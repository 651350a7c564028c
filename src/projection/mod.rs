//! Optimistic projections over server state.

/// Command-to-projection effect table.
pub mod apply;
/// Live view registry, broadcast apply and server page merge.
pub mod engine;
/// Projection value types.
pub mod views;
