//! Single-writer cache actor, its event stream, and the upload daemon.

/// Event stream types emitted by the cache actor.
pub mod events;
/// Cache actor and its cloneable handle.
pub mod handle;
/// Network-driven outbox uploader.
pub mod uploader;
