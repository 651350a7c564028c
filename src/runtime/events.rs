//! Runtime event stream payloads.

use crate::{
    remote::CommandError,
    types::{CommandSeq, Handle, ViewId},
};

/// Events emitted from the single-writer cache actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A live view changed; pull it with `CacheHandle::view`.
    ProjectionChanged {
        /// Changed view.
        view: ViewId,
    },
    /// A command was durably queued.
    CommandQueued {
        /// Its sequence.
        seq: CommandSeq,
    },
    /// The service accepted a command and it left the outbox.
    CommandConfirmed {
        /// Its sequence.
        seq: CommandSeq,
    },
    /// A command was rolled back.
    CommandRejected {
        /// Its sequence.
        seq: CommandSeq,
        /// Why.
        error: CommandError,
    },
    /// A temporary handle was replaced by the server-issued one.
    HandleResolved {
        /// Client-assigned handle.
        temporary: Handle,
        /// Server-issued handle.
        server: Handle,
    },
}
