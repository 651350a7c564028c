//! Shared primitive identifiers and small enums.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity identifier issued by the remote service, or a temporary local one.
pub type Handle = String;
/// Monotonic outbox sequence number.
pub type CommandSeq = u64;
/// Identifier of a registered live projection.
pub type ViewId = u64;
/// Milliseconds since the Unix epoch.
pub type UnixMs = u64;

/// Prefix carried by every client-assigned handle.
pub const TEMP_HANDLE_PREFIX: &str = "local-";

/// Generates a fresh temporary handle for an entity created offline.
pub fn temp_handle() -> Handle {
    format!("{TEMP_HANDLE_PREFIX}{}", Uuid::new_v4())
}

/// True when `handle` was assigned locally and has not been resolved yet.
pub fn is_temporary(handle: &str) -> bool {
    handle.starts_with(TEMP_HANDLE_PREFIX)
}

/// Entity family a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Top-level post.
    Topic,
    /// Comment on a topic.
    Comment,
    /// Reply to a comment.
    Reply,
}

/// Mutation performed by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Entity is created.
    Create,
    /// Entity content is edited.
    Update,
    /// Entity is deleted.
    Remove,
    /// Current user likes the entity.
    Like,
    /// Current user withdraws a like.
    Unlike,
    /// Current user pins a topic.
    Pin,
    /// Current user unpins a topic.
    Unpin,
    /// Topic is hidden from the user's feeds.
    Hide,
    /// Hidden topic is shown again.
    Unhide,
}

/// Lifecycle state of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// Waiting for upload.
    Pending,
    /// Currently submitted to the remote service.
    Sending,
    /// Last submission failed transiently.
    ///
    /// The command is still queued at its position and is picked up by the
    /// next upload exactly like `Pending`; only the attempt count differs.
    Failed,
}

impl CommandStatus {
    /// Stable name used in the SQLite `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Failed => "failed",
        }
    }
}

/// Wall-clock time in milliseconds.
pub fn now_ms() -> UnixMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
