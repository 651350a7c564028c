pub mod memory;
pub mod sqlite;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    command::{StoredCommand, StoredCommandEnvelope, COMMAND_FORMAT_VERSION},
    core::outbox::Outbox,
    types::CommandSeq,
};

/// Storage failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encoding or decoding failed.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// A stored row cannot be turned back into a command.
    #[error("corrupt outbox row {seq}: {reason}")]
    Corrupt {
        /// Sequence of the row.
        seq: CommandSeq,
        /// What was wrong with it.
        reason: String,
    },
    /// Any other storage failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for storage calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable storage for outbox rows.
///
/// A row reported saved must survive process termination.
pub trait CommandStore: Send {
    /// Inserts a new row.
    fn save(&mut self, stored: &StoredCommand) -> PersistResult<()>;
    /// Every row in sequence order; undecodable rows are returned as
    /// [`PersistError::Corrupt`] so the caller can drop them individually.
    fn load_all(&mut self) -> PersistResult<Vec<PersistResult<StoredCommand>>>;
    /// Removes a row; deleting a missing row is not an error.
    fn delete(&mut self, seq: CommandSeq) -> PersistResult<()>;
    /// Overwrites the status, attempts and payload of an existing row.
    fn update(&mut self, stored: &StoredCommand) -> PersistResult<()>;
}

/// Loads the outbox from `store`, deleting rows that cannot be decoded.
pub fn restore_outbox(store: &mut dyn CommandStore) -> PersistResult<Outbox> {
    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for row in store.load_all()? {
        match row {
            Ok(stored) => rows.push(stored),
            Err(PersistError::Corrupt { seq, reason }) => {
                warn!(seq, %reason, "dropping corrupt outbox row");
                store.delete(seq)?;
                dropped += 1;
            }
            Err(other) => return Err(other),
        }
    }
    let outbox = Outbox::from_stored(rows);
    info!(queued = outbox.len(), dropped, "outbox restored");
    Ok(outbox)
}

pub(crate) fn encode_payload(stored: &StoredCommand) -> PersistResult<Vec<u8>> {
    Ok(serde_json::to_vec(&StoredCommandEnvelope::new(stored.clone()))?)
}

pub(crate) fn decode_payload(seq: CommandSeq, payload: &[u8]) -> PersistResult<StoredCommand> {
    let envelope: StoredCommandEnvelope =
        serde_json::from_slice(payload).map_err(|e| PersistError::Corrupt {
            seq,
            reason: format!("payload decode failed: {e}"),
        })?;
    if envelope.format_version != COMMAND_FORMAT_VERSION {
        return Err(PersistError::Corrupt {
            seq,
            reason: format!("unsupported format version {}", envelope.format_version),
        });
    }
    if envelope.stored.seq != seq {
        return Err(PersistError::Corrupt {
            seq,
            reason: format!("payload carries sequence {}", envelope.stored.seq),
        });
    }
    Ok(envelope.stored)
}
