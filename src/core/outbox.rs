use std::collections::VecDeque;

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    command::{OutgoingCommand, StoredCommand},
    types::{now_ms, CommandSeq, CommandStatus},
};

/// Errors raised by outbox transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboxError {
    /// No queued command has this sequence.
    #[error("command {0} is not queued")]
    NotFound(CommandSeq),
    /// The command's status does not allow the requested move.
    #[error("command {seq} cannot move from {from:?} to {to}")]
    InvalidTransition {
        /// Command sequence.
        seq: CommandSeq,
        /// Status at the time of the request.
        from: CommandStatus,
        /// Requested target.
        to: &'static str,
    },
}

/// Ordered queue of commands the remote service has not confirmed.
#[derive(Debug, Default)]
pub struct Outbox {
    entries: HashMap<CommandSeq, StoredCommand>,
    order: VecDeque<CommandSeq>,
    next_seq: CommandSeq,
}

impl Outbox {
    /// Empty outbox; the first command gets sequence 1.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    /// Rebuilds the queue from persisted rows.
    ///
    /// A row left `Sending` by a crash goes back to `Pending`; its upload was
    /// never confirmed.
    pub fn from_stored(rows: Vec<StoredCommand>) -> Self {
        let mut outbox = Self::new();
        let mut rows = rows;
        rows.sort_by_key(|r| r.seq);
        for mut row in rows {
            if row.status == CommandStatus::Sending {
                row.status = CommandStatus::Pending;
            }
            outbox.next_seq = outbox.next_seq.max(row.seq.saturating_add(1));
            outbox.order.push_back(row.seq);
            outbox.entries.insert(row.seq, row);
        }
        outbox
    }

    /// Appends `command` as `Pending` with the next sequence number.
    pub fn enqueue(&mut self, command: OutgoingCommand) -> StoredCommand {
        let seq = self.next_seq;
        self.next_seq += 1;
        let stored = StoredCommand {
            seq,
            ts_ms: now_ms(),
            status: CommandStatus::Pending,
            attempts: 0,
            command,
        };
        self.order.push_back(seq);
        self.entries.insert(seq, stored.clone());
        stored
    }

    /// Oldest queued command, unless it is already in flight.
    ///
    /// `Pending` and `Failed` heads are both eligible.
    pub fn peek_next(&self) -> Option<&StoredCommand> {
        let head = self.order.front().and_then(|seq| self.entries.get(seq))?;
        if head.status == CommandStatus::Sending {
            return None;
        }
        Some(head)
    }

    /// Marks a command as in flight. Fails if it already is.
    pub fn mark_sending(&mut self, seq: CommandSeq) -> Result<&StoredCommand, OutboxError> {
        let entry = self.entries.get_mut(&seq).ok_or(OutboxError::NotFound(seq))?;
        if entry.status == CommandStatus::Sending {
            return Err(OutboxError::InvalidTransition {
                seq,
                from: entry.status,
                to: "sending",
            });
        }
        entry.status = CommandStatus::Sending;
        Ok(entry)
    }

    /// Removes a confirmed command.
    pub fn mark_applied(&mut self, seq: CommandSeq) -> Result<StoredCommand, OutboxError> {
        let status = self.get(seq).ok_or(OutboxError::NotFound(seq))?.status;
        if status != CommandStatus::Sending {
            return Err(OutboxError::InvalidTransition {
                seq,
                from: status,
                to: "applied",
            });
        }
        self.remove(seq)
    }

    /// Records a transient failure; the command stays queued for retry.
    pub fn mark_failed(
        &mut self,
        seq: CommandSeq,
        retry_count: u32,
    ) -> Result<&StoredCommand, OutboxError> {
        let entry = self.entries.get_mut(&seq).ok_or(OutboxError::NotFound(seq))?;
        entry.status = CommandStatus::Failed;
        entry.attempts = retry_count;
        Ok(entry)
    }

    /// Returns an aborted in-flight command to `Pending`.
    pub fn release(&mut self, seq: CommandSeq) -> Result<&StoredCommand, OutboxError> {
        let entry = self.entries.get_mut(&seq).ok_or(OutboxError::NotFound(seq))?;
        if entry.status == CommandStatus::Sending {
            entry.status = CommandStatus::Pending;
        }
        Ok(entry)
    }

    /// Removes a command that will never be accepted.
    pub fn discard(&mut self, seq: CommandSeq) -> Result<StoredCommand, OutboxError> {
        self.remove(seq)
    }

    /// Points every command scoped under `old` at `new`.
    ///
    /// Returns the sequences of the rewritten commands.
    pub fn rewrite_related_handle(&mut self, old: &str, new: &str) -> Vec<CommandSeq> {
        let mut touched = Vec::new();
        for seq in &self.order {
            let Some(entry) = self.entries.get_mut(seq) else {
                continue;
            };
            if entry.command.related_handle() == Some(old) {
                entry.command.set_related_handle(new);
                touched.push(*seq);
            }
        }
        touched
    }

    /// Rewrites any remaining reference to `old` in queued snapshots.
    pub fn resolve_handle(&mut self, old: &str, new: &str) -> Vec<CommandSeq> {
        let mut touched = Vec::new();
        for seq in &self.order {
            let Some(entry) = self.entries.get_mut(seq) else {
                continue;
            };
            if entry.command.rewrite_handles(old, new) {
                touched.push(*seq);
            }
        }
        touched
    }

    /// True when a queued command other than `except` acts on `handle`.
    pub fn references_entity(&self, handle: &str, except: CommandSeq) -> bool {
        self.iter()
            .any(|e| e.seq != except && e.command.entity_handle() == handle)
    }

    /// Looks up a queued command.
    pub fn get(&self, seq: CommandSeq) -> Option<&StoredCommand> {
        self.entries.get(&seq)
    }

    /// Queued commands in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &StoredCommand> {
        self.order.iter().filter_map(|seq| self.entries.get(seq))
    }

    /// Queued commands without their bookkeeping, in sequence order.
    pub fn pending_commands(&self) -> impl Iterator<Item = &OutgoingCommand> {
        self.iter().map(|e| &e.command)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Highest sequence handed out so far, 0 if none.
    pub fn latest_seq(&self) -> CommandSeq {
        self.next_seq.saturating_sub(1)
    }

    fn remove(&mut self, seq: CommandSeq) -> Result<StoredCommand, OutboxError> {
        let entry = self.entries.remove(&seq).ok_or(OutboxError::NotFound(seq))?;
        if let Some(pos) = self.order.iter().position(|s| *s == seq) {
            self.order.remove(pos);
        }
        Ok(entry)
    }
}
