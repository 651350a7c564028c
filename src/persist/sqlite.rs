//! SQLite-backed outbox store.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    command::StoredCommand,
    types::{CommandSeq, EntityKind},
};

use super::{decode_payload, encode_payload, CommandStore, PersistResult};

/// SQLite implementation of [`crate::persist::CommandStore`].
pub struct SqliteCommandStore {
    conn: Connection,
}

impl SqliteCommandStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode with `synchronous=FULL` so a committed row survives
    /// power loss, not just a process crash.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(Self { conn })
    }

    /// Number of stored rows.
    pub fn count(&self) -> PersistResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Highest stored sequence, if any.
    pub fn latest_seq(&self) -> PersistResult<Option<CommandSeq>> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM outbox", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.map(|s| s as CommandSeq))
    }

    /// Overwrites a row's payload with raw bytes. Test hook for corruption.
    #[doc(hidden)]
    pub fn write_raw_payload(&mut self, seq: CommandSeq, payload: &[u8]) -> PersistResult<()> {
        self.conn.execute(
            "UPDATE outbox SET payload = ?1 WHERE seq = ?2",
            params![payload, seq as i64],
        )?;
        Ok(())
    }
}

impl CommandStore for SqliteCommandStore {
    fn save(&mut self, stored: &StoredCommand) -> PersistResult<()> {
        let payload = encode_payload(stored)?;
        let kind = stored.command.kind();
        self.conn.execute(
            "INSERT INTO outbox(seq, ts_ms, entity, action, related_handle, status, attempts, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stored.seq as i64,
                stored.ts_ms as i64,
                entity_code(kind.entity),
                format!("{:?}", kind.action),
                stored.command.related_handle(),
                stored.status.as_str(),
                stored.attempts,
                payload,
            ],
        )?;
        Ok(())
    }

    fn load_all(&mut self) -> PersistResult<Vec<PersistResult<StoredCommand>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, payload FROM outbox ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| {
            let seq: i64 = row.get(0)?;
            let payload: Vec<u8> = row.get(1)?;
            Ok((seq as CommandSeq, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, payload) = row?;
            out.push(decode_payload(seq, &payload));
        }
        Ok(out)
    }

    fn delete(&mut self, seq: CommandSeq) -> PersistResult<()> {
        self.conn
            .execute("DELETE FROM outbox WHERE seq = ?1", params![seq as i64])?;
        Ok(())
    }

    fn update(&mut self, stored: &StoredCommand) -> PersistResult<()> {
        let payload = encode_payload(stored)?;
        self.conn.execute(
            "UPDATE outbox SET related_handle = ?1, status = ?2, attempts = ?3, payload = ?4
             WHERE seq = ?5",
            params![
                stored.command.related_handle(),
                stored.status.as_str(),
                stored.attempts,
                payload,
                stored.seq as i64,
            ],
        )?;
        Ok(())
    }
}

fn entity_code(entity: EntityKind) -> i64 {
    match entity {
        EntityKind::Topic => 1,
        EntityKind::Comment => 2,
        EntityKind::Reply => 3,
    }
}
