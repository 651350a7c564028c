use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::{
    command::{OutgoingCommand, StoredCommand},
    config::{CacheConfig, ConfigError},
    core::outbox::{Outbox, OutboxError},
    persist::{restore_outbox, CommandStore, PersistError, PersistResult},
    projection::{
        engine::{ProjectionEngine, ProjectionError, ServerPage},
        views::Projection,
    },
    remote::{CommandError, ServerConfirmation},
    types::{is_temporary, CommandSeq, Handle, ViewId},
};

use super::events::CacheEvent;

/// Errors surfaced by [`CacheHandle`] calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid outbox transition.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    /// The command store failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// View lookup or merge failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The actor is gone.
    #[error("cache runtime has shut down")]
    ChannelClosed,
}

/// Final result of one command, delivered to whoever enqueued it.
pub type CommandOutcome = Result<ServerConfirmation, CommandError>;

/// Receipt for an enqueued command.
#[derive(Debug)]
pub struct CommandTicket {
    /// Outbox sequence.
    pub seq: CommandSeq,
    /// Handle of the entity the command acts on (temporary for creations).
    pub handle: Handle,
    outcome: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    /// Waits until the command is confirmed or rolled back.
    ///
    /// `None` if the runtime shut down first; the command stays queued.
    pub async fn outcome(self) -> Option<CommandOutcome> {
        self.outcome.await.ok()
    }
}

type SharedStore = Arc<Mutex<Box<dyn CommandStore>>>;

/// Cloneable handle to the cache actor.
#[derive(Clone)]
pub struct CacheHandle {
    req_tx: mpsc::Sender<Request>,
    events_tx: broadcast::Sender<CacheEvent>,
}

enum Request {
    Enqueue {
        command: OutgoingCommand,
        resp: oneshot::Sender<Result<CommandTicket, RuntimeError>>,
    },
    RegisterView {
        projection: Projection,
        resp: oneshot::Sender<ViewId>,
    },
    DropView {
        id: ViewId,
        resp: oneshot::Sender<bool>,
    },
    View {
        id: ViewId,
        resp: oneshot::Sender<Option<Projection>>,
    },
    MergePage {
        id: ViewId,
        page: ServerPage,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Pending {
        resp: oneshot::Sender<Vec<StoredCommand>>,
    },
    NextUpload {
        resp: oneshot::Sender<Result<Option<StoredCommand>, RuntimeError>>,
    },
    Confirm {
        seq: CommandSeq,
        confirmation: ServerConfirmation,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Fail {
        seq: CommandSeq,
        attempts: u32,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Reject {
        seq: CommandSeq,
        error: CommandError,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Release {
        seq: CommandSeq,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Restores the outbox from `store` and starts the actor.
pub fn open_cache(
    mut store: Box<dyn CommandStore>,
    config: CacheConfig,
) -> Result<CacheHandle, RuntimeError> {
    config.validate()?;
    let outbox = restore_outbox(store.as_mut())?;
    Ok(spawn_cache(outbox, store, config))
}

/// Starts the actor that owns `outbox`, the projections and `store`.
///
/// Every mutation of outbox or projections runs inside this one task, so a
/// user action and an upload confirmation never interleave.
pub fn spawn_cache(outbox: Outbox, store: Box<dyn CommandStore>, config: CacheConfig) -> CacheHandle {
    let (req_tx, mut req_rx) = mpsc::channel::<Request>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<CacheEvent>(config.event_capacity.max(1));

    let mut state = CacheState {
        outbox,
        engine: ProjectionEngine::new(),
        store: Arc::new(Mutex::new(store)),
        events_tx: events_tx.clone(),
        waiters: HashMap::new(),
    };

    tokio::spawn(async move {
        while let Some(req) = req_rx.recv().await {
            if state.handle_request(req).await {
                break;
            }
        }
        debug!("cache actor stopped");
    });

    CacheHandle { req_tx, events_tx }
}

impl CacheHandle {
    /// Subscribes to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.req_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Durably queues `command` and applies it to every live view.
    ///
    /// Either both happen or neither does.
    pub async fn enqueue(&self, command: OutgoingCommand) -> Result<CommandTicket, RuntimeError> {
        self.call(|resp| Request::Enqueue { command, resp }).await?
    }

    /// Registers a view built from server data; pending commands are replayed onto it.
    pub async fn register_view(&self, projection: Projection) -> Result<ViewId, RuntimeError> {
        self.call(|resp| Request::RegisterView { projection, resp })
            .await
    }

    /// Stops tracking a view. `false` if it was unknown.
    pub async fn drop_view(&self, id: ViewId) -> Result<bool, RuntimeError> {
        self.call(|resp| Request::DropView { id, resp }).await
    }

    /// Current state of a view.
    pub async fn view(&self, id: ViewId) -> Result<Option<Projection>, RuntimeError> {
        self.call(|resp| Request::View { id, resp }).await
    }

    /// Folds a fetched page into a view, keeping pending commands applied.
    pub async fn merge_server_page(&self, id: ViewId, page: ServerPage) -> Result<(), RuntimeError> {
        self.call(|resp| Request::MergePage { id, page, resp })
            .await?
    }

    /// Queued commands in sequence order.
    pub async fn pending(&self) -> Result<Vec<StoredCommand>, RuntimeError> {
        self.call(|resp| Request::Pending { resp }).await
    }

    /// Marks the head of the outbox `Sending` and returns it.
    ///
    /// Heads whose parent handle was never resolved are rolled back and
    /// skipped. `None` when nothing is ready.
    pub async fn next_upload(&self) -> Result<Option<StoredCommand>, RuntimeError> {
        self.call(|resp| Request::NextUpload { resp }).await?
    }

    /// Records server acceptance, resolving a temporary handle if one was assigned.
    pub async fn confirm(
        &self,
        seq: CommandSeq,
        confirmation: ServerConfirmation,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Request::Confirm {
            seq,
            confirmation,
            resp,
        })
        .await?
    }

    /// Records a transient failure; the command stays queued.
    pub async fn fail(&self, seq: CommandSeq, attempts: u32) -> Result<(), RuntimeError> {
        self.call(|resp| Request::Fail {
            seq,
            attempts,
            resp,
        })
        .await?
    }

    /// Rolls a command back and reports `error` to its originator.
    pub async fn reject(&self, seq: CommandSeq, error: CommandError) -> Result<(), RuntimeError> {
        self.call(|resp| Request::Reject { seq, error, resp })
            .await?
    }

    /// Returns an aborted in-flight command to `Pending`.
    pub async fn release(&self, seq: CommandSeq) -> Result<(), RuntimeError> {
        self.call(|resp| Request::Release { seq, resp }).await?
    }

    /// Stops the actor; later calls fail with [`RuntimeError::ChannelClosed`].
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Request::Shutdown { resp }).await
    }
}

struct CacheState {
    outbox: Outbox,
    engine: ProjectionEngine,
    store: SharedStore,
    events_tx: broadcast::Sender<CacheEvent>,
    waiters: HashMap<CommandSeq, oneshot::Sender<CommandOutcome>>,
}

impl CacheState {
    async fn handle_request(&mut self, req: Request) -> bool {
        match req {
            Request::Enqueue { command, resp } => {
                let _ = resp.send(self.enqueue(command).await);
            }
            Request::RegisterView { projection, resp } => {
                let id = self.engine.register(projection, self.outbox.pending_commands());
                let _ = resp.send(id);
            }
            Request::DropView { id, resp } => {
                let _ = resp.send(self.engine.drop_view(id).is_some());
            }
            Request::View { id, resp } => {
                let _ = resp.send(self.engine.get(id).cloned());
            }
            Request::MergePage { id, page, resp } => {
                let res = self
                    .engine
                    .merge_server_page(id, page, self.outbox.pending_commands())
                    .map_err(RuntimeError::from)
                    .map(|changed| {
                        if changed {
                            self.notify(vec![id]);
                        }
                    });
                let _ = resp.send(res);
            }
            Request::Pending { resp } => {
                let _ = resp.send(self.outbox.iter().cloned().collect());
            }
            Request::NextUpload { resp } => {
                let _ = resp.send(self.next_upload().await);
            }
            Request::Confirm {
                seq,
                confirmation,
                resp,
            } => {
                let _ = resp.send(self.confirm(seq, confirmation).await);
            }
            Request::Fail {
                seq,
                attempts,
                resp,
            } => {
                let res = match self.outbox.mark_failed(seq, attempts) {
                    Ok(row) => {
                        let row = row.clone();
                        with_store(&self.store, move |s| s.update(&row))
                            .await
                            .map_err(RuntimeError::from)
                    }
                    Err(err) => Err(err.into()),
                };
                let _ = resp.send(res);
            }
            Request::Reject { seq, error, resp } => {
                let _ = resp.send(self.reject(seq, error).await);
            }
            Request::Release { seq, resp } => {
                let res = match self.outbox.release(seq) {
                    Ok(row) => {
                        let row = row.clone();
                        with_store(&self.store, move |s| s.update(&row))
                            .await
                            .map_err(RuntimeError::from)
                    }
                    Err(err) => Err(err.into()),
                };
                let _ = resp.send(res);
            }
            Request::Shutdown { resp } => {
                let _ = resp.send(());
                return true;
            }
        }

        false
    }

    #[instrument(skip_all, fields(kind = ?command.kind()))]
    async fn enqueue(&mut self, command: OutgoingCommand) -> Result<CommandTicket, RuntimeError> {
        let stored = self.outbox.enqueue(command);
        let row = stored.clone();
        if let Err(err) = with_store(&self.store, move |s| s.save(&row)).await {
            // Nothing was applied yet, so dropping the in-memory row is enough.
            self.outbox.discard(stored.seq)?;
            return Err(err.into());
        }

        let changed = self.engine.apply_command(&stored.command);
        self.notify(changed);

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(stored.seq, tx);
        let _ = self.events_tx.send(CacheEvent::CommandQueued { seq: stored.seq });
        debug!(seq = stored.seq, "command queued");

        Ok(CommandTicket {
            seq: stored.seq,
            handle: stored.command.entity_handle().to_string(),
            outcome: rx,
        })
    }

    async fn next_upload(&mut self) -> Result<Option<StoredCommand>, RuntimeError> {
        loop {
            let Some(head) = self.outbox.peek_next() else {
                return Ok(None);
            };
            let seq = head.seq;

            // The parent's creation is always queued ahead of its dependents,
            // so a temporary parent here means that creation is gone.
            if let Some(parent) = head.command.related_handle().filter(|h| is_temporary(h)) {
                let parent = parent.to_string();
                warn!(seq, %parent, "dropping command with unresolved parent");
                self.roll_back(seq, CommandError::UnresolvedParent(parent)).await?;
                continue;
            }

            let row = self.outbox.mark_sending(seq)?.clone();
            let persisted = row.clone();
            with_store(&self.store, move |s| s.update(&persisted)).await?;
            return Ok(Some(row));
        }
    }

    #[instrument(skip(self, confirmation))]
    async fn confirm(
        &mut self,
        seq: CommandSeq,
        confirmation: ServerConfirmation,
    ) -> Result<(), RuntimeError> {
        let stored = self
            .outbox
            .get(seq)
            .cloned()
            .ok_or(OutboxError::NotFound(seq))?;

        if stored.command.creates_entity() {
            if let Some(server) = confirmation.handle.as_deref() {
                let temporary = stored.command.entity_handle().to_string();
                if temporary != server {
                    self.resolve_handle(seq, &temporary, server).await?;
                }
            }
        }

        let done = self.outbox.mark_applied(seq)?;
        with_store(&self.store, move |s| s.delete(seq)).await?;
        self.settle(&done.command, seq);

        if let Some(waiter) = self.waiters.remove(&seq) {
            let _ = waiter.send(Ok(confirmation));
        }
        let _ = self.events_tx.send(CacheEvent::CommandConfirmed { seq });
        info!(seq, "command confirmed");
        Ok(())
    }

    async fn resolve_handle(
        &mut self,
        seq: CommandSeq,
        temporary: &str,
        server: &str,
    ) -> Result<(), RuntimeError> {
        let mut touched = self.outbox.rewrite_related_handle(temporary, server);
        touched.extend(self.outbox.resolve_handle(temporary, server));
        touched.sort_unstable();
        touched.dedup();

        let rows: Vec<StoredCommand> = touched
            .into_iter()
            .filter(|s| *s != seq)
            .filter_map(|s| self.outbox.get(s).cloned())
            .collect();
        if !rows.is_empty() {
            with_store(&self.store, move |s| {
                for row in &rows {
                    s.update(row)?;
                }
                Ok(())
            })
            .await?;
        }

        let changed = self.engine.resolve_handle(temporary, server);
        self.notify(changed);
        let _ = self.events_tx.send(CacheEvent::HandleResolved {
            temporary: temporary.to_string(),
            server: server.to_string(),
        });
        info!(%temporary, %server, "handle resolved");
        Ok(())
    }

    /// Rolls back `seq` and every queued command that depends on an entity it created.
    #[instrument(skip(self))]
    async fn reject(&mut self, seq: CommandSeq, error: CommandError) -> Result<(), RuntimeError> {
        let root = self
            .outbox
            .get(seq)
            .cloned()
            .ok_or(OutboxError::NotFound(seq))?;
        warn!(seq, %error, "rolling back command");

        let mut dependents = Vec::new();
        if root.command.creates_entity() && is_temporary(root.command.entity_handle()) {
            let mut dead: HashSet<String> = HashSet::new();
            dead.insert(root.command.entity_handle().to_string());
            for entry in self.outbox.iter().filter(|e| e.seq > seq) {
                let cmd = &entry.command;
                let hit = dead.contains(cmd.entity_handle())
                    || cmd.related_handle().is_some_and(|h| dead.contains(h));
                if hit {
                    if cmd.creates_entity() {
                        dead.insert(cmd.entity_handle().to_string());
                    }
                    dependents.push((entry.seq, cmd.entity_handle().to_string()));
                }
            }
        }

        // Undo newest first so each inverse sees the state its command produced.
        let parent = root.command.entity_handle().to_string();
        for (dep, _) in dependents.into_iter().rev() {
            self.roll_back(dep, CommandError::UnresolvedParent(parent.clone()))
                .await?;
        }
        self.roll_back(seq, error).await
    }

    async fn roll_back(&mut self, seq: CommandSeq, error: CommandError) -> Result<(), RuntimeError> {
        let stored = self.outbox.discard(seq)?;
        with_store(&self.store, move |s| s.delete(seq)).await?;

        let changed = self.engine.apply_command(&stored.command.inverse());
        self.notify(changed);
        self.settle(&stored.command, seq);

        if let Some(waiter) = self.waiters.remove(&seq) {
            let _ = waiter.send(Err(error.clone()));
        }
        let _ = self
            .events_tx
            .send(CacheEvent::CommandRejected { seq, error });
        Ok(())
    }

    fn settle(&mut self, command: &OutgoingCommand, seq: CommandSeq) {
        let handle = command.entity_handle();
        if !self.outbox.references_entity(handle, seq) {
            self.engine.settle(handle);
        }
    }

    fn notify(&self, views: Vec<ViewId>) {
        for view in views {
            let _ = self.events_tx.send(CacheEvent::ProjectionChanged { view });
        }
    }
}

async fn with_store<T, F>(store: &SharedStore, f: F) -> PersistResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn CommandStore) -> PersistResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || {
        let mut guard = store.blocking_lock();
        f(&mut **guard)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}
