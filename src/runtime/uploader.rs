use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::{ConfigError, UploaderConfig},
    network::{ReachabilitySource, ReachabilitySubscription},
    remote::{CommandError, RemoteService},
};

use super::{
    events::CacheEvent,
    handle::{CacheHandle, RuntimeError},
};

/// Observable uploader lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    /// Started, nothing to do.
    Idle,
    /// A drain pass is running.
    Draining,
    /// Paused after a transient failure or while unreachable.
    WaitingForNetwork,
    /// `stop()` was called.
    Stopped,
    /// A store fault ended the last pass; `restart()` tries again.
    Faulted,
}

/// Background daemon that replays the outbox against the remote service.
///
/// Exactly one submission is in flight at any time. Drains are triggered by
/// `start()`, `restart()`, a transition to reachable, and newly queued
/// commands.
pub struct Uploader {
    shared: Arc<Shared>,
}

struct Shared {
    cache: CacheHandle,
    remote: Arc<dyn RemoteService>,
    config: UploaderConfig,
    state_tx: watch::Sender<UploaderState>,
    stop_tx: watch::Sender<bool>,
    draining: AtomicBool,
    rerun: AtomicBool,
    reachable: AtomicBool,
    /// Set after a transient failure; cleared by reachability, restart or backoff expiry.
    paused: AtomicBool,
    tasks: Mutex<Tasks>,
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<()>>,
    drain: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

enum PassExit {
    Empty,
    Unreachable,
    Stopped,
    Backoff(u64),
    Fault,
}

impl Uploader {
    /// Builds a stopped uploader.
    pub fn new(
        cache: CacheHandle,
        remote: Arc<dyn RemoteService>,
        config: UploaderConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(UploaderState::Stopped);
        let (stop_tx, _) = watch::channel(true);
        Ok(Self {
            shared: Arc::new(Shared {
                cache,
                remote,
                config,
                state_tx,
                stop_tx,
                draining: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                reachable: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                tasks: Mutex::new(Tasks::default()),
            }),
        })
    }

    /// Subscribes to `source` and resumes any leftover outbox.
    ///
    /// Returns `false` when already started.
    pub fn start(&self, source: &dyn ReachabilitySource) -> bool {
        let shared = &self.shared;
        {
            let mut tasks = lock_tasks(&shared.tasks);
            if tasks.listener.is_some() {
                return false;
            }

            let subscription = source.subscribe();
            shared
                .reachable
                .store(subscription.is_reachable(), Ordering::SeqCst);
            shared.paused.store(false, Ordering::SeqCst);
            shared.stop_tx.send_replace(false);
            shared.state_tx.send_replace(UploaderState::Idle);

            let events = shared.cache.subscribe();
            let listener = Arc::clone(shared);
            tasks.listener = Some(tokio::spawn(async move {
                listener.listen(subscription, events).await;
            }));
        }

        info!(reachable = shared.reachable.load(Ordering::SeqCst), "uploader started");
        Shared::trigger(shared);
        true
    }

    /// Requests a drain pass, e.g. after a failure. `false` when not started.
    pub fn restart(&self) -> bool {
        if *self.shared.stop_tx.borrow() {
            return false;
        }
        debug!("uploader restart requested");
        self.shared.paused.store(false, Ordering::SeqCst);
        Shared::trigger(&self.shared);
        true
    }

    /// Cancels any in-flight submission and unsubscribes from reachability.
    ///
    /// The interrupted command is left `Pending`. Returns `false` when not
    /// started.
    pub async fn stop(&self) -> bool {
        let (listener, drain, retry) = {
            let mut tasks = lock_tasks(&self.shared.tasks);
            let Some(listener) = tasks.listener.take() else {
                return false;
            };
            self.shared.stop_tx.send_replace(true);
            (listener, tasks.drain.take(), tasks.retry.take())
        };

        listener.abort();
        // Awaiting the aborted task drops its subscription before we return.
        let _ = listener.await;
        if let Some(retry) = retry {
            retry.abort();
        }
        if let Some(drain) = drain {
            let _ = drain.await;
        }

        self.shared.state_tx.send_replace(UploaderState::Stopped);
        info!("uploader stopped");
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UploaderState {
        *self.shared.state_tx.borrow()
    }

    /// Watch on the lifecycle state.
    pub fn state_receiver(&self) -> watch::Receiver<UploaderState> {
        self.shared.state_tx.subscribe()
    }
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn set_state(&self, state: UploaderState) {
        if !self.is_stopped() {
            self.state_tx.send_replace(state);
        }
    }

    /// Starts a drain pass unless one is running, in which case it re-checks
    /// the queue when done.
    fn trigger(this: &Arc<Self>) {
        if this.is_stopped() {
            return;
        }
        if this.draining.swap(true, Ordering::SeqCst) {
            this.rerun.store(true, Ordering::SeqCst);
            return;
        }

        let runner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            runner.run().await;
        });
        lock_tasks(&this.tasks).drain = Some(handle);
    }

    async fn listen(
        self: Arc<Self>,
        mut subscription: ReachabilitySubscription,
        mut events: tokio::sync::broadcast::Receiver<CacheEvent>,
    ) {
        loop {
            tokio::select! {
                change = subscription.changed() => match change {
                    Some(true) => {
                        self.reachable.store(true, Ordering::SeqCst);
                        self.paused.store(false, Ordering::SeqCst);
                        info!("service reachable");
                        Self::trigger(&self);
                    }
                    Some(false) => {
                        self.reachable.store(false, Ordering::SeqCst);
                        debug!("service unreachable");
                    }
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(CacheEvent::CommandQueued { .. }) | Err(RecvError::Lagged(_)) => {
                        if self.reachable.load(Ordering::SeqCst) {
                            Self::trigger(&self);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.rerun.store(false, Ordering::SeqCst);
            let exit = self.pass().await;

            match exit {
                PassExit::Empty => self.set_state(UploaderState::Idle),
                PassExit::Unreachable => self.set_state(UploaderState::WaitingForNetwork),
                PassExit::Stopped => {}
                PassExit::Backoff(delay_ms) => {
                    self.set_state(UploaderState::WaitingForNetwork);
                    self.schedule_retry(delay_ms);
                }
                PassExit::Fault => self.set_state(UploaderState::Faulted),
            }

            self.draining.store(false, Ordering::SeqCst);
            let again = self.rerun.swap(false, Ordering::SeqCst);
            if !again || self.is_stopped() || matches!(exit, PassExit::Fault) {
                break;
            }
            if self.draining.swap(true, Ordering::SeqCst) {
                break;
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, delay_ms: u64) {
        debug!(delay_ms, "retry scheduled");
        let retrier = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            retrier.paused.store(false, Ordering::SeqCst);
            Self::trigger(&retrier);
        });
        let mut tasks = lock_tasks(&self.tasks);
        if let Some(previous) = tasks.retry.replace(handle) {
            previous.abort();
        }
    }

    #[instrument(skip_all)]
    async fn pass(&self) -> PassExit {
        self.set_state(UploaderState::Draining);
        loop {
            if self.is_stopped() {
                return PassExit::Stopped;
            }
            if !self.reachable.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst) {
                return PassExit::Unreachable;
            }

            let next = match self.cache.next_upload().await {
                Ok(Some(next)) => next,
                Ok(None) => return PassExit::Empty,
                Err(err) => return self.fault(err),
            };
            let seq = next.seq;

            let submitted = tokio::select! {
                res = self.remote.submit(&next.command) => Some(res),
                _ = stopped(self.stop_tx.subscribe()) => None,
            };

            let Some(result) = submitted else {
                debug!(seq, "submission cancelled");
                if let Err(err) = self.cache.release(seq).await {
                    self.fault(err);
                }
                return PassExit::Stopped;
            };

            let step = match result {
                Ok(confirmation) => self.cache.confirm(seq, confirmation).await,
                Err(err) if !err.is_transient() => {
                    self.cache.reject(seq, CommandError::Rejected(err)).await
                }
                Err(err) => {
                    let attempts = next.attempts.saturating_add(1);
                    if attempts >= self.config.max_attempts {
                        let error = CommandError::RetriesExhausted {
                            attempts,
                            last: err,
                        };
                        self.cache.reject(seq, error).await
                    } else {
                        warn!(seq, attempts, %err, "transient upload failure");
                        if let Err(fault) = self.cache.fail(seq, attempts).await {
                            return self.fault(fault);
                        }
                        self.paused.store(true, Ordering::SeqCst);
                        if err.is_connectivity() {
                            return PassExit::Unreachable;
                        }
                        return PassExit::Backoff(self.config.backoff_ms(attempts));
                    }
                }
            };

            if let Err(err) = step {
                return self.fault(err);
            }
        }
    }

    fn fault(&self, err: RuntimeError) -> PassExit {
        error!(%err, "uploader bookkeeping failed");
        PassExit::Fault
    }
}

/// Resolves once the stop flag is raised.
async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn lock_tasks(tasks: &Mutex<Tasks>) -> std::sync::MutexGuard<'_, Tasks> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
