//! Per-session control state.
//!
//! [`Scope`] is the cloneable handle background work carries: a cancellation
//! token plus the session error channel. [`Session`] is owned by the
//! controller: it tracks the stage, the temporary resources the session
//! registered, the deadline, and multiplexes every way a session can end.

use std::future::pending;
use std::path::{Path, PathBuf};

use flume::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::file::TempRegistry;
use crate::types::{Processing, Stage};

/// Cancellation and error reporting shared by the tasks of one session.
#[derive(Debug, Clone)]
pub struct Scope {
    token: CancellationToken,
    errors: Sender<Error>,
}

impl Scope {
    /// Creates a scope cancelled together with `parent`, and the receiving end of its error channel.
    pub fn new(parent: &CancellationToken) -> (Self, Receiver<Error>) {
        // One slot: the first error wins, later ones are dropped.
        let (errors, rx) = flume::bounded(1);
        (Self { token: parent.child_token(), errors }, rx)
    }

    /// A scope nobody listens to, for frames used outside a [`Session`].
    pub fn detached() -> Self {
        Self::new(&CancellationToken::new()).0
    }

    /// Reports a fatal error and cancels every task of the session.
    pub fn fail(&self, err: Error) {
        if self.errors.try_send(err).is_ok() {
            debug!("session error reported");
        }
        self.token.cancel();
    }

    /// # Errors
    ///
    /// Returns [`Error::Canceled`] once the session has been cancelled.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() { Err(Error::Canceled) } else { Ok(()) }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Controller-side state of one encrypt or decrypt call.
pub struct Session {
    operation: Processing,
    stage: Stage,
    scope: Scope,
    errors: Receiver<Error>,
    caller: CancellationToken,
    deadline: Option<Instant>,
    handle_signals: bool,
    registry: TempRegistry,
    resources: Vec<PathBuf>,
}

impl Session {
    pub fn new(operation: Processing, caller: &CancellationToken, deadline: Option<Instant>, handle_signals: bool, registry: TempRegistry) -> Self {
        let (scope, errors) = Scope::new(caller);
        Self { operation, stage: Stage::Validating, scope, errors, caller: caller.clone(), deadline, handle_signals, registry, resources: Vec::new() }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn enter(&mut self, next: Stage) {
        if self.stage.can_enter(next) {
            debug!(operation = ?self.operation, from = %self.stage, to = %next, "session stage");
            self.stage = next;
        } else {
            warn!(from = %self.stage, to = %next, "ignoring illegal stage transition");
        }
    }

    /// Fails if the caller already cancelled or the deadline already passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] or [`Error::DeadlineExceeded`].
    pub fn ensure_live(&self) -> Result<()> {
        if self.caller.is_cancelled() {
            return Err(Error::Canceled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Records a path the session created; it is removed if the session aborts.
    pub fn track(&mut self, path: &Path) {
        self.registry.register(path);
        self.resources.push(path.to_path_buf());
    }

    /// Creates a registered staging directory inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be created.
    pub fn create_staging_dir(&mut self, dir: &Path) -> Result<PathBuf> {
        let path = self.registry.create_dir(dir)?;
        self.resources.push(path.clone());
        Ok(path)
    }

    /// Keeps a tracked path: it survives the session.
    pub fn release(&mut self, path: &Path) {
        self.registry.release(path);
        self.resources.retain(|tracked| tracked != path);
    }

    /// Removes a tracked path now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if removal fails for a reason other than the path being gone.
    pub fn discard(&mut self, path: &Path) -> Result<()> {
        self.registry.remove(path)?;
        self.resources.retain(|tracked| tracked != path);
        Ok(())
    }

    /// Awaits `task`, racing it against every way the session can end early.
    ///
    /// On any early end the session scope is cancelled and the task is awaited
    /// before returning, so nothing is still writing when cleanup starts.
    ///
    /// # Errors
    ///
    /// Returns the first error reported through the scope, the task's own
    /// error, [`Error::Canceled`] on caller cancellation or an OS interrupt,
    /// or [`Error::DeadlineExceeded`].
    pub async fn wait<T: Send + 'static>(&mut self, mut task: JoinHandle<Result<T>>) -> Result<T> {
        let deadline = self.deadline;
        let outcome = tokio::select! {
            biased;
            Ok(err) = self.errors.recv_async() => Err(err),
            () = self.caller.cancelled() => Err(Error::Canceled),
            () = expire(deadline) => Err(Error::DeadlineExceeded),
            () = interrupted(self.handle_signals) => {
                warn!("interrupt received, canceling session");
                Err(Error::Canceled)
            }
            joined = &mut task => joined.map_err(Error::from).and_then(|result| result),
        };

        if outcome.is_err() {
            self.scope.cancel();
            if !task.is_finished() {
                let _ = task.await;
            }
            // A task failing on its own reports through the scope first.
            if let Ok(first) = self.errors.try_recv() {
                return Err(first);
            }
        }
        outcome
    }

    /// Marks the session aborted and removes everything it registered.
    pub fn abort(&mut self) {
        self.enter(Stage::Aborted);
        self.scope.cancel();
        for path in self.resources.drain(..) {
            if let Err(e) = self.registry.remove(&path) {
                warn!(path = %path.display(), "failed to remove temporary resource: {e}");
            }
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Resolves on SIGINT or SIGTERM; never resolves when disabled or when no handler can be installed.
async fn interrupted(enabled: bool) {
    if !enabled {
        return pending().await;
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    Ok(()) = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                if tokio::signal::ctrl_c().await.is_err() {
                    pending::<()>().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            pending::<()>().await;
        }
    }
}
