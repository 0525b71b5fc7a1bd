//! Completion tokens for flush and shutdown acknowledgement.
//!
//! A token is a clonable handle to a one-shot tri-state cell: pending until
//! exactly one `succeed` or `fail` wins, settled forever after. Waiters can
//! observe the outcome synchronously (callbacks) or asynchronously
//! (`wait` / `wait_timeout`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Why a token failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CompletionError {
    pub message: String,
}

impl CompletionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Observable state of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    Pending,
    Succeeded,
    Failed(CompletionError),
}

impl TokenState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

type Callback = Box<dyn FnOnce(&TokenState) + Send>;

struct Inner {
    /// State plus the callbacks registered while pending. One mutex for
    /// both so registration and settlement see a consistent view; callbacks
    /// are always invoked outside the lock.
    state: Mutex<(TokenState, Vec<Callback>)>,
    notify: Notify,
}

/// A clonable completion token.
///
/// All clones share the same cell; settling any clone settles them all.
/// The first `succeed` or `fail` wins and later settle attempts are no-ops.
#[derive(Clone)]
pub struct CompletionToken {
    inner: Arc<Inner>,
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionToken {
    /// Create a pending token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new((TokenState::Pending, Vec::new())),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a token that is already settled as succeeded.
    pub fn succeeded() -> Self {
        let token = Self::new();
        token.succeed();
        token
    }

    /// Create a token that is already settled as failed.
    pub fn failed(error: CompletionError) -> Self {
        let token = Self::new();
        token.fail(error);
        token
    }

    /// Settle as succeeded. Returns true if this call won the settle.
    pub fn succeed(&self) -> bool {
        self.settle(TokenState::Succeeded)
    }

    /// Settle as failed. Returns true if this call won the settle.
    pub fn fail(&self, error: CompletionError) -> bool {
        self.settle(TokenState::Failed(error))
    }

    fn settle(&self, outcome: TokenState) -> bool {
        let callbacks = {
            let mut guard = match self.inner.state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.0.is_settled() {
                return false;
            }
            guard.0 = outcome.clone();
            std::mem::take(&mut guard.1)
        };
        // Run callbacks in registration order, outside the lock so they may
        // freely touch the token (e.g. read its state or clone it).
        for callback in callbacks {
            callback(&outcome);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Snapshot the current state.
    pub fn state(&self) -> TokenState {
        match self.inner.state.lock() {
            Ok(g) => g.0.clone(),
            Err(poisoned) => poisoned.into_inner().0.clone(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    pub fn is_succeeded(&self) -> bool {
        self.state() == TokenState::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state(), TokenState::Failed(_))
    }

    /// Register a callback to run when the token settles.
    ///
    /// If the token is already settled the callback runs immediately on the
    /// calling thread; otherwise it runs on the settling thread, after all
    /// callbacks registered before it.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: FnOnce(&TokenState) + Send + 'static,
    {
        let mut slot: Option<Callback> = Some(Box::new(callback));
        let settled = {
            let mut guard = match self.inner.state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.0.is_settled() {
                Some(guard.0.clone())
            } else {
                guard.1.extend(slot.take());
                None
            }
        };
        if let (Some(state), Some(callback)) = (settled, slot) {
            callback(&state);
        }
    }

    /// Wait for the token to settle.
    pub async fn wait(&self) -> Result<(), CompletionError> {
        loop {
            // Register interest before checking state, otherwise a settle
            // between the check and the await would be missed.
            let notified = self.inner.notify.notified();
            match self.state() {
                TokenState::Succeeded => return Ok(()),
                TokenState::Failed(err) => return Err(err),
                TokenState::Pending => notified.await,
            }
        }
    }

    /// Wait for the token to settle, up to `timeout`.
    ///
    /// `None` means the token is still pending when the timeout elapsed:
    /// the outcome is unknown, not failed, and the token may settle later.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), CompletionError>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Aggregate many tokens into one.
    ///
    /// The result succeeds once every input has succeeded and fails as soon
    /// as any input fails (carrying the first failure). An empty input set
    /// yields an already-succeeded token.
    pub fn join_all<I>(tokens: I) -> CompletionToken
    where
        I: IntoIterator<Item = CompletionToken>,
    {
        let tokens: Vec<_> = tokens.into_iter().collect();
        if tokens.is_empty() {
            return CompletionToken::succeeded();
        }

        let aggregate = CompletionToken::new();
        let remaining = Arc::new(AtomicUsize::new(tokens.len()));
        for token in tokens {
            let aggregate = aggregate.clone();
            let remaining = Arc::clone(&remaining);
            token.on_completion(move |state| match state {
                TokenState::Succeeded => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        aggregate.succeed();
                    }
                }
                TokenState::Failed(err) => {
                    aggregate.fail(err.clone());
                }
                TokenState::Pending => unreachable!("callback fired while pending"),
            });
        }
        aggregate
    }
}

impl std::fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionToken")
            .field("state", &self.state())
            .finish()
    }
}
