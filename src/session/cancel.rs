//! Per-session cancellation token and callback gate.
//!
//! Every asynchronous continuation of a session (capture consumer, event
//! driver, backoff sleeps, the connect future itself) holds a clone of the
//! session's [`SessionToken`].  Host callbacks are only ever invoked through
//! [`SessionToken::emit`], which checks the flag under a read lock.
//! [`SessionToken::cancel`] sets the flag and then takes the write lock, so
//! once it returns no callback is running and none can start.
//!
//! A callback that itself ends the session (e.g. `disconnect()` from inside
//! `on_turn_complete`) would deadlock on that write lock, so `cancel` skips
//! the wait when called from inside an `emit` on the same thread.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Notify;

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    gate: RwLock<()>,
}

/// Shared "intentional disconnect" flag of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionToken {
    inner: Arc<TokenInner>,
}

impl SessionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Set the flag, wake every [`cancelled`](Self::cancelled) waiter and
    /// wait for in-flight callbacks on other threads.  Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.notify.notify_waiters();
        if !IN_CALLBACK.with(Cell::get) {
            drop(
                self.inner
                    .gate
                    .write()
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `callback` unless the session has been cancelled.  Returns
    /// whether it ran.
    pub fn emit(&self, callback: impl FnOnce()) -> bool {
        let _open = self
            .inner
            .gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return false;
        }
        let _reset = CallbackScope::enter();
        callback();
        true
    }

    /// `true` when both tokens belong to the same session.
    pub fn same(&self, other: &SessionToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Marks the current thread as running a host callback.
struct CallbackScope(bool);

impl CallbackScope {
    fn enter() -> Self {
        CallbackScope(IN_CALLBACK.with(|c| c.replace(true)))
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        IN_CALLBACK.with(|c| c.set(self.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn emit_stops_after_cancel() {
        let token = SessionToken::new();
        let hits = AtomicUsize::new(0);
        assert!(token.emit(|| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
        token.cancel();
        token.cancel();
        assert!(!token.emit(|| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_inside_callback_does_not_deadlock() {
        let token = SessionToken::new();
        let inner = token.clone();
        token.emit(move || inner.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_waits_for_running_callback() {
        let token = SessionToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let worker = {
            let token = token.clone();
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                token.emit(|| {
                    started_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                });
            })
        };

        started_rx.recv().unwrap();
        token.cancel();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = SessionToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        waiter.await.unwrap();

        // Already cancelled: resolves immediately.
        token.cancelled().await;
    }

    #[test]
    fn same_compares_sessions() {
        let a = SessionToken::new();
        let b = SessionToken::new();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }
}
