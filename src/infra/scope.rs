//! Consumer lifetimes for loads and subscriptions.
//!
//! A screen owns a [`ConsumerScope`]; everything it starts takes a
//! [`ScopeToken`]. The scope ends on [`ConsumerScope::cancel`], when the scope
//! is dropped, or when its deadline passes, whichever comes first.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct ConsumerScope {
    cancel: watch::Sender<bool>,
    deadline: Option<Instant>,
}

impl ConsumerScope {
    /// A scope that only ends on `cancel` or drop.
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A scope that also ends `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    /// Token for a load or subscription tied to this scope.
    pub fn token(&self) -> ScopeToken {
        ScopeToken {
            cancel: Some(self.cancel.subscribe()),
            deadline: self.deadline,
        }
    }

    /// End the scope now. Idempotent.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Default for ConsumerScope {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct ScopeToken {
    /// `None` for detached tokens, which only end at their deadline (if any).
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl ScopeToken {
    /// A token that never ends, for callers without a lifetime to tie to.
    pub fn detached() -> Self {
        Self {
            cancel: None,
            deadline: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        let signalled = self
            .cancel
            .as_ref()
            .is_some_and(|rx| *rx.borrow() || rx.has_changed().is_err());
        signalled || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the owning scope is cancelled, dropped, or past its deadline.
    pub async fn cancelled(&mut self) {
        let deadline = self.deadline;
        let cancel = self.cancel.as_mut();
        let watch_cancel = async move {
            let Some(rx) = cancel else {
                return std::future::pending::<()>().await;
            };
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = watch_cancel => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => watch_cancel.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_cancel_wakes_token() {
        let scope = ConsumerScope::new();
        let mut token = scope.token();
        assert!(!token.is_cancelled());

        scope.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_scope_wakes_token() {
        let scope = ConsumerScope::new();
        let mut token = scope.token();
        drop(scope);
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_wakes_token() {
        let scope = ConsumerScope::with_timeout(Duration::from_secs(5));
        let mut token = scope.token();
        token.cancelled().await;
        assert!(token.is_cancelled());
        assert!(scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn live_scope_does_not_fire() {
        let scope = ConsumerScope::new();
        let mut token = scope.token();
        let fired = tokio::time::timeout(Duration::from_secs(60), token.cancelled()).await;
        assert!(fired.is_err());
        assert!(!ScopeToken::detached().is_cancelled());
    }
}
