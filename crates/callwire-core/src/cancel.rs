//! Cooperative cancellation for connect attempts.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. A [`child_token`](Self::child_token) is
/// cancelled with its parent but can be cancelled on its own without
/// affecting the parent.
///
/// ```
/// use callwire_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let attempt = token.child_token();
///
/// attempt.cancel();
/// assert!(!token.is_cancelled());
///
/// let attempt = token.child_token();
/// token.cancel();
/// assert!(attempt.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and its children, waking every waiter.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A token cancelled whenever this one is.
    pub fn child_token(&self) -> Self {
        let child = Arc::new(Inner::default());
        {
            let mut children = self.inner.children.lock();
            if self.is_cancelled() {
                child.cancelled.store(true, Ordering::SeqCst);
            } else {
                children.retain(|existing| existing.strong_count() > 0);
                children.push(Arc::downgrade(&child));
            }
        }
        Self { inner: child }
    }

    /// `Err(CancelledError)` once cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::CallwireError {
    fn from(_: CancelledError) -> Self {
        crate::error::CallwireError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());

        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(CancelledError));
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let first = parent.child_token();
        let second = parent.child_token();
        let grandchild = second.child_token();

        first.cancel();
        assert!(!parent.is_cancelled());
        assert!(!second.is_cancelled());

        parent.cancel();
        assert!(second.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_token_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().check().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter_through_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let handle = tokio::spawn(async move { child.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already cancelled");
    }
}
