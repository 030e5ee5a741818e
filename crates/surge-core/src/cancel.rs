//! Cancellation tokens for session and per-task scopes.
//!
//! A download session holds a root token; each worker attempt gets a child.
//! Cancelling the root cancels every child (pause/shutdown); cancelling a
//! child only preempts that worker's current task (health preemption).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, cheap to clone and share across threads.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child token: cancelled when either it or any ancestor is cancelled.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.flag.load(Ordering::Acquire) {
            return true;
        }
        match &self.inner.parent {
            Some(p) => p.is_cancelled(),
            None => false,
        }
    }

    /// True if this token itself was cancelled, ignoring ancestors.
    /// Distinguishes health preemption (child only) from pause (parent).
    pub fn is_cancelled_directly(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cancel_propagates_to_children() {
        let root = CancelToken::new();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(!child.is_cancelled_directly());
    }

    #[test]
    fn child_cancel_does_not_affect_parent() {
        let root = CancelToken::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(child.is_cancelled_directly());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }
}
