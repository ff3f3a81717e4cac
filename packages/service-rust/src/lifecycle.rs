//! Observable service lifecycle state.
//!
//! Uses `ArcSwap` for lock-free reads of the current state and a `watch`
//! channel so callers can await transitions.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// State machine: Unstarted -> Initialized -> Running -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, one-time initialisation not yet run.
    Unstarted,
    /// Flags, plugins and store table applied.
    Initialized,
    /// Server started and after-start hooks succeeded.
    Running,
    /// `stop` has completed, successfully or not.
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unstarted => "unstarted",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: Arc<ArcSwap<LifecycleState>>,
    notify: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Unstarted);
        Self {
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Unstarted)),
            notify: tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    pub fn set(&self, next: LifecycleState) {
        self.state.store(Arc::new(next));
        self.notify.send_replace(next);
    }

    /// Shared read handle for health reporting.
    #[must_use]
    pub fn state_handle(&self) -> Arc<ArcSwap<LifecycleState>> {
        Arc::clone(&self.state)
    }

    /// Receiver that observes every subsequent transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.notify.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unstarted() {
        assert_eq!(Lifecycle::new().state(), LifecycleState::Unstarted);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.set(LifecycleState::Running);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Running);
        assert_eq!(lifecycle.state(), LifecycleState::Running);
    }
}
