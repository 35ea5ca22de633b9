//! Readers' gate held closed while a background refresh runs
//!
//! Advisory only: the token slot is still guarded by the manager's lock.
//! Readers that would rather see the post-refresh value wait here first.

use tokio::sync::watch;

/// Open/closed flag readers can wait on
#[derive(Debug)]
pub struct RefreshGate {
    open: watch::Sender<bool>,
}

impl RefreshGate {
    /// Create an open gate
    #[must_use]
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    /// Close the gate until the returned guard drops
    #[must_use = "the gate reopens as soon as the guard is dropped"]
    pub fn close(&self) -> GateGuard<'_> {
        self.open.send_replace(false);
        GateGuard { gate: self }
    }

    /// Whether readers may proceed right now
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until the gate is open
    pub async fn wait_open(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }

    fn reopen(&self) {
        self.open.send_replace(true);
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Reopens the gate on drop
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a RefreshGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.reopen();
    }
}
