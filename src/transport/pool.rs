//! Task pool running channel listeners.
//!
//! One pool is created by the owning service and shared by every channel.
//! Each listener task owns its channel's read half exclusively.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              ListenerPool               │
//! │  ┌─────────────────────────────────┐    │
//! │  │ ChannelId=1 → listener task     │    │
//! │  │ ChannelId=2 → listener task     │    │
//! │  │ ChannelId=3 → listener task     │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

// ============================================================================
// ListenerPool
// ============================================================================

/// Runs and tracks channel listener tasks.
///
/// The runtime handle is captured on first use, so a pool may be built
/// outside a runtime and used inside one later.
pub struct ListenerPool {
    /// Runtime the listeners run on.
    handle: Mutex<Option<Handle>>,

    /// Listener tasks by channel.
    tasks: Mutex<FxHashMap<ChannelId, JoinHandle<()>>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

impl Default for ListenerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerPool")
            .field("active", &self.active_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl ListenerPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            tasks: Mutex::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Creates a pool bound to a specific runtime.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
            ..Self::new()
        }
    }

    /// Spawns the listener of `channel_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelConstruction`] if the pool is shut down or no
    ///   runtime is available
    pub fn spawn<F>(&self, channel_id: ChannelId, listener: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(Error::channel_construction("listener pool is shut down"));
        }

        let handle = self.runtime_handle()?;

        let mut tasks = self.tasks.lock();
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(channel_id, handle.spawn(listener));

        debug!(channel_id = %channel_id, active = tasks.len(), "Listener started");
        Ok(())
    }

    /// Returns the number of listeners still running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops accepting listeners and aborts the ones still running.
    ///
    /// Channels should be closed first; aborted listeners do not report a
    /// final state.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        let mut aborted = 0;
        for (_, task) in tasks {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }

        info!(aborted, "ListenerPool shut down");
    }

    fn runtime_handle(&self) -> Result<Handle> {
        let mut handle = self.handle.lock();
        if let Some(handle) = handle.as_ref() {
            return Ok(handle.clone());
        }

        let current = Handle::try_current()
            .map_err(|e| Error::channel_construction(format!("no async runtime: {e}")))?;
        *handle = Some(current.clone());
        Ok(current)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_spawn_runs_listener() {
        let pool = ListenerPool::new();
        let (tx, rx) = oneshot::channel();

        pool.spawn(ChannelId::next(), async move {
            let _ = tx.send(42);
        })
        .expect("spawn");

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_fails() {
        let pool = ListenerPool::new();
        pool.shutdown();

        let err = pool.spawn(ChannelId::next(), async {}).unwrap_err();
        assert!(matches!(err, Error::ChannelConstruction { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_running_listeners() {
        let pool = ListenerPool::new();
        pool.spawn(ChannelId::next(), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .expect("spawn");

        assert_eq!(pool.active_count(), 1);
        pool.shutdown();
        assert_eq!(pool.active_count(), 0);
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let pool = ListenerPool::new();
        let err = pool.spawn(ChannelId::next(), async {}).unwrap_err();
        assert!(matches!(err, Error::ChannelConstruction { .. }));
    }
}
