use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// Process-wide gate coordinating access to the shared task state cache.
///
/// Two independent scopes:
/// - a *long-running session* spans a whole execution run and does not
///   serialize against anything;
/// - an *exclusive-use region* wraps a single task's execution, and at most
///   one such region is active at any instant across all workers.
///
/// Both scopes are released on every exit path, including errors and
/// cancellation, via guard semantics.
pub struct StateCacheAccess {
    exclusive: tokio::sync::Mutex<()>,
    open_sessions: AtomicUsize,
    holder: Mutex<Option<String>>,
}

impl Default for StateCacheAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateCacheAccess {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StateCacheAccess")
            .field("open_sessions", &self.open_sessions())
            .field("current_holder", &self.current_holder())
            .finish()
    }
}

impl StateCacheAccess {
    pub fn new() -> Self {
        Self {
            exclusive: tokio::sync::Mutex::new(()),
            open_sessions: AtomicUsize::new(0),
            holder: Mutex::new(None),
        }
    }

    /// Run `work` inside a long-running cache session.
    ///
    /// Sessions are compatible with exclusive-use regions running inside
    /// them and with other concurrent sessions.
    pub async fn long_running_session<F, Fut, T>(&self, label: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        debug!(label, "opening long-running cache session");
        let _guard = SessionGuard::open(self);
        work().await
    }

    /// Run `work` with exclusive use of the cache.
    ///
    /// Blocks until no other exclusive-use region is active anywhere in the
    /// process.
    pub async fn exclusive<F, Fut, T>(&self, label: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        debug!(label, "waiting for exclusive cache access");
        let _lock = self.exclusive.lock().await;
        debug!(label, "exclusive cache access acquired");
        let _holder = HolderGuard::set(self, label);
        work().await
    }

    /// Number of currently open long-running sessions
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    /// Label of the exclusive-use region currently active, if any
    pub fn current_holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct SessionGuard<'a> {
    access: &'a StateCacheAccess,
}

impl<'a> SessionGuard<'a> {
    fn open(access: &'a StateCacheAccess) -> Self {
        access.open_sessions.fetch_add(1, Ordering::AcqRel);
        Self { access }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.access.open_sessions.fetch_sub(1, Ordering::AcqRel);
        debug!("long-running cache session closed");
    }
}

struct HolderGuard<'a> {
    access: &'a StateCacheAccess,
}

impl<'a> HolderGuard<'a> {
    fn set(access: &'a StateCacheAccess, label: &str) -> Self {
        *access
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(label.to_string());
        Self { access }
    }
}

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        *self
            .access
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        debug!("exclusive cache access released");
    }
}
