//! Process-wide set of live clients.
//!
//! Every client registers itself at construction and unregisters on explicit
//! close. On shutdown (ctrl-c) the registry closes whatever is still alive
//! and then ends the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::Result;

/// Exit status after a ctrl-c shutdown (128 + SIGINT).
pub const SHUTDOWN_EXIT_CODE: i32 = 130;

static GLOBAL_REGISTRY: Lazy<Arc<InstanceRegistry>> = Lazy::new(|| Arc::new(InstanceRegistry::new()));

/// Something the registry can close on shutdown.
#[async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// Registry of live clients, held by weak reference.
#[derive(Default)]
pub struct InstanceRegistry {
    entries: Mutex<HashMap<u64, Weak<dyn Closeable>>>,
    next_id: AtomicU64,
    hook_installed: AtomicBool,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("live", &self.len())
            .field("hook_installed", &self.hook_installed.load(Ordering::SeqCst))
            .finish()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`crate::create_client`].
    pub fn global() -> Arc<InstanceRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register an instance and return its id. Entries of dropped
    /// instances are pruned here.
    pub fn register(&self, instance: Weak<dyn Closeable>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut entries = self.entries.lock();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(id, instance);
        id
    }

    pub fn unregister(&self, id: u64) {
        self.entries.lock().remove(&id);
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of registered instances that are still alive.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every live instance. Returns how many were closed.
    ///
    /// Failures are logged and do not stop the sweep.
    pub async fn close_all(&self) -> usize {
        let live: Vec<(u64, Arc<dyn Closeable>)> = {
            let mut entries = self.entries.lock();
            entries.retain(|_, weak| weak.strong_count() > 0);
            entries
                .iter()
                .filter_map(|(id, weak)| weak.upgrade().map(|instance| (*id, instance)))
                .collect()
        };

        let mut closed = 0;
        for (id, instance) in live {
            match instance.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!(instance = id, error = %e, "Failed to close client during shutdown"),
            }
            self.unregister(id);
        }
        debug!(closed, "Closed registered clients");
        closed
    }

    /// Spawn a one-shot ctrl-c watcher that calls [`close_all`](Self::close_all)
    /// and then exits with [`SHUTDOWN_EXIT_CODE`].
    ///
    /// Listening for ctrl-c replaces the default SIGINT action, so the hook
    /// has to terminate the process itself once the clients are closed.
    ///
    /// Installed at most once per registry, and only when called from inside
    /// a tokio runtime. Returns true if this call installed the hook.
    pub fn install_shutdown_hook(self: &Arc<Self>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        if self.hook_installed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let registry = Arc::downgrade(self);
        handle.spawn(async move {
            let signal = async { tokio::signal::ctrl_c().await.is_ok() };
            if let Some(code) = shutdown_after(registry, signal).await {
                std::process::exit(code);
            }
        });
        true
    }
}

/// Wait for `signal`, close every live client and return the exit status.
///
/// `None` when the signal handler could not be installed.
async fn shutdown_after<F>(registry: Weak<InstanceRegistry>, signal: F) -> Option<i32>
where
    F: Future<Output = bool>,
{
    if !signal.await {
        warn!("Could not listen for ctrl-c, shutdown hook disabled");
        return None;
    }
    if let Some(registry) = registry.upgrade() {
        info!("Shutdown signal received, closing clients");
        registry.close_all().await;
    }
    Some(SHUTDOWN_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl Closeable for Counter {
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            closes: AtomicUsize::new(0),
        })
    }

    fn weak(instance: &Arc<Counter>) -> Weak<dyn Closeable> {
        let instance: Arc<dyn Closeable> = instance.clone();
        Arc::downgrade(&instance)
    }

    #[tokio::test]
    async fn test_close_all_closes_live_instances() {
        let registry = InstanceRegistry::new();
        let a = counter();
        let b = counter();
        let id_a = registry.register(weak(&a));
        registry.register(weak(&b));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.close_all().await, 2);
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(id_a));
    }

    #[tokio::test]
    async fn test_unregistered_instance_is_skipped() {
        let registry = InstanceRegistry::new();
        let a = counter();
        let id = registry.register(weak(&a));
        registry.unregister(id);

        assert_eq!(registry.close_all().await, 0);
        assert_eq!(a.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_instance_is_pruned() {
        let registry = InstanceRegistry::new();
        let a = counter();
        registry.register(weak(&a));
        drop(a);

        assert!(registry.is_empty());
        assert_eq!(registry.close_all().await, 0);
    }

    #[test]
    fn test_hook_requires_runtime() {
        let registry = Arc::new(InstanceRegistry::new());
        assert!(!registry.install_shutdown_hook());
    }

    #[tokio::test]
    async fn test_hook_installed_once() {
        let registry = Arc::new(InstanceRegistry::new());
        assert!(registry.install_shutdown_hook());
        assert!(!registry.install_shutdown_hook());
    }

    #[tokio::test]
    async fn test_register_prunes_dropped_instances() {
        let registry = InstanceRegistry::new();
        for _ in 0..3 {
            let gone = counter();
            registry.register(weak(&gone));
        }
        let live = counter();
        registry.register(weak(&live));

        assert_eq!(registry.entries.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients_then_reports_exit_code() {
        let registry = Arc::new(InstanceRegistry::new());
        let a = counter();
        registry.register(weak(&a));

        let code = shutdown_after(Arc::downgrade(&registry), async { true }).await;

        assert_eq!(code, Some(SHUTDOWN_EXIT_CODE));
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_without_signal_handler_keeps_clients() {
        let registry = Arc::new(InstanceRegistry::new());
        let a = counter();
        registry.register(weak(&a));

        assert_eq!(shutdown_after(Arc::downgrade(&registry), async { false }).await, None);
        assert_eq!(a.closes.load(Ordering::SeqCst), 0);
    }
}
