//! Instance handles and the registry the host application kills on exit.
//!
//! The host owns one [`InstanceRegistry`]; every instance is bound to it as soon as its
//! process is spawned, so a shutdown while a launch is still probing kills that child
//! too. On exit the host calls [`InstanceRegistry::shutdown_all`]. A handle terminated
//! earlier (e.g. its window closed) is skipped by that pass.

use crate::port::PortLease;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::process::Child;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

/// Shared handle to one backend child process.
#[derive(Clone)]
pub struct InstanceHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    terminated: watch::Sender<bool>,
    lease: StdMutex<Option<PortLease>>,
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.inner.id)
            .field("pid", &self.inner.pid)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl InstanceHandle {
    /// Wrap a spawned child. `lease` is released once the child is terminated.
    pub fn new(id: Uuid, child: Child, lease: Option<PortLease>) -> Self {
        let (terminated, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                id,
                pid: child.id(),
                child: Mutex::new(Some(child)),
                terminated,
                lease: StdMutex::new(lease),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// OS process id captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn is_terminated(&self) -> bool {
        *self.inner.terminated.borrow()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called on any clone.
    pub async fn wait_terminated(&self) {
        let mut rx = self.inner.terminated.subscribe();
        let _ = rx.wait_for(|terminated| *terminated).await;
    }

    /// True if the child has exited on its own or was terminated. Reaps the child if it exited.
    pub async fn try_exited(&self) -> bool {
        let mut guard = self.inner.child.lock().await;
        let polled = match guard.as_mut() {
            None => return true,
            Some(child) => child.try_wait(),
        };
        match polled {
            Ok(Some(status)) => {
                log::info!("backend {} exited with {}", self.inner.id, status);
                *guard = None;
                self.release_port();
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::debug!("backend {} try_wait failed: {}", self.inner.id, e);
                false
            }
        }
    }

    /// Kill the child and wait for it to be reaped. Idempotent; an already-gone
    /// process is not an error. Every caller returns only after the child is reaped,
    /// including one that races an earlier call.
    pub async fn terminate(&self) {
        let mut guard = self.inner.child.lock().await;
        self.inner.terminated.send_replace(true);
        if let Some(mut child) = guard.take() {
            match child.kill().await {
                Ok(()) => log::info!("backend {} terminated", self.inner.id),
                Err(e) => log::debug!("backend {} already gone: {}", self.inner.id, e),
            }
        }
        drop(guard);
        self.release_port();
    }

    fn release_port(&self) {
        self.inner
            .lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Live instances owned by the host application, keyed by instance id.
#[derive(Clone, Default)]
pub struct InstanceRegistry {
    inner: Arc<RwLock<HashMap<Uuid, InstanceHandle>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: InstanceHandle) {
        let old = self.inner.write().await.insert(handle.id(), handle);
        if let Some(old) = old {
            old.terminate().await;
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<InstanceHandle> {
        self.inner.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<InstanceHandle> {
        self.inner.write().await.remove(&id)
    }

    pub async fn ids(&self) -> Vec<Uuid> {
        self.inner.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Terminate one instance early and drop it from the registry. Returns false if unknown.
    pub async fn terminate(&self, id: Uuid) -> bool {
        match self.remove(id).await {
            Some(handle) => {
                handle.terminate().await;
                true
            }
            None => false,
        }
    }

    /// Terminate every registered instance concurrently and empty the registry.
    pub async fn shutdown_all(&self) {
        let handles: Vec<InstanceHandle> = {
            let mut g = self.inner.write().await;
            g.drain().map(|(_, h)| h).collect()
        };
        if handles.is_empty() {
            return;
        }
        log::info!("terminating {} backend instance(s)", handles.len());
        join_all(handles.iter().map(|h| h.terminate())).await;
    }
}

/// Tie `handle` to the host's exit: it will be terminated by `registry.shutdown_all()`.
/// Called right after spawn, before readiness is known.
pub async fn bind_lifecycle(registry: &InstanceRegistry, handle: &InstanceHandle) {
    registry.register(handle.clone()).await;
}
