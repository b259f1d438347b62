//! Run-once release callbacks for process exit.
//!
//! Whoever acquires a device registers a release callback here. The binary runs
//! the sequence on every exit path: normal completion, SIGINT/SIGTERM, and a
//! panic caught at the top of `main`. Callbacks run in reverse registration
//! order and the sequence runs at most once; later calls are no-ops.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct Inner {
    callbacks: Mutex<Vec<(String, ReleaseFn)>>,
    ran: AtomicBool,
}

/// Ordered set of release callbacks shared across the process.
#[derive(Clone, Default)]
pub struct ShutdownSequence {
    inner: Arc<Inner>,
}

impl ShutdownSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback. Ignored (with a warning) once the sequence has run.
    pub fn register<F, Fut>(&self, name: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.inner.ran.load(Ordering::SeqCst) {
            warn!(callback = %name, "Shutdown already ran; release callback ignored");
            return;
        }
        debug!(callback = %name, "Registered release callback");
        self.lock().push((name, Box::new(move || Box::pin(release()))));
    }

    pub fn has_run(&self) -> bool {
        self.inner.ran.load(Ordering::SeqCst)
    }

    /// Callbacks registered and not yet run.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run every registered callback once. Returns how many ran.
    pub async fn run(&self) -> usize {
        if self.inner.ran.swap(true, Ordering::SeqCst) {
            debug!("Shutdown sequence already ran");
            return 0;
        }

        let callbacks = std::mem::take(&mut *self.lock());
        let count = callbacks.len();
        for (name, release) in callbacks.into_iter().rev() {
            info!(callback = %name, "Running release callback");
            release().await;
        }
        info!(count, "Shutdown sequence complete");
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, ReleaseFn)>> {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
