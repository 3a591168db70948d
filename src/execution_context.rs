//! Cancellation and completion barrier for background work owned by a client.
use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use crate::{Error, Result};

/// Shutdown coordinator a [`Client`](crate::Client) owns.
///
/// Collaborators that run background work (configuration refresh, event delivery) register it
/// against the context so that [`Client::close`](crate::Client::close) can stop it and wait for
/// it to drain.
pub trait ExecutionContext: Send + Sync {
    /// Broadcast cancellation and block until all registered work has finished.
    ///
    /// Calling this more than once must not block or panic.
    fn terminate_and_wait(&self);
}

/// Cancellation signal handed to background threads.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for up to `timeout` waiting for shutdown. Returns `true` if shutdown was requested.
    ///
    /// Meant as the sleep between iterations of a background loop.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.state;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _timeout) = condvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn trigger(&self) {
        let (lock, condvar) = &*self.state;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }
}

/// [`ExecutionContext`] running background work on named OS threads.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use expkit::{ExecutionContext, ThreadGroup};
/// let group = ThreadGroup::new();
/// group
///     .spawn("refresher", |signal| {
///         while !signal.wait_timeout(Duration::from_millis(10)) {
///             // refresh something
///         }
///     })
///     .unwrap();
/// group.terminate_and_wait();
/// ```
#[derive(Default)]
pub struct ThreadGroup {
    signal: ShutdownSignal,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadGroup {
    /// Create a group with no threads.
    pub fn new() -> Self {
        ThreadGroup::default()
    }

    /// Start a named thread running `f`. The thread should return soon after `signal` triggers.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientClosed`] if the group has already been terminated.
    /// - [`Error::Io`] if the thread could not be started.
    pub fn spawn<F>(&self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: FnOnce(ShutdownSignal) + Send + 'static,
    {
        // Holding the lock across the check orders spawning against `terminate_and_wait`.
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if self.signal.is_triggered() {
            return Err(Error::ClientClosed);
        }

        let signal = self.signal.clone();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || f(signal))?;
        handles.push(handle);
        Ok(())
    }

    /// A handle to this group's shutdown signal.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }
}

impl ExecutionContext for ThreadGroup {
    fn terminate_and_wait(&self) {
        self.signal.trigger();

        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        log::debug!(target: "expkit", threads = handles.len(); "waiting for background threads to finish");

        for handle in handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_owned();
            // Error means that the thread has panicked and there's nothing useful we can do in
            // that case.
            if handle.join().is_err() {
                log::warn!(target: "expkit", thread = name.as_str(); "background thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{ExecutionContext, ShutdownSignal, ThreadGroup};
    use crate::Error;

    #[test]
    fn terminate_waits_for_threads_to_drain() {
        let group = ThreadGroup::new();
        let drained = Arc::new(AtomicBool::new(false));

        {
            let drained = drained.clone();
            group
                .spawn("worker", move |signal| {
                    while !signal.wait_timeout(Duration::from_millis(5)) {}
                    // Simulate flushing after the signal.
                    std::thread::sleep(Duration::from_millis(20));
                    drained.store(true, Ordering::SeqCst);
                })
                .unwrap();
        }

        group.terminate_and_wait();
        assert!(drained.load(Ordering::SeqCst));
    }

    #[test]
    fn terminate_is_idempotent() {
        let group = ThreadGroup::new();
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            group
                .spawn("worker", move |_signal| {
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        group.terminate_and_wait();
        group.terminate_and_wait();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spawn_after_terminate_is_refused() {
        let group = ThreadGroup::new();
        group.terminate_and_wait();
        assert!(matches!(
            group.spawn("late", |_signal| {}),
            Err(Error::ClientClosed)
        ));
    }

    #[test]
    fn panicking_thread_does_not_poison_shutdown() {
        let group = ThreadGroup::new();
        group
            .spawn("panicky", |_signal| panic!("background failure"))
            .unwrap();
        group.terminate_and_wait();
        assert!(group.signal().is_triggered());
    }

    #[test]
    fn wait_timeout_returns_false_until_triggered() {
        let signal = ShutdownSignal::default();
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
        signal.trigger();
        assert!(signal.wait_timeout(Duration::from_secs(60)));
    }
}
