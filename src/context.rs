use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Cancellation flag guarded by a mutex and paired with a condition variable, used to
/// signal threads running an app or a status driver that they must finish.
#[derive(Debug, Default, Clone)]
pub struct Context(Arc<(Mutex<bool>, Condvar)>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation flag. All threads that are waiting on this [`Context`] are
    /// notified so they unblock and finish execution.
    pub fn cancel_all(&self) -> Result<(), PoisonError<MutexGuard<'_, bool>>> {
        let (lck, cvar) = &*self.0;
        *lck.lock()? = true;
        cvar.notify_all();
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        let (lck, _) = &*self.0;
        *lck.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the context is cancelled or `timeout` elapses, whichever comes first.
    /// Returns whether the context was cancelled.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        let (lck, cvar) = &*self.0;
        let guard = lck.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
