use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Capture loop iterations may panic inside external detectors; the shared
/// state they guard is still consistent because it is only ever replaced
/// wholesale.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Like [`lock`], but `None` while another thread holds the mutex.
pub(crate) fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}
