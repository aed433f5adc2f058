// Utility functions

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// =============================================================================
// Lock Helpers - critical sections here never leave state half-written, so a
// poisoned lock is recovered instead of propagating the panic.
// =============================================================================

/// Acquire a mutex, recovering the guard if a previous holder panicked.
pub fn lock_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e: PoisonError<_>| {
        log::warn!("Recovered poisoned mutex");
        e.into_inner()
    })
}

/// Acquire a read lock, recovering from poison.
pub fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| {
        log::warn!("Recovered poisoned read lock");
        e.into_inner()
    })
}

/// Acquire a write lock, recovering from poison.
pub fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| {
        log::warn!("Recovered poisoned write lock");
        e.into_inner()
    })
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
