//! Locks shared between the render thread and faulting threads.
//!
//! Loom test builds swap in loom's model-checked equivalents.

#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::{
    atomic::AtomicU64, Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::{
    atomic::AtomicU64, Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};

use std::sync::PoisonError;

/// Lock `mutex`, recovering the guard if a holder panicked.
///
/// Every critical section in this crate leaves the protected state consistent before any call
/// that can panic, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}
