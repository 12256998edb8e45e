//! # Utilities Module
//!
//! Small helpers shared by the rooms and live modules: client identification
//! for the join handshake and a poison-tolerant mutex lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifier sent with every room join: `<hostname>-<uuid>`.
///
/// The hostname makes server-side logs readable; the UUID keeps two pages on
/// the same workstation apart.
pub fn client_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}-{}", host, uuid::Uuid::new_v4().simple())
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
///
/// The state guarded in this crate stays consistent between statements, so a
/// poisoned lock carries no half-written data worth refusing.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
