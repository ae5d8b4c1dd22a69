//! Provides basic abstraction over valid (i.e. allocated) ODBC handles.
//!
//! Two decisions are already baked into this module:
//!
//! * Treat warnings by logging them with `log`.
//! * Use the Unicode (wide) variants of the ODBC API for statement text and
//!   diagnostics.

mod buffer;
mod diagnostics;
mod logging;
mod sql_result;
mod statement;

pub use {
    diagnostics::{DiagnosticResult, Diagnostics, Record, State},
    logging::log_diagnostics,
    sql_result::{ExtSqlReturn, SqlResult},
    statement::Statement,
};

use odbc_sys::{Handle, HandleType, SQLFreeHandle, SqlReturn};
use std::{
    sync::{Mutex, MutexGuard},
    thread::panicking,
};

/// Character type used in wide ODBC function calls.
pub type SqlChar = u16;

/// Serializes allocation and freeing of statement handles across the entire
/// process. ODBC driver managers give no guarantee that handle management is
/// safe to call concurrently, even for handles sharing an environment, so
/// every such call in this crate takes this lock first. The lock is coarse on
/// purpose.
static DRIVER_CALL_LOCK: Mutex<()> = Mutex::new(());

/// Acquire the process wide lock guarding statement handle allocation and
/// release.
pub fn driver_call_lock() -> MutexGuard<'static, ()> {
    match DRIVER_CALL_LOCK.lock() {
        Ok(guard) => guard,
        // A thread panicked while holding the lock. The lock guards no state
        // of our own, so we may keep going.
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Provides access to the raw underlying ODBC handle.
///
/// # Safety
///
/// The handle provided by `as_handle` must be valid and match the type
/// returned by `handle_type`.
pub unsafe trait AsHandle {
    /// The raw underlying ODBC handle used to talk to the ODBC C API. The
    /// handle must be valid.
    fn as_handle(&self) -> Handle;

    /// The type of the ODBC handle returned by `as_handle`. This is a method
    /// rather than a constant in order to make the trait object safe.
    fn handle_type(&self) -> HandleType;
}

/// Helper function freeing a handle and panicking on errors. Yet if the drop
/// is triggered during another panic, the function will simply ignore errors
/// from failed drops.
///
/// # Safety
///
/// `handle` must be valid and match `handle_type`. For statement handles the
/// caller must hold the [`driver_call_lock`].
unsafe fn drop_handle(handle: Handle, handle_type: HandleType) {
    match unsafe { SQLFreeHandle(handle_type, handle) } {
        SqlReturn::SUCCESS => (),
        other => {
            // Avoid panicking, if we already have a panic. We don't want to
            // mask the original error.
            if !panicking() {
                panic!("Unexpected return value of SQLFreeHandle: {other:?}")
            }
        }
    }
}
