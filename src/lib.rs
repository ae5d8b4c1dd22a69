//! # ODBC statement dispatch
//!
//! Asynchronous execution of ODBC statements. This library takes a statement
//! handle allocated by a connection management layer and runs the driver
//! calls which prepare it, bind parameters to it and execute it on a worker
//! thread pool. A structured result or error is delivered back onto the
//! single thread driving the [`Dispatcher`], via a completion callback which
//! fires exactly once per operation.
//!
//! What this library does not do: establish connections, fetch rows (a
//! [`Cursor`] hands the executed statement over to whatever fetch layer sits
//! on top), parse SQL, pool connections or manage transactions.
//!
//! Callers must not issue a second operation on the same [`Statement`] before
//! the first one completed. Completions are delivered in the order the driver
//! calls finished, not in submission order.

mod cursor;
mod dispatcher;
mod error;
mod parameter;
mod statement;

pub mod handles;

pub use self::{
    cursor::Cursor,
    dispatcher::Dispatcher,
    error::{Error, MarshalError},
    parameter::{Bit, Indicator, ParameterDescriptor, Value, marshal_parameters},
    statement::Statement,
};
// Reexports
/// Reexports `odbc-sys` as sys to enable applications to always use the same
/// version as this crate.
pub use odbc_sys as sys;
pub use widestring::{U16Str, U16String};
