use crate::{
    Cursor, Dispatcher, Error, MarshalError,
    handles::{self, SqlResult},
    parameter::{Value, bind_all, marshal_parameters},
};
use log::debug;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use widestring::U16String;

/// An SQL statement, executed asynchronously.
///
/// Wraps one native statement handle and dispatches every driver call touching
/// it onto a worker thread of a [`Dispatcher`]. Each operation takes a
/// completion callback, which is invoked on the thread owning the dispatcher,
/// exactly once, with either the structured driver error or the operation's
/// payload.
///
/// Operations do not queue behind each other: issue only one operation per
/// statement at a time and wait for its completion before submitting the
/// next. The driver gives no guarantees for a statement handle used by two
/// calls at once, and this type does not serialize them for you.
pub struct Statement {
    handle: Arc<handles::Statement>,
    in_flight: Arc<AtomicUsize>,
}

impl Statement {
    /// Wraps a statement handle obtained from the connection management
    /// layer.
    pub fn new(handle: handles::Statement) -> Self {
        Self {
            handle: Arc::new(handle),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The underlying statement handle.
    pub fn handle(&self) -> &handles::Statement {
        &self.handle
    }

    /// Number of operations submitted on this statement whose completion has
    /// not finished yet. With the one-operation-at-a-time calling convention
    /// this is `0` or `1`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Sends the statement text to the data source for preparation. On
    /// success the callback receives `true`.
    pub fn prepare<F>(&self, dispatcher: &Dispatcher, statement_text: &str, on_complete: F)
    where
        F: FnOnce(Result<bool, Error>) + Send + 'static,
    {
        debug!("Preparing statement.");
        let statement_text = U16String::from_str(statement_text);
        self.submit(
            dispatcher,
            move |handle| handle.prepare(&statement_text),
            |_| true,
            on_complete,
        );
    }

    /// Executes the previously prepared statement, using the currently bound
    /// parameter values. On success the callback receives a [`Cursor`] over
    /// the result set.
    pub fn execute<F>(&self, dispatcher: &Dispatcher, on_complete: F)
    where
        F: FnOnce(Result<Cursor, Error>) + Send + 'static,
    {
        debug!("Executing prepared statement.");
        self.submit(dispatcher, |handle| handle.execute(), Cursor::new, on_complete);
    }

    /// Executes the statement text in a single round trip, without preparing
    /// it first. On success the callback receives a [`Cursor`] over the
    /// result set.
    pub fn execute_direct<F>(&self, dispatcher: &Dispatcher, statement_text: &str, on_complete: F)
    where
        F: FnOnce(Result<Cursor, Error>) + Send + 'static,
    {
        debug!("Executing statement directly.");
        let statement_text = U16String::from_str(statement_text);
        self.submit(
            dispatcher,
            move |handle| handle.exec_direct(&statement_text),
            Cursor::new,
            on_complete,
        );
    }

    /// Binds `values` to the parameter markers of the prepared statement, in
    /// order. On success the callback receives `true`.
    ///
    /// Values which cannot be represented natively are reported right here,
    /// before any work is submitted; the callback is not invoked in that
    /// case. A driver error stops the binding loop at the failing parameter.
    /// The native buffers of all values are released on the worker thread as
    /// soon as the binding loop finishes, bound or not.
    pub fn bind<F>(
        &self,
        dispatcher: &Dispatcher,
        values: &[Value],
        on_complete: F,
    ) -> Result<(), MarshalError>
    where
        F: FnOnce(Result<bool, Error>) + Send + 'static,
    {
        let mut parameters = marshal_parameters(values)?;
        debug!("Binding {} parameters.", parameters.len());
        self.submit(
            dispatcher,
            move |handle| {
                let status = bind_all(&mut parameters, |number, parameter| unsafe {
                    handle.bind_input_parameter(
                        number,
                        parameter.value_type(),
                        parameter.parameter_type(),
                        parameter.column_size(),
                        parameter.decimal_digits(),
                        parameter.value_ptr(),
                        parameter.buffer_length(),
                        parameter.indicator_ptr(),
                    )
                });
                drop(parameters);
                status
            },
            |_| true,
            on_complete,
        );
        Ok(())
    }

    /// Shared submission path of all operations.
    ///
    /// Acquires the keep alive guard, runs `work` against the statement
    /// handle on a worker thread, and completes on the dispatcher's owning
    /// thread: a recorded driver error is translated into an [`Error`] using
    /// the handle's diagnostics, success invokes `build_payload`. The
    /// callback sees exactly one of the two. The guard is released after the
    /// callback returns, also if it panics.
    fn submit<T, W, B, F>(
        &self,
        dispatcher: &Dispatcher,
        work: W,
        build_payload: B,
        on_complete: F,
    ) where
        T: 'static,
        W: FnOnce(&handles::Statement) -> SqlResult<()> + Send + 'static,
        B: FnOnce(Arc<handles::Statement>) -> T + Send + 'static,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let guard = OperationGuard::new(Arc::clone(&self.handle), Arc::clone(&self.in_flight));
        dispatcher.submit(
            move || {
                let status = work(guard.handle());
                (guard, status)
            },
            move |(guard, status)| {
                let result = status
                    .into_result(guard.handle())
                    .map(|()| build_payload(Arc::clone(guard.statement())));
                on_complete(result);
                drop(guard);
            },
        );
    }
}

/// Keeps the statement handle alive while an operation is outstanding.
///
/// Acquired once per submission, released exactly once when the completion
/// has run, independent of which completion branch executed.
struct OperationGuard {
    statement: Arc<handles::Statement>,
    in_flight: Arc<AtomicUsize>,
}

impl OperationGuard {
    fn new(statement: Arc<handles::Statement>, in_flight: Arc<AtomicUsize>) -> Self {
        in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            statement,
            in_flight,
        }
    }

    fn handle(&self) -> &handles::Statement {
        &self.statement
    }

    fn statement(&self) -> &Arc<handles::Statement> {
        &self.statement
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::Statement;
    use crate::{Cursor, Dispatcher, handles, handles::SqlResult};
    use odbc_sys::{HDbc, HEnv, HStmt};
    use std::{
        ptr::null_mut,
        sync::{
            Arc, Mutex,
            mpsc::channel,
        },
    };

    /// A statement without a native handle. Good enough for everything which
    /// does not reach the driver.
    fn statement() -> Statement {
        Statement::new(unsafe {
            handles::Statement::new(
                HEnv(null_mut()),
                HDbc(null_mut()),
                HStmt(null_mut()),
                0,
            )
        })
    }

    #[test]
    fn keep_alive_spans_the_asynchronous_gap() {
        let dispatcher = Dispatcher::new(1);
        let statement = statement();
        let (release, gate) = channel::<()>();

        statement.submit(
            &dispatcher,
            move |_| {
                gate.recv().unwrap();
                SqlResult::Success(())
            },
            |_| true,
            |_: Result<bool, _>| {},
        );

        // One outstanding operation holds exactly one extra reference.
        assert_eq!(1, statement.in_flight());
        assert_eq!(2, Arc::strong_count(&statement.handle));

        release.send(()).unwrap();
        assert!(dispatcher.wait_completion());

        assert_eq!(0, statement.in_flight());
        assert_eq!(1, Arc::strong_count(&statement.handle));
    }

    #[test]
    fn callback_receives_the_payload_exactly_once() {
        let dispatcher = Dispatcher::new(1);
        let statement = statement();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&outcomes);

        statement.submit(
            &dispatcher,
            |_| SqlResult::Success(()),
            |_| true,
            move |result: Result<bool, _>| {
                recorded.lock().unwrap().push(result.unwrap());
            },
        );
        while dispatcher.wait_completion() {}

        assert_eq!([true], outcomes.lock().unwrap().as_slice());
    }

    #[test]
    fn successful_execution_hands_the_handle_over_to_the_cursor() {
        let dispatcher = Dispatcher::new(1);
        let statement = statement();
        let cursors = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&cursors);

        statement.submit(
            &dispatcher,
            |_| SqlResult::Success(()),
            Cursor::new,
            move |result: Result<Cursor, _>| {
                recorded.lock().unwrap().push(result.unwrap());
            },
        );
        while dispatcher.wait_completion() {}

        // The cursor shares the handle; the keep alive guard is gone.
        assert_eq!(2, Arc::strong_count(&statement.handle));
        assert_eq!(0, statement.in_flight());
        drop(cursors.lock().unwrap().pop());
        assert_eq!(1, Arc::strong_count(&statement.handle));
    }

    #[test]
    fn guard_is_released_even_if_the_callback_panics() {
        let dispatcher = Dispatcher::new(1);
        let statement = statement();

        statement.submit(
            &dispatcher,
            |_| SqlResult::Success(()),
            |_| true,
            |_: Result<bool, _>| panic!("callback blew up"),
        );

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            while dispatcher.wait_completion() {}
        }));

        assert!(outcome.is_err());
        assert_eq!(0, statement.in_flight());
        assert_eq!(1, Arc::strong_count(&statement.handle));
    }
}
