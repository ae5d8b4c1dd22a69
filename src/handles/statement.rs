use super::{
    AsHandle, ExtSqlReturn, SqlChar, SqlResult, buffer::buf_ptr, driver_call_lock, drop_handle,
};
use odbc_sys::{
    CDataType, HDbc, HEnv, HStmt, Handle, HandleType, Len, ParamType, Pointer, SQLBindParameter,
    SQLExecDirectW, SQLExecute, SQLNumResultCols, SQLPrepareW, SqlDataType, SqlReturn, ULen,
};
use std::{
    ptr::null_mut,
    sync::atomic::{AtomicI16, Ordering},
};
use widestring::U16Str;

/// Wraps a valid (i.e. successfully allocated) ODBC statement handle,
/// together with the environment and connection handles it has been allocated
/// from and a scratch buffer for fetching column data.
///
/// All three native handles are allocated by the connection management layer
/// and passed in at construction. This type owns the statement handle and
/// frees it on drop; the environment and connection handles remain owned by
/// their allocator and are merely kept around, so diagnostics and result
/// construction can refer to them.
pub struct Statement {
    environment: HEnv,
    connection: HDbc,
    statement: HStmt,
    /// Scratch space for transferring column data out of the driver, sized
    /// once at construction. The fetch layer binds it to columns; this crate
    /// only manages its lifetime.
    row_buffer: Vec<SqlChar>,
    /// Number of columns in the current result set. Zero until the fetch
    /// layer has described the columns.
    column_count: AtomicI16,
}

/// The ODBC standard promises handles may be used from any thread, as long as
/// no two functions are called with the same handle concurrently. Callers of
/// this crate must not issue a second operation on a statement before the
/// first completed; beyond that, the only interior mutability reachable
/// through a shared reference is an atomic.
unsafe impl Send for Statement {}
unsafe impl Sync for Statement {}

impl Statement {
    /// Take ownership of a statement handle.
    ///
    /// `row_buffer_len` is the capacity (in wide characters) of the scratch
    /// buffer used by the fetch layer. It is allocated here, once.
    ///
    /// # Safety
    ///
    /// `statement` must be a valid (successfully allocated) statement handle,
    /// allocated on `connection`, which in turn must live on `environment`.
    /// Both outer handles must stay valid for the lifetime of this instance.
    pub unsafe fn new(
        environment: HEnv,
        connection: HDbc,
        statement: HStmt,
        row_buffer_len: usize,
    ) -> Self {
        Self {
            environment,
            connection,
            statement,
            row_buffer: vec![0; row_buffer_len],
            column_count: AtomicI16::new(0),
        }
    }

    /// The raw environment handle this statement has been allocated under.
    pub fn environment(&self) -> HEnv {
        self.environment
    }

    /// The raw connection handle this statement has been allocated under.
    pub fn connection(&self) -> HDbc {
        self.connection
    }

    /// The scratch buffer reserved for fetching column data.
    pub fn row_buffer(&self) -> &[SqlChar] {
        &self.row_buffer
    }

    /// Capacity of the scratch buffer in wide characters.
    pub fn row_buffer_capacity(&self) -> usize {
        self.row_buffer.capacity()
    }

    /// Number of columns of the current result set, or zero if no columns
    /// have been described yet.
    pub fn column_count(&self) -> i16 {
        self.column_count.load(Ordering::Relaxed)
    }

    /// Record the number of columns of the current result set. Called by the
    /// fetch layer once after describing the columns.
    pub fn set_column_count(&self, count: i16) {
        self.column_count.store(count, Ordering::Relaxed);
    }

    /// Send an SQL statement to the data source for preparation. The
    /// application can include one or more parameter markers in the SQL
    /// statement by embedding question marks (`?`) at the appropriate
    /// positions.
    pub fn prepare(&self, statement_text: &U16Str) -> SqlResult<()> {
        unsafe {
            SQLPrepareW(
                self.statement,
                buf_ptr(statement_text.as_slice()),
                statement_text.len().try_into().unwrap(),
            )
        }
        .into_sql_result("SQLPrepareW")
    }

    /// Execute a statement prepared by [`Self::prepare`], using the current
    /// values of any bound parameter markers.
    pub fn execute(&self) -> SqlResult<()> {
        match unsafe { SQLExecute(self.statement) } {
            // Searched update or delete statements may affect no rows at the
            // data source. The statement has still been executed.
            SqlReturn::NO_DATA => SqlResult::Success(()),
            other => other.into_sql_result("SQLExecute"),
        }
    }

    /// Execute a preparable statement in one round trip. This is the fastest
    /// way to submit an SQL statement for one-time execution.
    pub fn exec_direct(&self, statement_text: &U16Str) -> SqlResult<()> {
        let ret = unsafe {
            SQLExecDirectW(
                self.statement,
                buf_ptr(statement_text.as_slice()),
                statement_text.len().try_into().unwrap(),
            )
        };
        match ret {
            SqlReturn::NO_DATA => SqlResult::Success(()),
            other => other.into_sql_result("SQLExecDirectW"),
        }
    }

    /// Binds a buffer to an input parameter marker in an SQL statement.
    ///
    /// See <https://docs.microsoft.com/en-us/sql/odbc/reference/syntax/sqlbindparameter-function>.
    ///
    /// # Safety
    ///
    /// It is up to the caller to ensure `parameter_value_ptr` and
    /// `str_len_or_ind_ptr` remain valid while the driver may read them.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn bind_input_parameter(
        &self,
        parameter_number: u16,
        value_type: CDataType,
        parameter_type: SqlDataType,
        column_size: ULen,
        decimal_digits: i16,
        parameter_value_ptr: Pointer,
        buffer_length: Len,
        str_len_or_ind_ptr: *mut Len,
    ) -> SqlResult<()> {
        unsafe {
            SQLBindParameter(
                self.statement,
                parameter_number,
                ParamType::Input,
                value_type,
                parameter_type,
                column_size,
                decimal_digits,
                parameter_value_ptr,
                buffer_length,
                str_len_or_ind_ptr,
            )
        }
        .into_sql_result("SQLBindParameter")
    }

    /// Number of columns in the result set created by the last execution.
    pub fn num_result_cols(&self) -> SqlResult<i16> {
        let mut out = 0;
        unsafe { SQLNumResultCols(self.statement, &mut out) }
            .into_sql_result("SQLNumResultCols")
            .on_success(|| out)
    }

    /// Free the native statement handle and release the scratch buffer.
    ///
    /// Idempotent: calling this on a statement whose native handle has
    /// already been freed is a no-op. Freeing serializes on the process wide
    /// [`driver_call_lock`].
    pub fn free(&mut self) {
        if self.statement.0.is_null() {
            return;
        }
        {
            let _lock = driver_call_lock();
            unsafe {
                drop_handle(self.statement.as_handle(), HandleType::Stmt);
            }
            self.statement = HStmt(null_mut());
        }
        if self.row_buffer.capacity() > 0 {
            self.row_buffer = Vec::new();
        }
    }
}

unsafe impl AsHandle for Statement {
    fn as_handle(&self) -> Handle {
        self.statement.as_handle()
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Stmt
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::Statement;
    use odbc_sys::{HDbc, HEnv, HStmt};
    use std::ptr::null_mut;

    #[test]
    fn free_is_a_no_op_without_a_native_handle() {
        let mut statement = unsafe {
            Statement::new(HEnv(null_mut()), HDbc(null_mut()), HStmt(null_mut()), 256)
        };
        assert_eq!(256, statement.row_buffer_capacity());

        // No native handle to free, so neither handle nor scratch buffer are
        // touched, no matter how often we call this.
        statement.free();
        statement.free();

        assert_eq!(256, statement.row_buffer_capacity());
        // Dropping must not attempt to free the handle either.
    }

    #[test]
    fn column_count_starts_at_zero() {
        let statement =
            unsafe { Statement::new(HEnv(null_mut()), HDbc(null_mut()), HStmt(null_mut()), 0) };
        assert_eq!(0, statement.column_count());
        statement.set_column_count(5);
        assert_eq!(5, statement.column_count());
    }
}
