use thiserror::Error as ThisError;

use crate::handles::{Diagnostics, Record as DiagnosticRecord, SqlResult, log_diagnostics};

/// Error type used to indicate that a driver call returned with SQL_ERROR.
#[derive(Debug, ThisError)]
pub enum Error {
    /// SQL error had been returned by a low level ODBC function call. A
    /// diagnostic record is obtained and associated with this error.
    #[error("ODBC emitted an error calling '{function}':\n{record}")]
    Diagnostics {
        /// Diagnostic record returned by the ODBC driver manager
        record: DiagnosticRecord,
        /// ODBC API call which produced the diagnostic record
        function: &'static str,
    },
    /// This should never happen, given that ODBC driver manager and ODBC
    /// driver do not have any bugs. Since we may link against a bunch of
    /// these, better to be on the safe side.
    #[error(
        "No diagnostics available. The ODBC function call to {function} returned an error, but \
        neither the ODBC driver manager nor the driver were polite enough to leave a diagnostic \
        record specifying what exactly went wrong."
    )]
    NoDiagnostics {
        /// ODBC API call which returned an error without producing a
        /// diagnostic record.
        function: &'static str,
    },
}

/// A caller supplied parameter value cannot be converted into a native
/// parameter buffer. Reported synchronously at the call site, before any
/// asynchronous work is submitted.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum MarshalError {
    /// Text values are declared to the driver with their length. A length
    /// that does not fit the ODBC length types cannot be declared.
    #[error(
        "Parameter {index} is a text value of {length} bytes, which is too long to declare to \
        the ODBC driver."
    )]
    TextTooLong {
        /// Zero based index of the value in the caller supplied list.
        index: usize,
        /// Length of the text value in bytes.
        length: usize,
    },
}

impl<T> SqlResult<T> {
    /// [`SqlResult::Success`] and [`SqlResult::SuccessWithInfo`] are mapped
    /// to `Ok`. In case of [`SqlResult::SuccessWithInfo`] any diagnostics are
    /// logged. [`SqlResult::Error`] is translated into a structured error by
    /// reading the diagnostics chain of `handle`, which must be the handle
    /// the failing call had been made with.
    pub fn into_result(self, handle: &(impl Diagnostics + ?Sized)) -> Result<T, Error> {
        match self {
            SqlResult::Success(value) => Ok(value),
            SqlResult::SuccessWithInfo(value) => {
                log_diagnostics(handle);
                Ok(value)
            }
            SqlResult::Error { function } => {
                let mut record = DiagnosticRecord::with_capacity(512);
                if record.fill_from(handle, 1) {
                    log_diagnostics(handle);
                    Err(Error::Diagnostics { record, function })
                } else {
                    // Anecdotal ways to reach this code path include
                    // specifying drivers with missing shared dependencies.
                    Err(Error::NoDiagnostics { function })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, MarshalError};
    use crate::handles::{DiagnosticResult, Diagnostics, SqlChar, SqlResult, State};
    use std::cmp::min;

    /// Yields one fabricated diagnostic record.
    struct SingleRecord {
        state: State,
        message: &'static str,
    }

    impl Diagnostics for SingleRecord {
        fn diagnostic_record(
            &self,
            rec_number: i16,
            message_text: &mut [SqlChar],
        ) -> Option<DiagnosticResult> {
            if rec_number > 1 {
                return None;
            }
            let encoded: Vec<u16> = self.message.encode_utf16().collect();
            let len = min(encoded.len(), message_text.len());
            message_text[..len].copy_from_slice(&encoded[..len]);
            Some(DiagnosticResult {
                state: self.state,
                native_error: 42,
                text_length: encoded.len().try_into().unwrap(),
            })
        }
    }

    /// A handle without any diagnostics, as some buggy drivers leave them.
    struct NoRecord;

    impl Diagnostics for NoRecord {
        fn diagnostic_record(
            &self,
            _rec_number: i16,
            _message_text: &mut [SqlChar],
        ) -> Option<DiagnosticResult> {
            None
        }
    }

    #[test]
    fn success_passes_value_through() {
        let result = SqlResult::Success(5).into_result(&NoRecord);
        assert_eq!(5, result.unwrap());
    }

    #[test]
    fn error_is_translated_into_diagnostics() {
        let handle = SingleRecord {
            state: State(*b"42000"),
            message: "Syntax error or access violation",
        };

        let result: Result<(), _> = SqlResult::Error {
            function: "SQLExecDirectW",
        }
        .into_result(&handle);

        match result {
            Err(Error::Diagnostics { record, function }) => {
                assert_eq!("SQLExecDirectW", function);
                assert_eq!("42000", record.state.as_str());
                assert_eq!(42, record.native_error);
                assert!(record.to_string().contains("Syntax error"));
            }
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn error_without_record_is_reported_as_such() {
        let result: Result<(), _> = SqlResult::Error {
            function: "SQLExecute",
        }
        .into_result(&NoRecord);

        match result {
            Err(Error::NoDiagnostics { function }) => assert_eq!("SQLExecute", function),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn marshal_error_names_the_parameter() {
        let error = MarshalError::TextTooLong {
            index: 3,
            length: 70_000,
        };
        assert!(error.to_string().contains("Parameter 3"));
    }
}
