use super::{
    AsHandle, SqlChar,
    buffer::{clamp_small_int, mut_buf_ptr},
};
use odbc_sys::{SQLGetDiagRecW, SQLSTATE_SIZE, SqlReturn};
use std::fmt;
use widestring::U16Str;

/// A buffer large enough to hold an SQLSTATE for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(pub [u8; SQLSTATE_SIZE]);

impl State {
    /// Drops the terminating zero and narrows the character type.
    /// `SQLGetDiagRecW` returns the state as wide characters, yet the ODBC
    /// standard guarantees it consists of ASCII characters only.
    pub fn from_chars_with_nul(code: &[SqlChar; SQLSTATE_SIZE + 1]) -> Self {
        let mut ascii = [0; SQLSTATE_SIZE];
        for (index, letter) in code[..SQLSTATE_SIZE].iter().copied().enumerate() {
            ascii[index] = letter as u8;
        }
        State(ascii)
    }

    /// View the state as a string slice for displaying. Must always succeed
    /// as ODBC status codes always consist of ASCII characters.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap()
    }
}

/// Header fields of one diagnostic record, as filled by `SQLGetDiagRec`.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticResult {
    /// A five-character SQLSTATE code for the record. The first two
    /// characters indicate the class; the next three indicate the subclass.
    pub state: State,
    /// Native error code specific to the data source.
    pub native_error: i32,
    /// The length of the diagnostic message reported by ODBC (excluding the
    /// terminating zero).
    pub text_length: i16,
}

/// Report diagnostics from the last call to an ODBC function using a handle.
pub trait Diagnostics {
    /// Retrieve one diagnostic record for the last call to an ODBC function
    /// with this handle.
    ///
    /// # Arguments
    ///
    /// * `rec_number` - Indicates the status record from which the
    ///   application seeks information. Status records are numbered from 1.
    /// * `message_text` - Buffer in which to return the diagnostic message
    ///   text. If the message is longer than the buffer it is truncated;
    ///   compare the buffer length with [`DiagnosticResult::text_length`] to
    ///   detect truncation.
    ///
    /// # Result
    ///
    /// `None` if `rec_number` is greater than the number of diagnostic
    /// records that exist for the handle.
    fn diagnostic_record(
        &self,
        rec_number: i16,
        message_text: &mut [SqlChar],
    ) -> Option<DiagnosticResult>;

    /// Like [`Self::diagnostic_record`], but if the message does not fit in
    /// the buffer, the buffer is grown and the record extracted again.
    fn diagnostic_record_vec(
        &self,
        rec_number: i16,
        message_text: &mut Vec<SqlChar>,
    ) -> Option<DiagnosticResult> {
        // Use all the memory available in the buffer, but don't allocate any
        // extra.
        let cap = message_text.capacity();
        message_text.resize(cap, 0);

        self.diagnostic_record(rec_number, message_text)
            .map(|mut result| {
                let mut text_length: usize = result.text_length.try_into().unwrap();

                if text_length > message_text.len() {
                    // Resize with +1 to account for the terminating zero.
                    message_text.resize(text_length + 1, 0);
                    // Call diagnostics again with the larger buffer. Should be
                    // a success this time if the driver isn't buggy.
                    result = self.diagnostic_record(rec_number, message_text).unwrap();
                }

                // Some drivers pad the message with null-chars (which is
                // still a valid C string, but not a valid Rust string).
                while text_length > 0 && message_text[text_length - 1] == 0 {
                    text_length -= 1;
                }
                // Resize the Vec to hold exactly the message.
                message_text.resize(text_length, 0);

                result
            })
    }
}

impl<T: AsHandle + ?Sized> Diagnostics for T {
    fn diagnostic_record(
        &self,
        rec_number: i16,
        message_text: &mut [SqlChar],
    ) -> Option<DiagnosticResult> {
        // Diagnostic records in ODBC are indexed starting with 1.
        assert!(rec_number > 0);

        // The total number of characters (excluding the terminating NULL)
        // available to return in `message_text`.
        let mut text_length = 0;
        let mut state = [0; SQLSTATE_SIZE + 1];
        let mut native_error = 0;
        let ret = unsafe {
            SQLGetDiagRecW(
                self.handle_type(),
                self.as_handle(),
                rec_number,
                state.as_mut_ptr(),
                &mut native_error,
                mut_buf_ptr(message_text),
                clamp_small_int(message_text.len()),
                &mut text_length,
            )
        };

        let result = DiagnosticResult {
            state: State::from_chars_with_nul(&state),
            native_error,
            text_length,
        };

        match ret {
            SqlReturn::SUCCESS | SqlReturn::SUCCESS_WITH_INFO => Some(result),
            SqlReturn::NO_DATA => None,
            SqlReturn::ERROR => panic!("rec_number argument of diagnostics must be > 0."),
            unexpected => panic!("SQLGetDiagRecW returned: {unexpected:?}"),
        }
    }
}

/// ODBC diagnostic record.
///
/// The error code, native state and message of one entry in the diagnostics
/// chain of a handle. Use `std::fmt::Display` to render all three.
#[derive(Default)]
pub struct Record {
    /// Five letter ODBC state code, e.g. `42000` for a syntax error.
    pub state: State,
    /// Error code returned by the driver manager or driver.
    pub native_error: i32,
    /// Buffer containing the wide encoded error message. The buffer already
    /// has the correct size, there is no terminating zero at the end.
    pub message: Vec<SqlChar>,
}

impl Record {
    /// Creates an empty diagnostic record with at least the specified
    /// capacity for the message. A size different from zero may save a second
    /// call to `SQLGetDiagRec` when filling the record.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            message: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Fill this record from any ODBC handle.
    ///
    /// # Return
    ///
    /// `true` if a record has been found, `false` if not.
    pub fn fill_from(&mut self, handle: &(impl Diagnostics + ?Sized), record_number: i16) -> bool {
        match handle.diagnostic_record_vec(record_number, &mut self.message) {
            Some(result) => {
                self.state = result.state;
                self.native_error = result.native_error;
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = U16Str::from_slice(&self.message).to_string_lossy();

        write!(
            f,
            "State: {}, Native error: {}, Message: {}",
            self.state.as_str(),
            self.native_error,
            message,
        )
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, State};
    use widestring::U16String;

    #[test]
    fn formatting() {
        let message =
            U16String::from_str("[Microsoft][ODBC Driver Manager] Function sequence error")
                .into_vec();
        let rec = Record {
            state: State(*b"HY010"),
            message,
            ..Record::default()
        };

        assert_eq!(
            format!("{rec}"),
            "State: HY010, Native error: 0, Message: [Microsoft][ODBC Driver Manager] \
             Function sequence error"
        );
    }

    #[test]
    fn state_from_wide_chars() {
        let wide: [u16; 6] = [b'0' as u16, b'1' as u16, b'0' as u16, b'0' as u16, b'4' as u16, 0];
        let state = State::from_chars_with_nul(&wide);
        assert_eq!(state.as_str(), "01004");
    }
}
