//! Conversion of dynamically typed caller values into native parameter
//! buffers, ready to be bound to the parameter markers of a statement.

use crate::{error::MarshalError, handles::SqlResult};
use odbc_sys::{CDataType, Len, NULL_DATA, Pointer, SqlDataType, ULen};
use std::{mem::size_of, ptr::null_mut};

/// New type wrapping u8 and binding as SQL_BIT.
///
/// If Rust would guarantee the representation of `bool` to be an `u8`, `bool`
/// would be the obvious choice instead. Alas it is not and someday on some
/// platform `bool` might be something else than a `u8`, so let's use this new
/// type instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd)]
pub struct Bit(pub u8);

impl Bit {
    /// Maps `true` to `1` and `false` to `0`.
    pub fn from_bool(boolean: bool) -> Self {
        if boolean { Bit(1) } else { Bit(0) }
    }

    /// Maps `1` to `true`, `0` to `false`. Panics if `Bit` should be invalid
    /// (not `0` or `1`).
    pub fn as_bool(self) -> bool {
        match self.0 {
            0 => false,
            1 => true,
            _ => panic!("Invalid boolean representation in Bit."),
        }
    }
}

/// Indicates existence and length of a parameter value after the driver has
/// seen it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Indicator {
    /// Value does not exist, i.e. it is `NULL`.
    Null,
    /// Value exists. Number of bytes the driver transferred (or will
    /// transfer) for it.
    Length(usize),
}

impl Indicator {
    /// Creates an indicator from the length-or-indicator value as used by the
    /// ODBC C API.
    pub fn from_len(indicator: Len) -> Self {
        match indicator {
            NULL_DATA => Indicator::Null,
            other => Indicator::Length(
                other
                    .try_into()
                    .expect("Length indicator must be non-negative."),
            ),
        }
    }

    /// `true` if the indicator holds the null sentinel.
    pub fn is_null(self) -> bool {
        matches!(self, Indicator::Null)
    }
}

/// A dynamically typed value supplied by the caller for one parameter marker.
///
/// This is the boundary towards the embedding object model: whatever dynamic
/// value representation lives above this crate is converted into this
/// enumeration before binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Bound as `VARCHAR`.
    Text(String),
    /// Bound as `BIGINT`.
    Bigint(i64),
    /// Bound as `DOUBLE PRECISION`.
    Double(f64),
    /// Bound as `BIT`.
    Bit(bool),
    /// Bound as a `NULL` value without a buffer.
    Null,
}

/// One parameter, converted into its native representation.
///
/// Owns the native buffer the driver reads the value from and the indicator
/// slot the driver writes the transferred length (or the null sentinel) into.
/// Both stay alive for as long as the descriptor exists; both are released
/// together with it, in one uniform way regardless of the value type.
pub struct ParameterDescriptor {
    value_type: CDataType,
    parameter_type: SqlDataType,
    column_size: ULen,
    decimal_digits: i16,
    buffer: ParameterBuffer,
    /// Heap allocated so its address stays stable when the descriptor moves
    /// between threads.
    indicator: Box<Len>,
}

/// Owned native buffer of one parameter. Boxed scalars and the text vector
/// keep their addresses stable across moves of the descriptor.
enum ParameterBuffer {
    Text(Vec<u8>),
    Bigint(Box<i64>),
    Double(Box<f64>),
    Bit(Box<Bit>),
    None,
}

impl ParameterDescriptor {
    fn from_value(index: usize, value: &Value) -> Result<Self, MarshalError> {
        let descriptor = match value {
            Value::Text(text) => {
                let length = text.len();
                // Terminating zero and length must both be declarable.
                if Len::try_from(length + 1).is_err() {
                    return Err(MarshalError::TextTooLong { index, length });
                }
                let mut buffer = Vec::with_capacity(length + 1);
                buffer.extend_from_slice(text.as_bytes());
                buffer.push(0);
                Self {
                    value_type: CDataType::Char,
                    parameter_type: SqlDataType::VARCHAR,
                    column_size: length as ULen,
                    decimal_digits: 0,
                    buffer: ParameterBuffer::Text(buffer),
                    indicator: Box::new(length as Len),
                }
            }
            Value::Bigint(value) => Self {
                value_type: CDataType::SBigInt,
                parameter_type: SqlDataType::EXT_BIG_INT,
                // Smallest digit width which round trips the value.
                column_size: value
                    .unsigned_abs()
                    .checked_ilog10()
                    .map_or(1, |digits| digits + 1) as ULen,
                decimal_digits: 0,
                buffer: ParameterBuffer::Bigint(Box::new(*value)),
                indicator: Box::new(0),
            },
            Value::Double(value) => Self {
                value_type: CDataType::Double,
                parameter_type: SqlDataType::DOUBLE,
                // Digits of precision an `f64` can round trip.
                column_size: 15,
                decimal_digits: 0,
                buffer: ParameterBuffer::Double(Box::new(*value)),
                indicator: Box::new(0),
            },
            Value::Bit(value) => Self {
                value_type: CDataType::Bit,
                parameter_type: SqlDataType::EXT_BIT,
                column_size: 1,
                decimal_digits: 0,
                buffer: ParameterBuffer::Bit(Box::new(Bit::from_bool(*value))),
                indicator: Box::new(0),
            },
            Value::Null => Self {
                value_type: CDataType::Char,
                parameter_type: SqlDataType::VARCHAR,
                column_size: 1,
                decimal_digits: 0,
                buffer: ParameterBuffer::None,
                indicator: Box::new(NULL_DATA),
            },
        };
        Ok(descriptor)
    }

    /// The identifier of the C data type of the value buffer.
    pub fn value_type(&self) -> CDataType {
        self.value_type
    }

    /// The SQL data type the parameter is declared as at the data source.
    pub fn parameter_type(&self) -> SqlDataType {
        self.parameter_type
    }

    /// Declared size of the parameter at the data source.
    pub fn column_size(&self) -> ULen {
        self.column_size
    }

    /// Declared decimal digits of the parameter at the data source.
    pub fn decimal_digits(&self) -> i16 {
        self.decimal_digits
    }

    /// Pointer to the native buffer holding the value. Null for `NULL`
    /// parameters.
    pub fn value_ptr(&self) -> Pointer {
        match &self.buffer {
            ParameterBuffer::Text(buffer) => buffer.as_ptr() as Pointer,
            ParameterBuffer::Bigint(value) => &**value as *const i64 as Pointer,
            ParameterBuffer::Double(value) => &**value as *const f64 as Pointer,
            ParameterBuffer::Bit(value) => &**value as *const Bit as Pointer,
            ParameterBuffer::None => null_mut(),
        }
    }

    /// Length of the native buffer in bytes, including the terminating zero
    /// for text values.
    pub fn buffer_length(&self) -> Len {
        match &self.buffer {
            ParameterBuffer::Text(buffer) => buffer.len() as Len,
            ParameterBuffer::Bigint(_) => size_of::<i64>() as Len,
            ParameterBuffer::Double(_) => size_of::<f64>() as Len,
            ParameterBuffer::Bit(_) => size_of::<Bit>() as Len,
            ParameterBuffer::None => 0,
        }
    }

    /// Pointer to the length-or-indicator slot the driver reads the input
    /// length from, and writes the transferred length into.
    pub fn indicator_ptr(&mut self) -> *mut Len {
        &mut *self.indicator
    }

    /// Current content of the length-or-indicator slot.
    pub fn indicator(&self) -> Indicator {
        Indicator::from_len(*self.indicator)
    }

    /// `true` if this descriptor represents a `NULL` value.
    pub fn is_null(&self) -> bool {
        self.indicator().is_null()
    }
}

/// Converts an ordered list of caller values into an equally long, equally
/// ordered list of parameter descriptors.
///
/// Fails without converting anything if one of the values cannot be
/// represented natively. Every returned descriptor owns its native buffer;
/// dropping the list releases all of them.
pub fn marshal_parameters(values: &[Value]) -> Result<Vec<ParameterDescriptor>, MarshalError> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| ParameterDescriptor::from_value(index, value))
        .collect()
}

/// Binds every descriptor to its one based parameter number, in order,
/// through `bind`. Stops at the first driver error without touching the
/// remaining descriptors and reports that error. Warnings on individual
/// parameters are carried into the overall status.
///
/// Buffer ownership stays with `parameters` on every path.
pub(crate) fn bind_all<F>(parameters: &mut [ParameterDescriptor], mut bind: F) -> SqlResult<()>
where
    F: FnMut(u16, &mut ParameterDescriptor) -> SqlResult<()>,
{
    let mut overall = SqlResult::Success(());
    for (index, parameter) in parameters.iter_mut().enumerate() {
        let number = (index + 1).try_into().unwrap();
        let status = bind(number, parameter);
        if status.is_err() {
            return status;
        }
        if matches!(status, SqlResult::SuccessWithInfo(())) {
            overall = status;
        }
    }
    overall
}
