//! Tests which can run without an ODBC driver manager or data source
//! present.

use odbc_dispatch::{
    Dispatcher, Statement, Value, handles, marshal_parameters,
    sys::{CDataType, HDbc, HEnv, HStmt},
};
use std::{
    ptr::null_mut,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn marshal_the_supported_value_types() {
    init();

    let values = [
        Value::Text("abc".to_string()),
        Value::Bigint(42),
        Value::Double(3.14),
        Value::Bit(true),
        Value::Null,
    ];

    let descriptors = marshal_parameters(&values).unwrap();

    let tags: Vec<_> = descriptors.iter().map(|d| d.value_type()).collect();
    assert_eq!(
        [
            CDataType::Char,
            CDataType::SBigInt,
            CDataType::Double,
            CDataType::Bit,
            CDataType::Char,
        ],
        tags.as_slice()
    );
    assert!(descriptors[4].is_null());
    assert!(descriptors[4].value_ptr().is_null());
}

#[test]
fn every_submission_completes_exactly_once_under_load() {
    init();

    let dispatcher = Dispatcher::new(4);
    let completed = Arc::new(AtomicUsize::new(0));

    for task in 0..100_usize {
        let completed = Arc::clone(&completed);
        dispatcher.submit(move || task % 7, move |_| {
            completed.fetch_add(1, Ordering::Relaxed);
        });
    }
    while dispatcher.wait_completion() {}

    assert_eq!(100, completed.load(Ordering::Relaxed));
    assert_eq!(0, dispatcher.pending());
}

#[test]
fn freeing_a_statement_handle_twice_is_harmless() {
    init();

    let mut handle = unsafe {
        handles::Statement::new(HEnv(null_mut()), HDbc(null_mut()), HStmt(null_mut()), 128)
    };
    handle.free();
    handle.free();
}

#[test]
fn a_fresh_statement_has_no_operations_in_flight() {
    init();

    let handle =
        unsafe { handles::Statement::new(HEnv(null_mut()), HDbc(null_mut()), HStmt(null_mut()), 0) };
    let statement = Statement::new(handle);

    assert_eq!(0, statement.in_flight());
}
