use crate::{Error, handles};
use std::sync::Arc;

/// The result set of an executed statement.
///
/// Constructed by the completion of a successful execution; shares ownership
/// of the statement handle with the [`crate::Statement`] it came from, so the
/// native handle stays valid for as long as either of the two is alive.
///
/// This type is the hand-over point to the row fetching layer: it exposes the
/// executed handle and the number of result columns, describing and fetching
/// the rows themselves happens above this crate.
pub struct Cursor {
    statement: Arc<handles::Statement>,
}

impl Cursor {
    pub(crate) fn new(statement: Arc<handles::Statement>) -> Self {
        Self { statement }
    }

    /// Number of columns in the result set. Zero for statements which do not
    /// produce one (e.g. `INSERT`).
    pub fn num_result_cols(&self) -> Result<i16, Error> {
        self.statement
            .num_result_cols()
            .into_result(&*self.statement)
    }

    /// The statement handle the result set lives on.
    pub fn statement(&self) -> &handles::Statement {
        &self.statement
    }
}
