use arrow_schema::ArrowError;
use forms_common::{Arity, Function, ReferenceError};
use thiserror::Error;

/// Failure modes of plan translation and execution.
///
/// A missing lookup match is not an error: it is a null row in the result.
/// Every variant here aborts the current formula, and when raised inside a
/// partition, the whole parallel evaluation.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Caller broke a documented precondition (empty search range, misaligned
    /// columns, column index out of range).
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("{function} expects {expected} arguments, got {actual}")]
    Arity {
        function: Function,
        expected: Arity,
        actual: usize,
    },

    /// Inputs cannot be compared or coerced to a common key type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The plan handed to the translator violates a tree invariant.
    #[error("plan translation failed: {0}")]
    Translation(String),

    #[error("{0} is not supported by this executor")]
    Unsupported(String),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

impl ExecError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        ExecError::Precondition(msg.into())
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        ExecError::TypeMismatch(msg.into())
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        ExecError::Translation(msg.into())
    }
}
