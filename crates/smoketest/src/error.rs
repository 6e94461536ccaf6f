use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Errors that can occur during smoketest execution.
#[derive(Error, Debug)]
pub enum Error {
    /// A waited-for condition did not hold within the timeout.
    #[error("condition not met within {timeout_ms} ms: {what}")]
    ConditionTimeout {
        /// Description of the condition that was awaited
        what: &'static str,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// The arbiter reached a state the scenario does not allow.
    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = StdResult<T, Error>;

/// Print helpful hints for common errors.
pub fn print_hints(err: &Error) {
    match err {
        Error::ConditionTimeout { .. } => {
            eprintln!("hint: raise --timeout, or run with --debug to watch the worker");
        }
        Error::UnexpectedState(_) | Error::Io(_) => {
            // No specific hints for these errors
        }
    }
}
