//! Errors raised while lexing, parsing or executing one VPL statement.
//!
//! None of these abort a run: the interpreter converts each into
//! `cvfs_core::Error::VplStatement` tagged with the source line and moves on.

use thiserror::Error;

pub type VplResult<T> = std::result::Result<T, VplError>;

#[derive(Error, Debug)]
pub enum VplError {
    #[error("unexpected character {ch:?} at column {col}")]
    UnexpectedChar { ch: char, col: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number {text:?}")]
    InvalidNumber { text: String },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("undefined variable {0}")]
    UndefinedVariable(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("{function}: {message}")]
    BadArgument { function: &'static str, message: String },

    #[error("type error: expected {expected}, found {found}")]
    Type { expected: &'static str, found: &'static str },

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Core(#[from] cvfs_core::Error),
}

impl VplError {
    pub fn syntax(message: impl Into<String>) -> Self {
        VplError::Syntax(message.into())
    }

    pub(crate) fn bad_arg(function: &'static str, message: impl Into<String>) -> Self {
        VplError::BadArgument {
            function,
            message: message.into(),
        }
    }

    /// Attach the source line
    pub fn at_line(self, line: usize) -> cvfs_core::Error {
        cvfs_core::Error::VplStatement {
            line,
            message: self.to_string(),
        }
    }
}
