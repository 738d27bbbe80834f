//! Error types for the load driver.

use std::io;
use thiserror::Error;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Everything that can stop a run before or during setup, plus database
/// errors surfaced to the workers for classification.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An option name that is not in the recognised set.
    #[error("invalid option: -{name}")]
    InvalidOption {
        /// The offending option name
        name: String,
    },

    /// A bare value on the command line with no preceding option name.
    #[error("option value with no name: {value}")]
    DanglingValue {
        /// The stray argument
        value: String,
    },

    /// One or more of the required connection options is absent.
    #[error("missing command-line option(s) - you must specify all of: -url URL; -user USER; -password PASSWORD")]
    MissingRequired,

    /// An option value that does not parse or fails validation.
    #[error("invalid value for -{option}: '{value}' ({reason})")]
    InvalidValue {
        /// Option name
        option: &'static str,
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Failed to read a config or data file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// A parameter specifier names a type outside the supported set.
    #[error("unsupported parameter type in specifier '{spec}'")]
    UnknownParamType {
        /// The full specifier
        spec: String,
    },

    /// A parameter specifier that is structurally broken.
    #[error("bad parameter specifier '{spec}': {reason}")]
    BadParamSpec {
        /// The full specifier
        spec: String,
        /// Why it was rejected
        reason: String,
    },

    /// A `value` specifier was used but no data file has been loaded.
    #[error("a parameter specifier refers to the data file, but no data has been read: {spec}")]
    EmptyDataTable {
        /// The full specifier
        spec: String,
    },

    /// A parameter site with no inline spec and no `-params` entry.
    #[error("parameter site {index} has no inline specifier and no -params entry")]
    MissingParamSpec {
        /// Zero-based parameter position
        index: usize,
    },

    /// The leading SQL token is not a recognised verb.
    #[error("could not parse a verb from sql: {sql}")]
    BadVerb {
        /// The rewritten SQL text
        sql: String,
    },

    /// A date bound that does not match its parse format.
    #[error("invalid date string: {text}")]
    BadDate {
        /// The rejected text
        text: String,
    },

    /// Anything the database layer reports.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl DriverError {
    /// Create an InvalidValue error
    pub fn invalid_value(
        option: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            option,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an Io error
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a BadParamSpec error
    pub fn bad_spec(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadParamSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}
