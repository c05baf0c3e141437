//! # Error Module
//!
//! Every failure surfaced by sequel is a variant of [`Error`]. Variants carry the type
//! name, column, ordinal or counts needed to diagnose the problem without re-running
//! with tracing enabled. Nothing is retried internally.

use std::fmt;

/// Errors returned by sequel operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Column metadata was requested for something that is not a record.
    #[error("can only map records, not {type_name}")]
    UnsupportedShape { type_name: String },

    /// A record member cannot be mapped (bad tag, nested sequence, duplicate column...).
    #[error("field {member:?} of {record}: {reason}")]
    InvalidField { record: &'static str, member: String, reason: String },

    /// A bound argument has no expansion.
    #[error("unsupported parameter of type {type_name}")]
    UnsupportedParameter { type_name: String },

    /// A `?` placeholder has no bound argument left.
    #[error("placeholder {ordinal} is out of range ({available} arguments bound)")]
    PlaceholderOutOfRange { ordinal: usize, available: usize },

    /// A quoted span in the statement text is never closed.
    #[error("unterminated {quote} quote starting at byte {position}")]
    UnterminatedQuote { quote: char, position: usize },

    /// An insert touched a different number of rows than it was given.
    #[error("affected rows {affected} did not match row count of {expected}")]
    RowCountMismatch { affected: u64, expected: usize },

    /// Generated ids could not be written back because the rows were borrowed immutably.
    #[error("can't set primary key {column:?} on immutable rows of {record}, pass them mutably")]
    ImmutablePrimaryKeyTarget { record: &'static str, column: String },

    /// Generated ids are integers and the record's primary key cannot hold one.
    #[error("primary key {column:?} of {record} cannot hold a generated integer id")]
    NonIntegerPrimaryKey { record: &'static str, column: String },

    /// Result columns and record fields do not correspond one-to-one.
    #[error("column {column:?} does not map one-to-one onto {mapping}")]
    ColumnMappingMismatch { column: String, mapping: String },

    /// An upsert has neither explicit conflict columns nor a primary key to fall back on.
    #[error("cannot upsert into {table:?} from {record} without a primary key or conflict columns")]
    MissingConflictKey { table: String, record: &'static str },

    /// The query returned no rows where one was required.
    #[error("no rows returned")]
    NoRows,

    /// The query returned more than the single row that was expected.
    #[error("more than one row returned from {query:?}")]
    TooManyRows { query: String },

    /// A result value could not be assigned to its destination.
    #[error("column {column:?}: {source}")]
    Decode { column: String, source: DecodeError },

    /// The connection URL names a database sequel has no dialect for.
    #[error("unsupported SQL driver {0:?}")]
    UnsupportedDriver(String),

    /// Error reported by sqlx.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A single value could not be converted into the requested Rust type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub expected: &'static str,
    pub found: String,
}

impl DecodeError {
    pub fn new(expected: &'static str, found: impl Into<String>) -> Self {
        Self { expected, found: found.into() }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl std::error::Error for DecodeError {}

impl Error {
    pub(crate) fn invalid_field(record: &'static str, member: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidField { record, member: member.into(), reason: reason.into() }
    }
}
