//! Error types for the assetdig-core library.
//!
//! This module provides error handling using the `thiserror` crate. The
//! variants fall into a few families:
//!
//! - format assumption violations, which void every later byte offset and
//!   abort the whole parse
//! - stream desynchronization, which is fatal for the record being decoded
//!   but may be caught at a record boundary
//! - truncation and plain end of input
//! - schema problems found while building decoders from type descriptions

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for assetdig operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all assetdig operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A header constant or table entry does not match the supported layout
    #[error("unsupported container: {what} is {found}, expected {expected}")]
    FormatAssumption {
        /// Which value was checked
        what: &'static str,
        /// The value the layout assumes
        expected: String,
        /// The value actually present
        found: String,
    },

    /// Ran out of bytes
    #[error("unexpected end of data at offset {at}: need {need} bytes, {rem} remaining")]
    UnexpectedEof {
        /// Cursor offset at the failing read
        at: usize,
        /// Bytes requested
        need: usize,
        /// Bytes left in the buffer
        rem: usize,
    },

    /// Seek target lies outside the buffer
    #[error("seek to {target} is outside a buffer of {len} bytes")]
    SeekOutOfBounds {
        /// Requested absolute position (may be negative for backward seeks)
        target: i64,
        /// Buffer length
        len: usize,
    },

    /// Boolean stored as a 32-bit integer held something other than 0 or 1
    #[error("bad boolean {value} at offset {offset}")]
    InvalidBool {
        /// Offset of the integer
        offset: usize,
        /// Raw value read
        value: i32,
    },

    /// Enum index outside the declared member table
    #[error("enum {type_name} index {index} out of range ({len} members) at offset {offset}")]
    EnumOutOfRange {
        /// Enum type name
        type_name: String,
        /// Raw index read
        index: i32,
        /// Number of declared members
        len: usize,
        /// Offset of the index
        offset: usize,
    },

    /// List length prefix above the sanity bound
    #[error("suspicious list length of {len} at offset {offset}")]
    SuspiciousLength {
        /// Offset of the length prefix
        offset: usize,
        /// Raw length read
        len: i64,
    },

    /// String payload is not UTF-8
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string bytes
        offset: usize,
    },

    /// End of stream after the first field of a record was read
    #[error("record {record} truncated at field '{field}' (offset {offset})")]
    Truncated {
        /// Zero-based record number
        record: usize,
        /// Field being decoded when the data ran out
        field: String,
        /// Cursor offset at the start of that field
        offset: usize,
    },

    /// End of stream inside a field group read at an explicit offset
    #[error("section truncated at field '{field}' (offset {offset})")]
    SectionTruncated {
        /// Field being decoded when the data ran out
        field: String,
        /// Cursor offset at the start of that field
        offset: usize,
    },

    /// Declared type name has no decoder
    #[error("no decoder for type '{type_name}' (field '{field}')")]
    UnknownType {
        /// The unresolved type name
        type_name: String,
        /// Field that declared it
        field: String,
    },

    /// Field name not present in the schema
    #[error("field '{name}' not found in schema")]
    UnknownField {
        /// The missing field name
        name: String,
    },

    /// Section whose last field is declared before its first field
    #[error("field range '{first}'..'{last}' is empty")]
    EmptyFieldRange {
        /// First field name
        first: String,
        /// Last field name
        last: String,
    },

    /// Heuristic anchor needed to place a field group could not be found
    #[error("anchor '{what}' not found before offset {offset}")]
    AnchorNotFound {
        /// What was being searched for
        what: &'static str,
        /// Offset the search ended at
        offset: usize,
    },

    /// Bytes around a record anchor fail a consistency check
    #[error("suspicious record at offset {offset}: {details}")]
    Suspicious {
        /// Offset of the check
        offset: usize,
        /// What did not add up
        details: String,
    },

    /// A decoded record lacks a field or holds the wrong kind of value
    #[error("record field '{field}' is missing or not {expected}")]
    FieldKind {
        /// Field name
        field: String,
        /// Expected value kind
        expected: &'static str,
    },

    /// Cross reference into the resource table does not resolve
    #[error("resource reference {index} out of range ({len} resources)")]
    UnresolvedResource {
        /// The 1-based index found in the block record
        index: i32,
        /// Number of decoded resources
        len: usize,
    },

    /// A required table was not found in any container
    #[error("table '{name}' not found")]
    TableNotFound {
        /// Behaviour name of the table
        name: String,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new format assumption error
    pub fn format_assumption(
        what: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Self::FormatAssumption {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Creates a new unknown field error
    pub fn unknown_field(name: impl Into<String>) -> Self {
        Self::UnknownField { name: name.into() }
    }

    /// Creates a new suspicious record error
    pub fn suspicious(offset: usize, details: impl Into<String>) -> Self {
        Self::Suspicious {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new field kind error
    pub fn field_kind(field: impl Into<String>, expected: &'static str) -> Self {
        Self::FieldKind {
            field: field.into(),
            expected,
        }
    }

    /// Returns true if the byte stream is no longer where the schema thinks it is
    pub fn is_stream_desync(&self) -> bool {
        matches!(
            self,
            Self::InvalidBool { .. }
                | Self::EnumOutOfRange { .. }
                | Self::SuspiciousLength { .. }
                | Self::InvalidUtf8 { .. }
        )
    }

    /// Returns true if this is an end-of-input condition
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof { .. } | Self::Truncated { .. } | Self::SectionTruncated { .. }
        )
    }

    /// Returns true if a record-level boundary may log this error and move on
    pub fn is_recoverable(&self) -> bool {
        self.is_stream_desync()
            || self.is_eof()
            || matches!(
                self,
                Self::SeekOutOfBounds { .. }
                    | Self::AnchorNotFound { .. }
                    | Self::Suspicious { .. }
                    | Self::FieldKind { .. }
                    | Self::UnresolvedResource { .. }
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::format_assumption("platform", 19, 5);
        assert!(err.to_string().contains("platform is 5"));
        assert!(err.to_string().contains("expected 19"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::InvalidBool { offset: 0, value: 7 }.is_recoverable());
        assert!(Error::SuspiciousLength { offset: 0, len: 101 }.is_stream_desync());
        assert!(!Error::format_assumption("version", "5.6.2f1", "2017.1").is_recoverable());
        assert!(!Error::unknown_field("icon").is_recoverable());
        assert!(Error::SectionTruncated {
            field: "inputs".into(),
            offset: 40
        }
        .is_recoverable());
    }
}
