//! Parse-failure taxonomy for the message core.

use thiserror::Error;

/// Why a depth-wise message check failed.
///
/// Absence of a section or field is not an error; accessors report it as
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A byte was needed past the end of the buffer chain mid-parse.
    #[error("needed a byte past the end of the buffer chain")]
    TruncatedFrame,

    /// A matched section preamble was followed by a tag outside the
    /// section's permitted set.
    #[error("section preamble followed by unexpected type tag {tag:#04x}")]
    UnexpectedTag {
        /// The offending type tag.
        tag: u8,
    },

    /// A section already recorded was matched again.
    #[error("duplicate message section")]
    DuplicateSection,
}
