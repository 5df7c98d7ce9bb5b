use std::error::Error;
use std::fmt;

use thiserror::Error;

/// The kind of a [`CodeViewError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CodeViewErrorKind {
    /// A record or field would read past the end of its data.
    Truncated,

    /// A record has a different kind than the one required at this position.
    UnexpectedKind,

    /// A string table offset does not point at a valid string.
    BadString,

    /// A type index does not refer to a record in the stream.
    UnknownItype,
}

impl fmt::Display for CodeViewErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated codeview record"),
            Self::UnexpectedKind => write!(f, "unexpected codeview record kind"),
            Self::BadString => write!(f, "invalid string table offset"),
            Self::UnknownItype => write!(f, "type index out of range"),
        }
    }
}

/// An error when decoding a single CodeView record.
///
/// These errors never escape the converter. Every record is decoded on its own, and failures are
/// logged and skipped so that the rest of the debug information still converts.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct CodeViewError {
    kind: CodeViewErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl CodeViewError {
    /// Creates a new CodeView error from a known kind of error as well as an arbitrary error
    /// payload.
    pub(crate) fn new<E>(kind: CodeViewErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`CodeViewErrorKind`] for this error.
    pub fn kind(&self) -> CodeViewErrorKind {
        self.kind
    }
}

impl From<CodeViewErrorKind> for CodeViewError {
    fn from(kind: CodeViewErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<scroll::Error> for CodeViewError {
    fn from(e: scroll::Error) -> Self {
        Self::new(CodeViewErrorKind::Truncated, e)
    }
}

/// An error returned when converting a PDB into a [`DebugModel`](crate::DebugModel).
///
/// Malformed debug information never fails the conversion. The only errors are environmental.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The worker pool for parallel conversion could not be started.
    #[error("failed to start conversion worker pool")]
    ThreadPool(#[source] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_error_is_truncation() {
        let err = scroll::Error::BadOffset(12);
        let err = CodeViewError::from(err);
        assert_eq!(err.kind(), CodeViewErrorKind::Truncated);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "truncated codeview record");
    }
}
