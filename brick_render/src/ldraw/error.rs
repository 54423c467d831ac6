//! Error management

use std::convert::From;
use std::fmt;
use std::sync::Arc;

/// Generic error for all LDraw operations.
#[derive(Debug)]
pub enum Error {
    /// An error encountered while parsing some LDraw file content.
    Parse(ParseError),

    /// An error encountered while fetching the content of a file.
    Fetch(FetchError),

    /// A sub-file referenced by a loaded part could not be loaded.
    MissingSubPart(MissingSubPartError),

    /// A file transitively references itself.
    Cycle(CycleError),
}

/// Error related to parsing the content of an LDraw file.
#[derive(Debug)]
pub struct ParseError {
    /// Filename of the sub-file reference, generally relative to some canonical catalog path(s).
    pub filename: String,

    /// The line of the LDraw file that failed to parse.
    pub line: String,

    /// Optional underlying error raised by the internal parser.
    pub parse_error: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Error related to fetching the content of a file, after every candidate
/// path has been tried.
#[derive(Debug)]
pub struct FetchError {
    /// Filename the fetch was issued for.
    pub filename: String,

    /// Candidate paths that were tried.
    pub candidates: Vec<String>,

    /// Optional underlying error raised by the fetch implementation.
    pub fetch_error: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Error related to resolving a sub-file reference of a source file.
#[derive(Debug)]
pub struct MissingSubPartError {
    /// Filename of the sub-file reference.
    pub filename: String,

    /// The error that made the sub-file unavailable.
    pub load_error: Arc<Error>,
}

/// Error raised when sub-file references form a cycle.
#[derive(Debug)]
pub struct CycleError {
    /// Filename of a file inside the reference cycle.
    pub filename: String,
}

impl ParseError {
    /// Create a [`ParseError`] that stems from an arbitrary error of an underlying parser.
    pub fn new(
        filename: &str,
        line: String,
        err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            line,
            parse_error: Some(err.into()),
        }
    }

    /// Create a [`ParseError`] that stems from a [`nom`] parsing error, capturing the [`nom::error::ErrorKind`]
    /// from the underlying parser which failed.
    pub fn new_from_nom(
        filename: &str,
        line: String,
        err: &nom::Err<nom::error::Error<&[u8]>>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            line,
            parse_error: match err {
                nom::Err::Incomplete(_) => None,
                nom::Err::Error(e) => {
                    // Discard input slice due to lifetime constraint
                    Some(nom::Err::Error(e.code).into())
                }
                nom::Err::Failure(e) => {
                    // Discard input slice due to lifetime constraint
                    Some(nom::Err::Error(e.code).into())
                }
            },
        }
    }
}

impl FetchError {
    /// Create a [`FetchError`] that stems from an arbitrary error of the fetch implementation.
    pub fn new(
        filename: &str,
        candidates: Vec<String>,
        err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            candidates,
            fetch_error: Some(err.into()),
        }
    }

    /// Create a [`FetchError`] without any underlying error.
    pub fn new_raw(filename: &str, candidates: Vec<String>) -> Self {
        Self {
            filename: filename.to_string(),
            candidates,
            fetch_error: None,
        }
    }
}

impl MissingSubPartError {
    pub fn new(filename: &str, load_error: Arc<Error>) -> Self {
        Self {
            filename: filename.to_string(),
            load_error,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(ParseError {
                filename,
                line,
                parse_error,
            }) => write!(
                f,
                "parse error in file {filename:?} while processing {line:?}: {parse_error:?}"
            ),
            Error::Fetch(FetchError {
                filename,
                candidates,
                fetch_error,
            }) => write!(
                f,
                "fetch error for filename {filename:?} (tried {candidates:?}): {fetch_error:?}"
            ),
            Error::MissingSubPart(MissingSubPartError {
                filename,
                load_error,
            }) => write!(f, "missing sub-part {filename:?}: {load_error}"),
            Error::Cycle(CycleError { filename }) => {
                write!(f, "sub-file references of {filename:?} form a cycle")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MissingSubPart(e) => Some(e.load_error.as_ref()),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        Error::Fetch(e)
    }
}

impl From<MissingSubPartError> for Error {
    fn from(e: MissingSubPartError) -> Self {
        Error::MissingSubPart(e)
    }
}

impl From<CycleError> for Error {
    fn from(e: CycleError) -> Self {
        Error::Cycle(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_from_nom() {
        let nom_error = nom::Err::Error(nom::error::Error::new(
            &b""[..],
            nom::error::ErrorKind::Alpha,
        ));
        let parse_error = ParseError::new_from_nom("file", String::new(), &nom_error);
        assert_eq!(parse_error.filename, "file");
        assert!(parse_error.parse_error.is_some());
    }

    #[test]
    fn test_from() {
        let fetch_error = FetchError::new_raw("file", vec!["ldraw/p/file".to_string()]);
        let error: Error = fetch_error.into();
        eprintln!("err: {error}");
        match &error {
            Error::Fetch(fetch_error) => assert_eq!(fetch_error.filename, "file"),
            _ => panic!("Unexpected error type."),
        }

        let missing = MissingSubPartError::new("child.dat", Arc::new(error));
        let error: Error = missing.into();
        eprintln!("err: {error}");
        match &error {
            Error::MissingSubPart(missing) => assert_eq!(missing.filename, "child.dat"),
            _ => panic!("Unexpected error type."),
        }
        assert!(std::error::Error::source(&error).is_some());
    }
}
