use thiserror::Error;

use crate::ObjectId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An Object has the wrong type, e.g. the Object is an Array where a Name would be expected.
    #[error("object has wrong type; expected type {expected} but found type {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    /// Dictionary key was not found.
    #[error("missing required dictionary key \"{0}\"")]
    DictKey(String),
    /// The Object ID was not found.
    #[error("object {0:?} not found")]
    ObjectNotFound(ObjectId),
    /// Dereferencing object failed due to a reference cycle.
    #[error("reference cycle detected at object {0:?}")]
    ReferenceCycle(ObjectId),
    /// The stream couldn't be decompressed.
    #[error("couldn't decompress stream: {0}")]
    Decompress(#[from] DecompressError),
    /// Failed to parse input.
    #[error("couldn't parse input: {0}")]
    Parse(#[from] ParseError),
    /// A source document could not be spliced into the merged document.
    #[error("couldn't merge documents: {0}")]
    Merge(#[from] MergeError),
    /// An image stream uses a filter or color space that cannot be decoded.
    #[error("couldn't decode image {id:?}: {reason}")]
    ImageDecode { id: ObjectId, reason: String },
    /// The lossy encoder rejected the decoded samples.
    #[error("couldn't encode image {id:?}: {reason}")]
    Encode { id: ObjectId, reason: String },
    /// A caller supplied argument is out of its domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// IO error
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    /// Decoding byte vector to UTF8 String failed.
    #[error("invalid UTF-8")]
    UTF8,
}

/// Coarse error category handed to the host layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Merge,
    ImageDecode,
    Encode,
    InvalidParameter,
    Cancelled,
    IO,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Merge(_) => ErrorKind::Merge,
            Error::ImageDecode { .. } => ErrorKind::ImageDecode,
            Error::Encode { .. } => ErrorKind::Encode,
            Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::IO(_) => ErrorKind::IO,
            Error::ObjectType { .. }
            | Error::DictKey(_)
            | Error::ObjectNotFound(_)
            | Error::ReferenceCycle(_)
            | Error::Decompress(_)
            | Error::Parse(_)
            | Error::UTF8 => ErrorKind::Parse,
        }
    }
}

#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("unsupported filter {0}")]
    UnsupportedFilter(String),
    #[error("decoding ASCII85 failed: {0}")]
    Ascii85(&'static str),
    #[error("decoding ASCIIHex failed")]
    AsciiHex,
    #[error("decoding LZW failed: {0}")]
    Lzw(String),
    #[error("inflating stream failed: {0}")]
    Flate(String),
    #[error("invalid predictor data: {0}")]
    Predictor(String),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid file header")]
    InvalidFileHeader,
    #[error("invalid file trailer")]
    InvalidTrailer,
    #[error("invalid cross reference table")]
    InvalidXref,
    #[error("could not find start of cross reference table")]
    XrefStart,
    #[error("invalid Prev offset in trailer")]
    PrevStart,
    #[error("invalid XRefStm offset in trailer")]
    StreamStart,
    #[error("invalid object at byte {offset}")]
    InvalidObject { offset: usize },
    #[error("object id mismatch, expected {expected:?}")]
    ObjectIdMismatch { expected: ObjectId },
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    #[error("invalid object stream: {0}")]
    InvalidObjectStream(String),
    #[error("encrypted documents are not supported")]
    Encrypted,
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("no documents to merge")]
    NoDocuments,
    #[error("unknown source {0} in page ordering")]
    UnknownSource(String),
    #[error("source {source_index} has no catalog")]
    MissingCatalog { source_index: usize },
    #[error("source {source_index} has no page tree")]
    MissingPageTree { source_index: usize },
    #[error("source {source_index} has an invalid page tree: {reason}")]
    InvalidPageTree { source_index: usize, reason: String },
    #[error("object numbers overflow while renumbering source {source_index}")]
    IdOverflow { source_index: usize },
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Error::UTF8
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Self {
        Error::UTF8
    }
}
