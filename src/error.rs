use std::str::Utf8Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure categories. Framing errors leave the connection
/// desynchronized; format, encoding, and resource-limit errors are fatal to
/// the single message only. A correlation miss is *not* represented here --
/// [`CallTable::resolve`] returns `None` for that, and callers log and move
/// on.
///
/// [`CallTable::resolve`]: crate::correlation::CallTable::resolve()
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Framing,
    Format,
    Encoding,
    ResourceLimit,
    Correlation,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    // Framing
    #[error("input truncated at offset {0}")]
    Truncated(usize),
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),
    #[error("invalid endianness flag {0:#04x}")]
    InvalidEndianFlag(u8),
    #[error("array claims {claimed} bytes but only {available} remain")]
    ArrayOutOfBounds { claimed: usize, available: usize },
    #[error("array element decoding overran the array end: at {0}, end {1}")]
    ArrayElementOverrun(usize, usize),
    #[error("{0} bytes left over after decoding")]
    LeftoverData(usize),
    #[error("i/o error: {0}")]
    Io(String),

    // Format
    #[error("unrecognized signature character {0:#04x}")]
    UnrecognizedSignatureCharacter(u8),
    #[error("unsupported signature character '{}'", *.0 as char)]
    UnsupportedSignatureCharacter(u8),
    #[error("signature ended before a complete type")]
    SignatureExhausted,
    #[error("mismatched signature bracketing at index {0}")]
    MismatchedSignatureBracketing(usize),
    #[error("struct signature has no fields")]
    EmptyStruct,
    #[error("dict entry must hold exactly a key and a value")]
    DictEntryArity,
    #[error("dict entry key must be a basic type, got '{}'", *.0 as char)]
    DictEntryKeyNotBasic(u8),
    #[error("variant signature must contain exactly one complete type: {0:?}")]
    VariantSignatureArity(String),
    #[error("boolean encoded as {0}, expected 0 or 1")]
    InvalidBoolValue(u32),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("missing required header field {0}")]
    MissingHeaderField(&'static str),
    #[error("header field {0} carries a value of the wrong type")]
    HeaderFieldType(&'static str),
    #[error("message has a {0}-byte body but no signature header")]
    BodyWithoutSignature(usize),

    // Encoding
    #[error("invalid UTF-8 in string data")]
    InvalidUtf8,
    #[error("value does not match signature: expected {expected:?}, found {found:?}")]
    SignatureMismatch { expected: String, found: String },

    // Resource limits
    #[error("array of {0} bytes exceeds the maximum array length")]
    ArrayTooLong(usize),
    #[error("message claims a {0}-byte body, over the maximum body length")]
    BodyTooLong(usize),
    #[error("signature nesting exceeds the maximum depth of {0}")]
    NestingTooDeep(usize),

    // Correlation
    #[error("serial {0} already has a live pending call")]
    DuplicateSerial(u32),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Truncated(_)
            | UnsupportedProtocolVersion(_)
            | InvalidEndianFlag(_)
            | ArrayOutOfBounds { .. }
            | ArrayElementOverrun(_, _)
            | LeftoverData(_)
            | Io(_) => ErrorKind::Framing,
            UnrecognizedSignatureCharacter(_)
            | UnsupportedSignatureCharacter(_)
            | SignatureExhausted
            | MismatchedSignatureBracketing(_)
            | EmptyStruct
            | DictEntryArity
            | DictEntryKeyNotBasic(_)
            | VariantSignatureArity(_)
            | InvalidBoolValue(_)
            | UnknownMessageType(_)
            | MissingHeaderField(_)
            | HeaderFieldType(_)
            | BodyWithoutSignature(_) => ErrorKind::Format,
            InvalidUtf8 | SignatureMismatch { .. } => ErrorKind::Encoding,
            ArrayTooLong(_) | BodyTooLong(_) | NestingTooDeep(_) => ErrorKind::ResourceLimit,
            DuplicateSerial(_) => ErrorKind::Correlation,
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
