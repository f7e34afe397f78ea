//! Error type shared by every stage of the bridge.

use std::borrow::Cow;
use thiserror::Error;

/// Coarse classification of a [`BridgeError`], used by callers that only
/// need to decide whether to decline an input, report a user error or treat
/// the failure as fatal to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No known magic matched; the input should be declined, not failed.
    FormatUnrecognized,
    /// The container could not be opened, or only a raw codestream exists.
    ContainerOpen,
    /// Bad page index, pixel format, bit depth, option string or layer count.
    Configuration,
    /// A fault reported by the codec through the error sink.
    CodecRuntime,
    /// Short reads, failed seeks or failed writes.
    Io,
    /// Worker threads could not be attached.
    ResourceExhausted,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("not a JPEG 2000 file or stream")]
    NotRecognized,
    #[error("unsupported raw codestream, only boxed JP2 containers can be loaded")]
    UnsupportedRawCodestream,
    #[error("unable to open container: {reason}")]
    ContainerOpen { reason: Cow<'static, str> },
    #[error("page {page} out of range, image has {n_pages} pages")]
    InvalidPage { page: u32, n_pages: u32 },
    #[error("not an integer format: {format}")]
    NotIntegerFormat { format: Cow<'static, str> },
    #[error("unsupported format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },
    #[error("unsupported bit depth {bits}")]
    UnsupportedBitDepth { bits: u32 },
    #[error("incorrect number of colour bands for colour space: {found} found, {expected} expected")]
    ColourBandMismatch { found: usize, expected: usize },
    #[error("bad option \"{token}\": {reason}")]
    InvalidOption {
        token: String,
        reason: Cow<'static, str>,
    },
    #[error("too many layers: {count} given, at most {max} supported")]
    TooManyLayers { count: usize, max: usize },
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: Cow<'static, str> },
    #[error("codec error: {message}")]
    Codec { message: String },
    #[error("codec fault during {operation}: {message}")]
    CodecPanic {
        operation: &'static str,
        message: String,
    },
    #[error("decode failed: {reason}")]
    DecodeFailed { reason: Cow<'static, str> },
    #[error("encode failed: {reason}")]
    EncodeFailed { reason: Cow<'static, str> },
    #[error("previous codec error, session can no longer be used")]
    SessionFailed,
    #[error("unable to attach {requested} worker threads: {reason}")]
    ThreadAttach { requested: usize, reason: String },
    #[error("invalid data: {reason}")]
    InvalidData { reason: Cow<'static, str> },
    #[error("stream is closed")]
    StreamClosed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn container(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::ContainerOpen {
            reason: reason.into(),
        }
    }

    pub fn invalid_option(token: impl Into<String>, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidOption {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn invalid_data(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidData {
            reason: reason.into(),
        }
    }

    pub fn decode_failed(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            reason: reason.into(),
        }
    }

    pub fn encode_failed(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::EncodeFailed {
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotRecognized => ErrorCategory::FormatUnrecognized,
            Self::UnsupportedRawCodestream | Self::ContainerOpen { .. } => {
                ErrorCategory::ContainerOpen
            }
            Self::InvalidPage { .. }
            | Self::NotIntegerFormat { .. }
            | Self::UnsupportedFormat { .. }
            | Self::UnsupportedBitDepth { .. }
            | Self::ColourBandMismatch { .. }
            | Self::InvalidOption { .. }
            | Self::TooManyLayers { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::Configuration,
            Self::Codec { .. }
            | Self::CodecPanic { .. }
            | Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. }
            | Self::SessionFailed => ErrorCategory::CodecRuntime,
            Self::ThreadAttach { .. } => ErrorCategory::ResourceExhausted,
            Self::InvalidData { .. } | Self::StreamClosed | Self::Io(_) => ErrorCategory::Io,
        }
    }

    /// True for errors a host should treat as "not mine" rather than a failure.
    pub fn is_decline(&self) -> bool {
        self.category() == ErrorCategory::FormatUnrecognized
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        assert!(BridgeError::NotRecognized.is_decline());
        assert_eq!(
            BridgeError::UnsupportedRawCodestream.category(),
            ErrorCategory::ContainerOpen
        );
        assert_eq!(
            BridgeError::InvalidPage { page: 9, n_pages: 2 }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            BridgeError::TooManyLayers { count: 17, max: 16 }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            BridgeError::Codec {
                message: "bad".into()
            }
            .category(),
            ErrorCategory::CodecRuntime
        );
        assert_eq!(
            BridgeError::ThreadAttach {
                requested: 4,
                reason: "no".into()
            }
            .category(),
            ErrorCategory::ResourceExhausted
        );
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        assert_eq!(BridgeError::from(io).category(), ErrorCategory::Io);
    }

    #[test]
    fn option_error_names_token() {
        let err = BridgeError::invalid_option("Clayers=x", "expected an integer");
        assert!(err.to_string().contains("Clayers=x"));
    }
}
