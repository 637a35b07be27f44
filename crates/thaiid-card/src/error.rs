//! Card error taxonomy
//!
//! Every error is classified into an [`ErrorKind`] where it is created, so
//! retry decisions and event error codes never have to inspect error text.

use thiserror::Error;

/// Coarse classification of a card fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Communication glitch between reader and card; worth retrying
    TransientComm,
    /// The card was reset underneath us
    CardReset,
    /// The ID card application could not be selected
    SelectionFailed,
    /// The card answered with a non-success status word
    ProtocolFault,
    /// The reader (or the PC/SC service behind it) went away
    ReaderLost,
    /// No card in the reader
    NoCard,
    Other,
}

impl ErrorKind {
    /// Error code published to subscribers, if this kind has one
    pub fn code(self) -> Option<&'static str> {
        match self {
            ErrorKind::TransientComm => Some("SCARD_COMM_ERROR"),
            ErrorKind::CardReset => Some("SCARD_W_RESET_CARD"),
            ErrorKind::SelectionFailed => Some("APPLET_SELECT_FAILED"),
            _ => None,
        }
    }
}

impl From<&pcsc::Error> for ErrorKind {
    fn from(err: &pcsc::Error) -> Self {
        use pcsc::Error;

        match err {
            Error::CommError => ErrorKind::TransientComm,
            Error::ResetCard => ErrorKind::CardReset,
            Error::NoSmartcard | Error::RemovedCard | Error::Timeout => ErrorKind::NoCard,
            Error::UnknownReader
            | Error::ReaderUnavailable
            | Error::NoReadersAvailable
            | Error::NoService
            | Error::ServiceStopped
            | Error::InvalidHandle => ErrorKind::ReaderLost,
            _ => ErrorKind::Other,
        }
    }
}

/// Errors raised while talking to a reader or card
#[derive(Debug, Error)]
pub enum CardError {
    /// Failure reported by the PC/SC layer
    #[error("PC/SC error: {source}")]
    Pcsc {
        kind: ErrorKind,
        #[source]
        source: pcsc::Error,
    },

    #[error("applet select failed, SW={sw1:02X}{sw2:02X}")]
    SelectFailed { sw1: u8, sw2: u8 },

    /// Non-success status word while reading a field
    #[error("reading {field} failed, SW={sw1:02X}{sw2:02X}")]
    Status {
        field: &'static str,
        sw1: u8,
        sw2: u8,
    },

    #[error("response too short ({0} bytes)")]
    ShortResponse(usize),

    #[error("reader {0} is no longer available")]
    ReaderLost(String),

    #[error("card session already released")]
    SessionReleased,
}

impl CardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CardError::Pcsc { kind, .. } => *kind,
            CardError::SelectFailed { .. } => ErrorKind::SelectionFailed,
            CardError::Status { .. } => ErrorKind::ProtocolFault,
            CardError::ShortResponse(_) => ErrorKind::ProtocolFault,
            CardError::ReaderLost(_) => ErrorKind::ReaderLost,
            CardError::SessionReleased => ErrorKind::Other,
        }
    }

    /// Whether the operation that raised this error may be retried
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientComm
    }
}

impl From<pcsc::Error> for CardError {
    fn from(source: pcsc::Error) -> Self {
        CardError::Pcsc {
            kind: ErrorKind::from(&source),
            source,
        }
    }
}
