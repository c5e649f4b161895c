//! Driver error type.
//!
//! ## Classification
//!
//! | Variant | Meaning | Handling |
//! |---|---|---|
//! | `Timeout` | no complete line within the read timeout | retryable |
//! | `Eof` | serial stream closed | fatal, device link lost |
//! | `IllegalResponse` | recognized line with malformed structure | fatal to the operation |
//! | `Fail` | modem answered `FAIL <code>` | fatal to the operation |
//! | `UnexpectedResponse` | a command step got something other than `OK` | fatal to the operation |
//! | `NoNetworkFound` | every scan attempt came back empty | fatal to initialization |
//! | `JoinFailed` | PANA authentication reported an error | fatal to initialization |
//! | `MalformedFrame` | received application data failed to decode | discard and retry |

use crate::event::Event;
use power_echonet::FrameError;
use thiserror::Error;

pub type SkResult<T> = std::result::Result<T, SkError>;

#[derive(Error, Debug)]
pub enum SkError {
    #[error("Timed out waiting for a line from the modem")]
    Timeout,

    #[error("Serial stream closed by the modem")]
    Eof,

    #[error("Illegal response ({reason}): {line}")]
    IllegalResponse { reason: String, line: String },

    #[error("{command} failed with {code}")]
    Fail { command: &'static str, code: String },

    #[error("{command} expected OK but got {response:?}")]
    UnexpectedResponse {
        command: &'static str,
        response: Event,
    },

    #[error("No smart meter found after {attempts} scan attempts")]
    NoNetworkFound { attempts: u32 },

    #[error("PANA authentication failed: {event:?}")]
    JoinFailed { event: Event },

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SkError {
    pub(crate) fn illegal(reason: impl Into<String>, line: impl Into<String>) -> Self {
        SkError::IllegalResponse {
            reason: reason.into(),
            line: line.into(),
        }
    }

    /// Only timeouts may be retried by simply trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SkError::Timeout)
    }

    /// Whether the current operation cannot continue. A malformed frame
    /// only spoils the response it came in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SkError::Timeout | SkError::MalformedFrame(_))
    }
}
