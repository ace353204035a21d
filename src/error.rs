//! Error types for the FIX session engine
//!
//! This module centralizes all error types produced by the codec, sequence
//! manager, dispatcher, and session owner, making error handling consistent
//! across the crate.

use thiserror::Error;

use crate::sequence::SequenceStream;

/// Errors that can occur while running a FIX session.
///
/// The `#[error]` attribute comes from the `thiserror` crate, which
/// eliminates boilerplate by automatically implementing `std::error::Error`
/// and `Display` for the enum. The `#[error("...")]` attribute tells
/// thiserror what message to display when the error is printed.
///
/// # Error Categories
///
/// - **Framing errors**: `FrameCorrupt`
/// - **Connectivity errors**: `TransportError`, `ConnectionTimeout`, `TestRequestTimeout`
/// - **Protocol errors**: `SequenceMismatch`, `ProtocolReject`, `AuthFailure`
/// - **Precondition errors**: `NotConnected`, `NotLoggedIn`
#[derive(Debug, Error)]
pub enum FixError {
    /// A frame failed checksum or BodyLength verification, or a tag=value
    /// pair could not be parsed.
    #[error("frame corrupt: {0}")]
    FrameCorrupt(String),

    /// The transport failed to read, write, or connect.
    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    /// `connect()` did not finish opening the transport before `connectTimeoutMs`.
    #[error("connection timed out after {0}ms")]
    ConnectionTimeout(u64),

    /// A server Reject or Logout referenced a MsgSeqNum the engine did not expect.
    #[error("sequence mismatch on {stream:?}: expected {expected}, got {actual}")]
    SequenceMismatch {
        stream: SequenceStream,
        expected: u64,
        actual: u64,
    },

    /// The server logged the session out immediately after Logon with no
    /// sequence-error text: credentials or session parameters were rejected.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The server sent a Reject (35=3) not attributable to a sequence error.
    #[error("protocol reject: {0}")]
    ProtocolReject(String),

    /// `testRequestsOutstanding` exceeded `maxTestRequestRetries`.
    #[error("test request timeout: {0} consecutive requests unanswered")]
    TestRequestTimeout(u32),

    /// A public request method was called while the session was not connected.
    #[error("not connected")]
    NotConnected,

    /// A public request method was called while the session was not logged on.
    #[error("not logged in")]
    NotLoggedIn,

    /// A required configuration value was missing from the environment.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
}

impl FixError {
    /// True for errors that leave the session alive and able to continue
    /// processing (logged at `warn`, per the error-handling design).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FixError::FrameCorrupt(_)
                | FixError::SequenceMismatch { .. }
                | FixError::ProtocolReject(_)
                | FixError::TestRequestTimeout(_)
        )
    }

    /// True for errors that force a disconnect (logged at `error`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FixError::TransportError(_) | FixError::AuthFailure(_) | FixError::ConnectionTimeout(_)
        )
    }

    /// True for errors raised synchronously by a public request method
    /// without mutating session state.
    pub fn is_precondition(&self) -> bool {
        matches!(self, FixError::NotConnected | FixError::NotLoggedIn)
    }
}
