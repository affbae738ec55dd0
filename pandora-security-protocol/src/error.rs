//! Error handling for the pairing bridge
//!
//! This module provides the error type shared by the bridge, the stack
//! adapters and the wire layer. Errors are converted from underlying library
//! errors using `thiserror`.
//!
//! ## Error Categories
//!
//! ### Session-fatal errors
//! Terminate the pairing stream with an error status after teardown:
//! - `ResourceBusy`: a second pairing session was attempted
//! - `MalformedAnswer`: an answer referenced an unresolvable peer
//! - `StackCommandFailure`: the Bluetooth stack rejected a command
//!
//! ### Terminal, non-error paths
//! - `Cancelled`: the client or transport tore the session down
//!
//! ### Permanent responses
//! - `Unimplemented`: the RPC exists only for contract compatibility
//!
//! ## Status Mapping
//!
//! Every error maps onto a [`tonic::Status`] with [`BridgeError::to_status`],
//! which is what the wire layer reports to clients.
//!
//! ```rust
//! use pandora_security_protocol::BridgeError;
//!
//! let status = BridgeError::ResourceBusy("pairing session already active".into()).to_status();
//! assert_eq!(status.code(), tonic::Code::ResourceExhausted);
//! ```

use thiserror::Error;
use tonic::{Code, Status};

/// Fixed message reported by RPCs that are present only at the interface boundary
pub const UNIMPLEMENTED_MESSAGE: &str = "Method not implemented!";

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while bridging pairing events
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Another pairing session already owns the stack's observer slot
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pandora_security_protocol::BridgeError;
    ///
    /// let error = BridgeError::ResourceBusy("observer already registered".to_string());
    /// assert_eq!(error.to_string(), "Resource busy: observer already registered");
    /// ```
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// An answer whose peer reference cannot be resolved to an address
    #[error("Malformed answer: {0}")]
    MalformedAnswer(String),

    /// A command issued against the Bluetooth stack failed
    #[error("Stack command failed: {0}")]
    StackCommandFailure(String),

    /// The operation is not implemented
    #[error("{}", UNIMPLEMENTED_MESSAGE)]
    Unimplemented,

    /// The session was cancelled by the client or the transport
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The client's answer stream failed
    #[error("Answer stream error: {0}")]
    AnswerStream(String),

    /// Invalid or malformed wire frame
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// A background task failed unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error (sockets, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// DBus error while talking to the Bluetooth daemon
    #[error("DBus error: {0}")]
    DBus(#[from] zbus::Error),
}

impl BridgeError {
    /// Check if this error terminates a pairing session with an error status
    ///
    /// `Cancelled` runs the same teardown but is a normal terminal path.
    ///
    /// ```rust
    /// use pandora_security_protocol::BridgeError;
    ///
    /// assert!(BridgeError::MalformedAnswer("empty cookie".into()).is_session_fatal());
    /// assert!(!BridgeError::Cancelled("client went away".into()).is_session_fatal());
    /// ```
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, BridgeError::Cancelled(_))
    }

    /// The status code reported to RPC clients for this error
    pub fn code(&self) -> Code {
        match self {
            BridgeError::ResourceBusy(_) => Code::ResourceExhausted,
            BridgeError::MalformedAnswer(_) | BridgeError::InvalidPacket(_) => {
                Code::InvalidArgument
            }
            BridgeError::Unimplemented => Code::Unimplemented,
            BridgeError::Cancelled(_) => Code::Cancelled,
            BridgeError::AnswerStream(_) => Code::Aborted,
            BridgeError::Io(_) => Code::Unavailable,
            BridgeError::StackCommandFailure(_)
            | BridgeError::Internal(_)
            | BridgeError::Json(_)
            | BridgeError::DBus(_) => Code::Internal,
        }
    }

    /// Convert into the status reported to RPC clients
    pub fn to_status(&self) -> Status {
        Status::new(self.code(), self.to_string())
    }

    /// Create a stack command failure from any displayable cause
    pub fn stack(msg: impl Into<String>) -> Self {
        BridgeError::StackCommandFailure(msg.into())
    }

    /// Create a malformed answer error
    pub fn malformed(msg: impl Into<String>) -> Self {
        BridgeError::MalformedAnswer(msg.into())
    }
}

impl From<BridgeError> for Status {
    fn from(error: BridgeError) -> Self {
        error.to_status()
    }
}
