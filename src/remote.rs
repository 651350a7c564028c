//! Remote service seam and failure classification.

use async_trait::async_trait;
use thiserror::Error;

use crate::{command::OutgoingCommand, types::Handle};

/// What the service returns for an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerConfirmation {
    /// Server-issued handle, present when the command created an entity.
    pub handle: Option<Handle>,
}

impl ServerConfirmation {
    /// Confirmation without a new handle.
    pub fn accepted() -> Self {
        Self::default()
    }

    /// Confirmation carrying the handle of a created entity.
    pub fn created(handle: impl Into<Handle>) -> Self {
        Self {
            handle: Some(handle.into()),
        }
    }
}

/// Failure reported by the remote service client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never reached the service.
    #[error("service unreachable: {0}")]
    Offline(String),
    /// The client gave up waiting.
    #[error("request timed out")]
    Timeout,
    /// The service failed or asked us to slow down.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Server message.
        message: String,
    },
    /// The service will never accept this mutation.
    #[error("rejected with {status}: {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Server message.
        message: String,
    },
}

impl RemoteError {
    /// Classifies an HTTP failure status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// True when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// True when only a reachability change is worth retrying on.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

/// Why a command was rolled back, as reported to its originator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The service rejected the command.
    #[error("command rejected: {0}")]
    Rejected(RemoteError),
    /// Transient failures exceeded the retry budget.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last failure seen.
        last: RemoteError,
    },
    /// The parent entity was never created on the server.
    #[error("parent handle {0} was never resolved")]
    UnresolvedParent(Handle),
}

/// Client for the remote social service.
///
/// Timeouts are the implementation's concern; it only has to report them as
/// [`RemoteError::Timeout`].
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Submits one command.
    async fn submit(&self, command: &OutgoingCommand) -> Result<ServerConfirmation, RemoteError>;
}
