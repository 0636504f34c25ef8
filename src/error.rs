//! Error taxonomy and the single error-reporting funnel.
//!
//! Nothing in the transport raises to its caller for a failed inbound
//! envelope. Failures become an [`ErrorReport`] handed to the
//! [`ErrorReporter`] installed in the [`crate::context::AppContext`].

use kernel_chat_protocol::{MessageId, ProtocolError};
use serde_json::Value;
use thiserror::Error;

/// Failures of a [`crate::instance::ChatInstance`] mutation. The instance is
/// left exactly as it was.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("message '{0}' is not in the log")]
    UnknownMessage(MessageId),

    #[error("message '{0}' is already in the log")]
    DuplicateMessage(MessageId),
}

/// Failure while handling one inbound envelope.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The envelope could not be decoded.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// The `operation` tag is not part of the inbound catalog.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// A known operation arrived on the wrong kind of instance (a
    /// conversation operation on `<meta>`, or a meta operation on a
    /// conversation).
    #[error("operation '{operation}' is not valid for instance '{instance}'")]
    UnexpectedOperation { operation: String, instance: String },

    #[error(transparent)]
    Instance(#[from] InstanceError),
}

impl From<ProtocolError> for DispatchError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::UnknownOperation(operation) => DispatchError::UnknownOperation(operation),
            other => DispatchError::Protocol(other),
        }
    }
}

/// Top-level error type of the client.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No live kernel session when one was required.
    #[error("no live kernel session: {0}")]
    Connection(String),

    /// A conversation name the registry does not hold.
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),

    /// The kernel-side init script reported that the backend module is
    /// unavailable.
    #[error("kernel init script failed: {ename}: {evalue}")]
    InitScript {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },

    /// Handling an inbound envelope failed.
    #[error("failed to handle '{operation}' envelope: {source}")]
    Dispatch {
        operation: String,
        #[source]
        source: DispatchError,
    },

    /// The backend reported that one of our commands failed.
    #[error("backend command '{command}' failed: {message}")]
    Backend { command: String, message: String },

    /// Instance creation refused by the configured mode restriction.
    #[error("instance mode '{0}' is not allowed")]
    ModeNotAllowed(String),
}

/// One reported failure with the place it surfaced and the data involved.
#[derive(Debug)]
pub struct ErrorReport {
    pub error: ChatError,
    /// Function or handler the failure surfaced in.
    pub origin: &'static str,
    /// Raw payloads relevant to the failure (usually the inbound envelope).
    pub context: Vec<Value>,
}

/// Sink for every reported failure.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// Default reporter: writes each report to the log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, report: ErrorReport) {
        if report.context.is_empty() {
            log::error!("[{}] {}", report.origin, report.error);
        } else {
            let context: Vec<String> = report.context.iter().map(Value::to_string).collect();
            log::error!(
                "[{}] {} (context: {})",
                report.origin,
                report.error,
                context.join(", ")
            );
        }
    }
}
