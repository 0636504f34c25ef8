//! Typed errors for reading the wire format.

use thiserror::Error;

/// Errors produced while decoding a record received over the comm channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope lacks one of its routing fields (`operation`, `instance`).
    #[error("envelope is missing the '{0}' field")]
    MissingField(&'static str),

    /// The `operation` tag is not part of the inbound catalog.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// The envelope names a known operation but its payload does not match the
    /// expected shape.
    #[error("malformed '{operation}' envelope: {source}")]
    Malformed {
        /// Operation tag of the offending envelope.
        operation: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// An integer-coded attribute carried a value outside its closed set.
    #[error("invalid {field} value {value}")]
    InvalidDiscriminant {
        /// Attribute name (`display`, `kernelProcess`, ...).
        field: &'static str,
        /// Value received on the wire.
        value: u8,
    },
}
