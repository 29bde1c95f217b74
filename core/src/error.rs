#![deny(unsafe_code)]
//! ADU engine error types

/// Errors returned by the ADU workflow engine
///
/// Every public operation returns one of these synchronously. None of them
/// are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AduError {
    /// A required input was empty or out of its documented bounds
    InvalidArgument,
    /// Malformed JSON, wrong value types, or a bounded array overflowed
    ParseFailed,
    /// Manifest signature or key chain could not be validated
    ///
    /// Bad signatures, unknown root keys and unsupported algorithms all map
    /// to this variant.
    AuthenticationFailed,
    /// Output or scratch buffer too small
    InsufficientBuffer,
    /// The twin transport refused the reported-properties publish
    PublishFailed,
    /// Agent state transition attempted out of order
    InvalidState,
}

impl core::fmt::Display for AduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::ParseFailed => write!(f, "Parse failed"),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::InsufficientBuffer => write!(f, "Insufficient buffer"),
            Self::PublishFailed => write!(f, "Publish failed"),
            Self::InvalidState => write!(f, "Invalid agent state"),
        }
    }
}

impl core::error::Error for AduError {}
