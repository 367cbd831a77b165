//! Interaction-level errors carried in error message bodies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// MAL standard error numbers, plus service-defined ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Message could not be delivered.
    DeliveryFailed,
    /// No reply arrived within the configured deadline.
    DeliveryTimeout,
    /// Message delivery is delayed.
    DeliveryDelayed,
    /// Destination endpoint or provider is not known.
    DestinationUnknown,
    /// Destination is temporarily unreachable.
    DestinationTransient,
    /// Destination is permanently unreachable.
    DestinationLost,
    /// Authentication failed.
    AuthenticationFail,
    /// Access control refused the message.
    AuthorisationFail,
    /// Encryption failed.
    EncryptionFail,
    /// Service area not supported by the provider.
    UnsupportedArea,
    /// Service area version not supported by the provider.
    UnsupportedAreaVersion,
    /// Service not supported by the provider.
    UnsupportedService,
    /// Operation not supported by the provider.
    UnsupportedOperation,
    /// Body could not be decoded.
    BadEncoding,
    /// Unexpected failure inside the middleware or provider.
    Internal,
    /// Unknown item.
    Unknown,
    /// Message arrived in a state that does not accept it.
    IncorrectState,
    /// Too many items.
    TooMany,
    /// Component is shutting down.
    Shutdown,
    /// Service-defined error number.
    Other(u32),
}

impl ErrorCode {
    /// The error number as carried on the wire.
    pub const fn number(self) -> u32 {
        match self {
            Self::DeliveryFailed => 65536,
            Self::DeliveryTimeout => 65537,
            Self::DeliveryDelayed => 65538,
            Self::DestinationUnknown => 65539,
            Self::DestinationTransient => 65540,
            Self::DestinationLost => 65541,
            Self::AuthenticationFail => 65542,
            Self::AuthorisationFail => 65543,
            Self::EncryptionFail => 65544,
            Self::UnsupportedArea => 65545,
            Self::UnsupportedAreaVersion => 65546,
            Self::UnsupportedService => 65547,
            Self::UnsupportedOperation => 65548,
            Self::BadEncoding => 65549,
            Self::Internal => 65550,
            Self::Unknown => 65551,
            Self::IncorrectState => 65552,
            Self::TooMany => 65553,
            Self::Shutdown => 65554,
            Self::Other(number) => number,
        }
    }

    /// Maps a wire number back to a code; unrecognised numbers become `Other`.
    pub const fn from_number(number: u32) -> Self {
        match number {
            65536 => Self::DeliveryFailed,
            65537 => Self::DeliveryTimeout,
            65538 => Self::DeliveryDelayed,
            65539 => Self::DestinationUnknown,
            65540 => Self::DestinationTransient,
            65541 => Self::DestinationLost,
            65542 => Self::AuthenticationFail,
            65543 => Self::AuthorisationFail,
            65544 => Self::EncryptionFail,
            65545 => Self::UnsupportedArea,
            65546 => Self::UnsupportedAreaVersion,
            65547 => Self::UnsupportedService,
            65548 => Self::UnsupportedOperation,
            65549 => Self::BadEncoding,
            65550 => Self::Internal,
            65551 => Self::Unknown,
            65552 => Self::IncorrectState,
            65553 => Self::TooMany,
            65554 => Self::Shutdown,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(number) => write!(f, "{number}"),
            code => write!(f, "{code:?} ({})", code.number()),
        }
    }
}

/// An error number with optional extra information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardError {
    /// The error number.
    pub code: ErrorCode,
    /// Free-form detail for diagnostics.
    pub extra_info: Option<String>,
}

impl StandardError {
    /// Creates an error without extra information.
    pub const fn new(code: ErrorCode) -> Self {
        Self {
            code,
            extra_info: None,
        }
    }

    /// Creates an error carrying a diagnostic message.
    pub fn with_info(code: ErrorCode, info: impl Into<String>) -> Self {
        Self {
            code,
            extra_info: Some(info.into()),
        }
    }

    /// Shorthand for an `INTERNAL` error.
    pub fn internal(info: impl Into<String>) -> Self {
        Self::with_info(ErrorCode::Internal, info)
    }
}

impl fmt::Display for StandardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.extra_info {
            Some(info) => write!(f, "{}: {info}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for StandardError {}
