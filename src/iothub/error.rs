//! Error types for the hub transport.

use crate::network::error::Error as NetworkError;

/// Result alias used throughout the hub transport.
pub type IotHubResult<T> = Result<T, Error>;

/// Errors returned by the hub transport's synchronous operations.
///
/// Delivery failures are never reported here; they reach the application
/// through each message's completion callback.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An argument was out of range or of the wrong type.
    InvalidArgument,
    /// The client configuration is inconsistent.
    InvalidConfig,
    /// A fixed-capacity buffer was too small.
    CapacityExceeded,
    /// The device identity does not match the one the transport was created with.
    DeviceMismatch,
    /// A device is already registered on this transport.
    AlreadyRegistered,
    /// A key-derived token was needed but the clock has no wall time.
    ClockUnavailable,
    /// The SAS token could not be produced.
    Credential,
    /// A byte-stream or protocol failure.
    Network(NetworkError),
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::Network(e)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::InvalidArgument => defmt::write!(f, "InvalidArgument"),
            Error::InvalidConfig => defmt::write!(f, "InvalidConfig"),
            Error::CapacityExceeded => defmt::write!(f, "CapacityExceeded"),
            Error::DeviceMismatch => defmt::write!(f, "DeviceMismatch"),
            Error::AlreadyRegistered => defmt::write!(f, "AlreadyRegistered"),
            Error::ClockUnavailable => defmt::write!(f, "ClockUnavailable"),
            Error::Credential => defmt::write!(f, "Credential"),
            Error::Network(e) => defmt::write!(f, "Network({})", e),
        }
    }
}
