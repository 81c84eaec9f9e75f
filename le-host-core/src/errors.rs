//! HCI status codes
//!
//! Every command complete and command status event carries a status code. The GAP controller and
//! the Security Manager receive these codes through their completion entry points and convert
//! them into an [`Error`] so they can be logged by name.

use core::fmt::{self, Debug, Display, Formatter};

/// A Controller Error
///
/// `Error` covers the controller error codes from volume one part F of the Bluetooth core
/// specification that an LE host is expected to handle. Any other code is kept as
/// `Unknown(code)`.
///
/// ### `NoError`
/// Created from the status code zero. A status of zero is not an error, but it is convenient to
/// have every status map to a variant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    NoError,
    Unknown(u8),
    UnknownHciCommand,
    UnknownConnectionIdentifier,
    HardwareFailure,
    AuthenticationFailure,
    PinOrKeyMissing,
    MemoryCapacityExceeded,
    ConnectionTimeout,
    ConnectionLimitExceeded,
    CommandDisallowed,
    ConnectionRejectedDueToLimitedResources,
    UnsupportedFeatureOrParameterValue,
    InvalidHciCommandParameters,
    RemoteUserTerminatedConnection,
    ConnectionTerminatedByLocalHost,
    RepeatedAttempts,
    PairingNotAllowed,
    UnspecifiedError,
    InsufficientSecurity,
    ControllerBusy,
    AdvertisingTimeout,
    ConnectionTerminatedDueToMicFailure,
    LimitReached,
    OperationCancelledByHost,
}

impl Error {
    /// Convert a status code into an `Error`
    pub fn from(raw: u8) -> Self {
        match raw {
            0x00 => Error::NoError,
            0x01 => Error::UnknownHciCommand,
            0x02 => Error::UnknownConnectionIdentifier,
            0x03 => Error::HardwareFailure,
            0x05 => Error::AuthenticationFailure,
            0x06 => Error::PinOrKeyMissing,
            0x07 => Error::MemoryCapacityExceeded,
            0x08 => Error::ConnectionTimeout,
            0x09 => Error::ConnectionLimitExceeded,
            0x0C => Error::CommandDisallowed,
            0x0D => Error::ConnectionRejectedDueToLimitedResources,
            0x11 => Error::UnsupportedFeatureOrParameterValue,
            0x12 => Error::InvalidHciCommandParameters,
            0x13 => Error::RemoteUserTerminatedConnection,
            0x16 => Error::ConnectionTerminatedByLocalHost,
            0x17 => Error::RepeatedAttempts,
            0x18 => Error::PairingNotAllowed,
            0x1F => Error::UnspecifiedError,
            0x2F => Error::InsufficientSecurity,
            0x3A => Error::ControllerBusy,
            0x3C => Error::AdvertisingTimeout,
            0x3D => Error::ConnectionTerminatedDueToMicFailure,
            0x43 => Error::LimitReached,
            0x44 => Error::OperationCancelledByHost,
            _ => Error::Unknown(raw),
        }
    }

    /// Get the status code
    pub fn get_val(&self) -> u8 {
        match *self {
            Error::NoError => 0x00,
            Error::Unknown(val) => val,
            Error::UnknownHciCommand => 0x01,
            Error::UnknownConnectionIdentifier => 0x02,
            Error::HardwareFailure => 0x03,
            Error::AuthenticationFailure => 0x05,
            Error::PinOrKeyMissing => 0x06,
            Error::MemoryCapacityExceeded => 0x07,
            Error::ConnectionTimeout => 0x08,
            Error::ConnectionLimitExceeded => 0x09,
            Error::CommandDisallowed => 0x0C,
            Error::ConnectionRejectedDueToLimitedResources => 0x0D,
            Error::UnsupportedFeatureOrParameterValue => 0x11,
            Error::InvalidHciCommandParameters => 0x12,
            Error::RemoteUserTerminatedConnection => 0x13,
            Error::ConnectionTerminatedByLocalHost => 0x16,
            Error::RepeatedAttempts => 0x17,
            Error::PairingNotAllowed => 0x18,
            Error::UnspecifiedError => 0x1F,
            Error::InsufficientSecurity => 0x2F,
            Error::ControllerBusy => 0x3A,
            Error::AdvertisingTimeout => 0x3C,
            Error::ConnectionTerminatedDueToMicFailure => 0x3D,
            Error::LimitReached => 0x43,
            Error::OperationCancelledByHost => 0x44,
        }
    }

    /// Check if the status is `NoError`
    pub fn is_ok(&self) -> bool {
        *self == Error::NoError
    }

    pub fn ok_or_else<F, E>(self, err: F) -> Result<(), E>
    where
        F: FnOnce(Self) -> E,
    {
        if let Error::NoError = self {
            Ok(())
        } else {
            Err(err(self))
        }
    }

    fn name(&self) -> &'static str {
        match *self {
            Error::NoError => "NoError",
            Error::Unknown(_) => "Unknown",
            Error::UnknownHciCommand => "UnknownHciCommand",
            Error::UnknownConnectionIdentifier => "UnknownConnectionIdentifier",
            Error::HardwareFailure => "HardwareFailure",
            Error::AuthenticationFailure => "AuthenticationFailure",
            Error::PinOrKeyMissing => "PinOrKeyMissing",
            Error::MemoryCapacityExceeded => "MemoryCapacityExceeded",
            Error::ConnectionTimeout => "ConnectionTimeout",
            Error::ConnectionLimitExceeded => "ConnectionLimitExceeded",
            Error::CommandDisallowed => "CommandDisallowed",
            Error::ConnectionRejectedDueToLimitedResources => "ConnectionRejectedDueToLimitedResources",
            Error::UnsupportedFeatureOrParameterValue => "UnsupportedFeatureOrParameterValue",
            Error::InvalidHciCommandParameters => "InvalidHciCommandParameters",
            Error::RemoteUserTerminatedConnection => "RemoteUserTerminatedConnection",
            Error::ConnectionTerminatedByLocalHost => "ConnectionTerminatedByLocalHost",
            Error::RepeatedAttempts => "RepeatedAttempts",
            Error::PairingNotAllowed => "PairingNotAllowed",
            Error::UnspecifiedError => "UnspecifiedError",
            Error::InsufficientSecurity => "InsufficientSecurity",
            Error::ControllerBusy => "ControllerBusy",
            Error::AdvertisingTimeout => "AdvertisingTimeout",
            Error::ConnectionTerminatedDueToMicFailure => "ConnectionTerminatedDueToMicFailure",
            Error::LimitReached => "LimitReached",
            Error::OperationCancelledByHost => "OperationCancelledByHost",
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} (0x{:X})", self.name(), self.get_val())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
