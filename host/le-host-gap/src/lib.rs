//! Generic Access Profile
//!
//! This is the LE part of the Generic Access Profile. The [`GapController`] manages advertising
//! and scanning of the local device: the advertising data, the discoverable and connectable
//! modes, observation and discovery of other devices, and the timers that go along with them.
//!
//! The controller does not talk to the Bluetooth controller directly. Commands, timers, and
//! results go through a user implemented [`GapEnvironment`], and the events from the Bluetooth
//! controller are fed back into the methods prefixed with `on_`.
//!
//! [`GapController`]: controller::GapController
//! [`GapEnvironment`]: controller::GapEnvironment

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod advertising_data;
pub mod assigned;
pub mod cache;
pub mod config;
pub mod controller;
pub mod hci;
pub mod time_consts;
pub mod topology;

pub use le_host_core::BluetoothDeviceAddress;

/// Errors of the GAP operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A parameter is out of range or the controller does not support LE
    IllegalValue,
    /// The operation conflicts with the current state of the controller
    WrongMode,
    /// A mutually exclusive operation is in progress
    Busy,
    /// The command could not be sent to the controller
    NoResources,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::IllegalValue => f.write_str("illegal value"),
            Error::WrongMode => f.write_str("operation not allowed in the current mode"),
            Error::Busy => f.write_str("another operation is in progress"),
            Error::NoResources => f.write_str("the command could not be sent to the controller"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
