//! Core types shared by the LE host crates
//!
//! This contains the types that are used by both the GAP controller and the Security Manager. The
//! [`BluetoothDeviceAddress`] and the HCI status [`Error`](errors::Error) are used everywhere,
//! the [`cryptography`] module is only compiled in when the `cryptography` feature is enabled.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod buffer;
#[cfg(feature = "cryptography")]
pub mod cryptography;
pub mod errors;

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A Bluetooth device address
///
/// The address is stored in the order it is transferred over HCI, which is least significant
/// octet first. The `Display` implementation prints it the conventional way, most significant
/// octet first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl BluetoothDeviceAddress {
    pub const fn zeroed() -> Self {
        BluetoothDeviceAddress([0; 6])
    }

    /// Check if this address is all zeros
    pub fn is_zeroed(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Create an address from the conventional (most significant octet first) order
    pub fn from_be_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();

        BluetoothDeviceAddress(bytes)
    }

    /// Check if a random address is a resolvable private address
    ///
    /// The two most significant bits of a resolvable private address are `0b01`.
    pub fn is_resolvable(&self) -> bool {
        self.0[5] & 0xC0 == 0x40
    }

    /// Get the `prand` part of a resolvable private address
    pub fn prand(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// Get the `hash` part of a resolvable private address
    pub fn hash(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }
}

impl core::ops::Deref for BluetoothDeviceAddress {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; 6]> for BluetoothDeviceAddress {
    fn from(raw: [u8; 6]) -> Self {
        BluetoothDeviceAddress(raw)
    }
}

impl fmt::Display for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

/// The type of a Bluetooth device address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddressType {
    #[default]
    Public,
    Random,
    /// A public identity address resolved by the controller
    PublicIdentity,
    /// A random (static) identity address resolved by the controller
    RandomIdentity,
}

impl AddressType {
    pub fn into_val(self) -> u8 {
        match self {
            AddressType::Public => 0x0,
            AddressType::Random => 0x1,
            AddressType::PublicIdentity => 0x2,
            AddressType::RandomIdentity => 0x3,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, u8> {
        match val {
            0x0 => Ok(AddressType::Public),
            0x1 => Ok(AddressType::Random),
            0x2 => Ok(AddressType::PublicIdentity),
            0x3 => Ok(AddressType::RandomIdentity),
            _ => Err(val),
        }
    }

    /// Check if the address type is one of the random address types
    pub fn is_random(self) -> bool {
        match self {
            AddressType::Random | AddressType::RandomIdentity => true,
            AddressType::Public | AddressType::PublicIdentity => false,
        }
    }
}

/// A connection handle
///
/// Connection handles are assigned by the controller when a connection is established. Only the
/// lower twelve bits are valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionHandle(u16);

impl ConnectionHandle {
    pub const MAX: u16 = 0x0EFF;

    pub fn try_new(raw: u16) -> Result<Self, &'static str> {
        if raw <= Self::MAX {
            Ok(ConnectionHandle(raw))
        } else {
            Err("connection handle is larger than the maximum (0x0EFF)")
        }
    }

    pub fn get_raw_handle(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}", self.0)
    }
}
