//! Bluetooth LE Security Manager
//!
//! The Security Manager is used to manage the pairing process and key distribution (bonding)
//! between two connected devices. There is one [`SecurityManager`] for the local radio, it keeps a
//! pairing control block for every connection that is pairing (or has paired) with it.
//!
//! The security manager never performs I/O itself. PDUs to send and keys that are generated are
//! given to the user as [`SecurityManagerEvent`]s, and random numbers (plus optionally AES
//! encryption) are requested from the controller through the [`SmController`] trait. The results
//! of these requests are fed back in through [`on_rand_complete`] and [`on_encrypt_complete`].
//!
//! ## Pairing Methods
//!
//! # Just Works
//! Just works is the simplest form of pairing as it provides no security against a man in the
//! middle attack. It is used whenever neither device requires man in the middle protection.
//!
//! # Numeric Comparison
//! Both devices display a six digit number and the user confirms on both devices that they are
//! the same. This is only available with LE Secure Connections.
//!
//! # Passkey
//! One device displays a six digit passkey and the user enters it on the other device (or the
//! user enters the same passkey on both devices).
//!
//! # Out of Band
//! Data is exchanged over a man in the middle protected channel that is out of scope for the
//! Bluetooth connection. For legacy pairing this is the temporary key, for LE Secure Connections
//! it is the confirm value and random created by [`SecurityManager::local_oob_data`].
//!
//! [`on_rand_complete`]: SecurityManager::on_rand_complete
//! [`on_encrypt_complete`]: SecurityManager::on_encrypt_complete
//!
//! # Note
//! This crate uses the following crates for parts of the encryption process.
//! * ['aes'](https://lib.rs/crates/aes)
//! * ['p256'](https://lib.rs/crates/p256)

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub use le_host_core::{BluetoothDeviceAddress, ConnectionHandle};

use le_host_core::buffer::LinearBuffer;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod config;
mod control_block;
pub mod encrypt_info;
mod legacy;
mod manager;
pub mod pairing;
mod secure;
pub mod toolbox;

pub use config::{AesSource, LocalIdentity, LocalOobData, RootKeys, ScOobData, SecuritySettings};
pub use control_block::{ConnectionInfo, EncryptStep, Phase, RandEncProcState, Role};
pub use manager::{KeyType, SecurityManager, SecurityManagerEvent, SmController};

/// The buffer containing a complete Security Manager PDU
pub type PduBuffer = LinearBuffer<65, u8>;

/// General error within the Security Manager Protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Incorrect Size
    Size,
    /// Incorrect Format
    Format,
    /// Incorrect Value
    Value,
    /// Incorrect Security Manager Command
    IncorrectCommand {
        expected: Option<CommandType>,
        received: CommandType,
    },
    /// There is no pairing control block for the connection
    UnknownConnection,
    /// An asynchronous request was issued while another was outstanding
    Busy,
    /// The controller rejected a request
    Controller(le_host_core::errors::Error),
    /// The input or operation is no longer valid to the scope of pairing
    Invalid,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::Size => f.write_str("size"),
            Error::Format => f.write_str("format"),
            Error::Value => f.write_str("value"),
            Error::IncorrectCommand { expected, received } => {
                write!(f, "incorrect command: {received}")?;

                if let Some(expected) = expected {
                    write!(f, ", expected command: {expected}")
                } else {
                    f.write_str(" as no command was expected")
                }
            }
            Error::UnknownConnection => f.write_str("no pairing information for the connection"),
            Error::Busy => f.write_str("a random or encryption request is already outstanding"),
            Error::Controller(e) => write!(f, "controller error: {e}"),
            Error::Invalid => f.write_str("the operation is no longer valid"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CommandType {
    PairingRequest,
    PairingResponse,
    PairingConfirm,
    PairingRandom,
    PairingFailed,
    EncryptionInformation,
    MasterIdentification,
    IdentityInformation,
    IdentityAddressInformation,
    SigningInformation,
    SecurityRequest,
    PairingPublicKey,
    PairingDHKeyCheck,
    PairingKeyPressNotification,
}

impl CommandType {
    pub fn into_val(self) -> u8 {
        match self {
            CommandType::PairingRequest => 0x1,
            CommandType::PairingResponse => 0x2,
            CommandType::PairingConfirm => 0x3,
            CommandType::PairingRandom => 0x4,
            CommandType::PairingFailed => 0x5,
            CommandType::EncryptionInformation => 0x6,
            CommandType::MasterIdentification => 0x7,
            CommandType::IdentityInformation => 0x8,
            CommandType::IdentityAddressInformation => 0x9,
            CommandType::SigningInformation => 0xa,
            CommandType::SecurityRequest => 0xb,
            CommandType::PairingPublicKey => 0xc,
            CommandType::PairingDHKeyCheck => 0xd,
            CommandType::PairingKeyPressNotification => 0xe,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(CommandType::PairingRequest),
            0x2 => Ok(CommandType::PairingResponse),
            0x3 => Ok(CommandType::PairingConfirm),
            0x4 => Ok(CommandType::PairingRandom),
            0x5 => Ok(CommandType::PairingFailed),
            0x6 => Ok(CommandType::EncryptionInformation),
            0x7 => Ok(CommandType::MasterIdentification),
            0x8 => Ok(CommandType::IdentityInformation),
            0x9 => Ok(CommandType::IdentityAddressInformation),
            0xa => Ok(CommandType::SigningInformation),
            0xb => Ok(CommandType::SecurityRequest),
            0xc => Ok(CommandType::PairingPublicKey),
            0xd => Ok(CommandType::PairingDHKeyCheck),
            0xe => Ok(CommandType::PairingKeyPressNotification),
            _ => Err(Error::Value),
        }
    }

    /// The size of the PDU, including the command code
    fn pdu_len(self) -> usize {
        match self {
            CommandType::PairingRequest | CommandType::PairingResponse => 7,
            CommandType::PairingConfirm | CommandType::PairingRandom => 17,
            CommandType::PairingFailed => 2,
            CommandType::EncryptionInformation => 17,
            CommandType::MasterIdentification => 11,
            CommandType::IdentityInformation => 17,
            CommandType::IdentityAddressInformation => 8,
            CommandType::SigningInformation => 17,
            CommandType::SecurityRequest => 2,
            CommandType::PairingPublicKey => 65,
            CommandType::PairingDHKeyCheck => 17,
            CommandType::PairingKeyPressNotification => 2,
        }
    }
}

impl core::fmt::Display for CommandType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            CommandType::PairingRequest => f.write_str("pairing request"),
            CommandType::PairingResponse => f.write_str("pairing response"),
            CommandType::PairingConfirm => f.write_str("pairing confirm"),
            CommandType::PairingRandom => f.write_str("pairing random"),
            CommandType::PairingFailed => f.write_str("pairing failed"),
            CommandType::EncryptionInformation => f.write_str("encryption information"),
            CommandType::MasterIdentification => f.write_str("master identification"),
            CommandType::IdentityInformation => f.write_str("identity information"),
            CommandType::IdentityAddressInformation => f.write_str("identity address information"),
            CommandType::SigningInformation => f.write_str("signing information"),
            CommandType::SecurityRequest => f.write_str("security request"),
            CommandType::PairingPublicKey => f.write_str("pairing public key"),
            CommandType::PairingDHKeyCheck => f.write_str("pairing Diffie Hellman key check"),
            CommandType::PairingKeyPressNotification => f.write_str("pairing key press notification"),
        }
    }
}

/// Command Data
///
/// A trait for converting to or from the format within a Security Manager Command PDU. The
/// command data does not include the command code.
trait CommandData
where
    Self: Sized,
{
    /// Write the command data to the end of `buffer`
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error>;

    /// Try to convert from command data
    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error>;
}

fn push(buffer: &mut PduBuffer, val: u8) -> Result<(), Error> {
    buffer.try_push(val).map_err(|_| Error::Size)
}

fn extend(buffer: &mut PduBuffer, vals: &[u8]) -> Result<(), Error> {
    buffer.try_extend_from_slice(vals).map_err(|_| Error::Size)
}

/// A Security Manager PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdu {
    PairingRequest(pairing::PairingFeatures),
    PairingResponse(pairing::PairingFeatures),
    PairingConfirm(pairing::PairingValue),
    PairingRandom(pairing::PairingValue),
    PairingFailed(pairing::PairingFailed),
    EncryptionInformation(encrypt_info::EncryptionInformation),
    MasterIdentification(encrypt_info::MasterIdentification),
    IdentityInformation(encrypt_info::IdentityInformation),
    IdentityAddressInformation(encrypt_info::IdentityAddressInformation),
    SigningInformation(encrypt_info::SigningInformation),
    SecurityRequest(encrypt_info::SecurityRequest),
    PairingPublicKey(pairing::PairingPubKey),
    PairingDHKeyCheck(pairing::PairingValue),
    PairingKeyPressNotification(pairing::KeyPressNotification),
}

impl Pdu {
    pub fn command_type(&self) -> CommandType {
        match self {
            Pdu::PairingRequest(_) => CommandType::PairingRequest,
            Pdu::PairingResponse(_) => CommandType::PairingResponse,
            Pdu::PairingConfirm(_) => CommandType::PairingConfirm,
            Pdu::PairingRandom(_) => CommandType::PairingRandom,
            Pdu::PairingFailed(_) => CommandType::PairingFailed,
            Pdu::EncryptionInformation(_) => CommandType::EncryptionInformation,
            Pdu::MasterIdentification(_) => CommandType::MasterIdentification,
            Pdu::IdentityInformation(_) => CommandType::IdentityInformation,
            Pdu::IdentityAddressInformation(_) => CommandType::IdentityAddressInformation,
            Pdu::SigningInformation(_) => CommandType::SigningInformation,
            Pdu::SecurityRequest(_) => CommandType::SecurityRequest,
            Pdu::PairingPublicKey(_) => CommandType::PairingPublicKey,
            Pdu::PairingDHKeyCheck(_) => CommandType::PairingDHKeyCheck,
            Pdu::PairingKeyPressNotification(_) => CommandType::PairingKeyPressNotification,
        }
    }

    /// Convert the PDU into the bytes sent over the Security Manager channel
    pub fn into_bytes(&self) -> Result<PduBuffer, Error> {
        let mut buffer = PduBuffer::new();

        push(&mut buffer, self.command_type().into_val())?;

        match self {
            Pdu::PairingRequest(d) | Pdu::PairingResponse(d) => d.into_command_format(&mut buffer)?,
            Pdu::PairingConfirm(d) | Pdu::PairingRandom(d) | Pdu::PairingDHKeyCheck(d) => {
                d.into_command_format(&mut buffer)?
            }
            Pdu::PairingFailed(d) => d.into_command_format(&mut buffer)?,
            Pdu::EncryptionInformation(d) => d.into_command_format(&mut buffer)?,
            Pdu::MasterIdentification(d) => d.into_command_format(&mut buffer)?,
            Pdu::IdentityInformation(d) => d.into_command_format(&mut buffer)?,
            Pdu::IdentityAddressInformation(d) => d.into_command_format(&mut buffer)?,
            Pdu::SigningInformation(d) => d.into_command_format(&mut buffer)?,
            Pdu::SecurityRequest(d) => d.into_command_format(&mut buffer)?,
            Pdu::PairingPublicKey(d) => d.into_command_format(&mut buffer)?,
            Pdu::PairingKeyPressNotification(d) => d.into_command_format(&mut buffer)?,
        }

        Ok(buffer)
    }

    /// Try to create a PDU from the bytes received over the Security Manager channel
    ///
    /// This rigidly checks the PDU. If the payload does not have a valid value for the command
    /// field or the payload length is incorrect for the command, an error is returned.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let command_type = CommandType::try_from_val(*bytes.first().ok_or(Error::Size)?)?;

        if bytes.len() != command_type.pdu_len() {
            log::error!(
                "(SM) received {} with an incorrect length of {}",
                command_type,
                bytes.len()
            );

            return Err(Error::Size);
        }

        let icd = &bytes[1..];

        let pdu = match command_type {
            CommandType::PairingRequest => Pdu::PairingRequest(CommandData::try_from_command_format(icd)?),
            CommandType::PairingResponse => Pdu::PairingResponse(CommandData::try_from_command_format(icd)?),
            CommandType::PairingConfirm => Pdu::PairingConfirm(CommandData::try_from_command_format(icd)?),
            CommandType::PairingRandom => Pdu::PairingRandom(CommandData::try_from_command_format(icd)?),
            CommandType::PairingFailed => Pdu::PairingFailed(CommandData::try_from_command_format(icd)?),
            CommandType::EncryptionInformation => {
                Pdu::EncryptionInformation(CommandData::try_from_command_format(icd)?)
            }
            CommandType::MasterIdentification => Pdu::MasterIdentification(CommandData::try_from_command_format(icd)?),
            CommandType::IdentityInformation => Pdu::IdentityInformation(CommandData::try_from_command_format(icd)?),
            CommandType::IdentityAddressInformation => {
                Pdu::IdentityAddressInformation(CommandData::try_from_command_format(icd)?)
            }
            CommandType::SigningInformation => Pdu::SigningInformation(CommandData::try_from_command_format(icd)?),
            CommandType::SecurityRequest => Pdu::SecurityRequest(CommandData::try_from_command_format(icd)?),
            CommandType::PairingPublicKey => Pdu::PairingPublicKey(CommandData::try_from_command_format(icd)?),
            CommandType::PairingDHKeyCheck => Pdu::PairingDHKeyCheck(CommandData::try_from_command_format(icd)?),
            CommandType::PairingKeyPressNotification => {
                Pdu::PairingKeyPressNotification(CommandData::try_from_command_format(icd)?)
            }
        };

        Ok(pdu)
    }
}

/// The identity address of an device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IdentityAddress {
    Public(BluetoothDeviceAddress),
    StaticRandom(BluetoothDeviceAddress),
}

impl IdentityAddress {
    /// Get the identity address
    pub fn get_address(&self) -> BluetoothDeviceAddress {
        match self {
            IdentityAddress::Public(address) => *address,
            IdentityAddress::StaticRandom(address) => *address,
        }
    }

    /// Check if the identity address is a public device address
    pub fn is_public(&self) -> bool {
        match self {
            IdentityAddress::Public(_) => true,
            IdentityAddress::StaticRandom(_) => false,
        }
    }

    /// Check if the identity address is a random device address
    pub fn is_random(&self) -> bool {
        !self.is_public()
    }
}

/// The LTK with the values that identify it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LongTermKey {
    pub ltk: u128,
    pub ediv: u16,
    pub rand: u64,
}

/// Keys from a completed pairing
///
/// These are the keys generated or received during pairing with a single peer device. Keys that
/// were not generated or distributed are `None`. With LE Secure Connections the same LTK is used
/// by both devices, with legacy pairing each device may distribute its own LTK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Keys {
    is_authenticated: bool,
    is_secure_connection: bool,
    key_size: usize,
    ltk: Option<LongTermKey>,
    csrk: Option<u128>,
    irk: Option<u128>,
    identity: Option<IdentityAddress>,
    peer_ltk: Option<LongTermKey>,
    peer_csrk: Option<u128>,
    peer_irk: Option<u128>,
    peer_identity: Option<IdentityAddress>,
    link_key: Option<u128>,
}

impl Keys {
    /// Check if the keys were created with man in the middle protection
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// Check if the keys were created with LE Secure Connections
    pub fn is_secure_connection(&self) -> bool {
        self.is_secure_connection
    }

    /// Get the negotiated encryption key size (in octets)
    pub fn get_key_size(&self) -> usize {
        self.key_size
    }

    /// Get the LTK of this device
    ///
    /// For LE Secure Connections this is the LTK derived during pairing, for legacy pairing it is
    /// the LTK this device distributed.
    pub fn get_ltk(&self) -> Option<LongTermKey> {
        self.ltk
    }

    pub fn get_csrk(&self) -> Option<u128> {
        self.csrk
    }

    pub fn get_irk(&self) -> Option<u128> {
        self.irk
    }

    pub fn get_identity(&self) -> Option<IdentityAddress> {
        self.identity
    }

    /// Get the LTK distributed by the peer (legacy pairing only)
    pub fn get_peer_ltk(&self) -> Option<LongTermKey> {
        self.peer_ltk
    }

    pub fn get_peer_csrk(&self) -> Option<u128> {
        self.peer_csrk
    }

    pub fn get_peer_irk(&self) -> Option<u128> {
        self.peer_irk
    }

    pub fn get_peer_identity(&self) -> Option<IdentityAddress> {
        self.peer_identity
    }

    /// Get the BR/EDR link key derived from the LTK
    pub fn get_link_key(&self) -> Option<u128> {
        self.link_key
    }
}
