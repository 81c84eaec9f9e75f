//! Encryption information related Security Manager packets
//!
//! These are the authentication requirement and key distribution fields of the pairing feature
//! exchange, and the PDUs used for distributing keys once the link is encrypted (Bluetooth
//! Specification v5.0 | Vol 3, Part H, section 3.6).

use super::*;

/// The authentication requirements field
///
/// This is kept as the raw octet so that the bits sent by the peer are reproduced exactly when
/// they are used as inputs to the confirm and check value functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AuthRequirements(u8);

impl AuthRequirements {
    pub const NO_BONDING: Self = AuthRequirements(0);
    pub const BONDING: Self = AuthRequirements(0b01);
    pub const MITM: Self = AuthRequirements(1 << 2);
    pub const SC: Self = AuthRequirements(1 << 3);
    pub const KEYPRESS: Self = AuthRequirements(1 << 4);
    pub const CT2: Self = AuthRequirements(1 << 5);

    pub fn from_val(val: u8) -> Self {
        AuthRequirements(val)
    }

    pub fn into_val(self) -> u8 {
        self.0
    }

    /// Check if all the requirements within `other` are set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if bonding is requested
    ///
    /// Only the value `0b01` of the two bit bonding flags field means bonding.
    pub fn is_bonding(self) -> bool {
        self.0 & 0b11 == 0b01
    }
}

impl core::ops::BitOr for AuthRequirements {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        AuthRequirements(self.0 | rhs.0)
    }
}

/// Type of Key Distributions
///
/// See the security manager key distribution and generation section of the Bluetooth
/// Specification (v5.0 | vol 3, Part H, section 3.6.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyDistributions(u8);

impl KeyDistributions {
    pub const NONE: Self = KeyDistributions(0);
    /// The LTK, EDIV, and Rand (legacy pairing only)
    pub const ENC_KEY: Self = KeyDistributions(1 << 0);
    /// The IRK and identity address
    pub const ID_KEY: Self = KeyDistributions(1 << 1);
    /// The CSRK
    pub const SIGN_KEY: Self = KeyDistributions(1 << 2);
    /// Derive a BR/EDR link key (Secure Connections only)
    pub const LINK_KEY: Self = KeyDistributions(1 << 3);
    pub const ALL: Self = KeyDistributions(0xF);

    pub fn from_val(val: u8) -> Self {
        KeyDistributions(val)
    }

    pub fn into_val(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }

    /// Get the keys within both `self` and `other`
    pub fn intersect(self, other: Self) -> Self {
        KeyDistributions(self.0 & other.0)
    }

    /// Remove the keys of `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0
    }

    /// Get the keys that are sent in PDUs during the key distribution phase
    pub(crate) fn distributed(self, is_secure_connection: bool) -> Self {
        if is_secure_connection {
            KeyDistributions(self.0 & (Self::ID_KEY.0 | Self::SIGN_KEY.0))
        } else {
            KeyDistributions(self.0 & (Self::ENC_KEY.0 | Self::ID_KEY.0 | Self::SIGN_KEY.0))
        }
    }
}

impl core::ops::BitOr for KeyDistributions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        KeyDistributions(self.0 | rhs.0)
    }
}

fn u128_from_icd(icd: &[u8]) -> Result<u128, Error> {
    let bytes: [u8; 16] = icd.try_into().map_err(|_| Error::Size)?;

    Ok(<u128>::from_le_bytes(bytes))
}

/// Encryption Information
///
/// Contains the LTK distributed during legacy pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInformation {
    long_term_key: u128,
}

impl CommandData for EncryptionInformation {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.long_term_key.to_le_bytes())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        Ok(EncryptionInformation {
            long_term_key: u128_from_icd(icd)?,
        })
    }
}

impl EncryptionInformation {
    pub fn new(long_term_key: u128) -> Self {
        EncryptionInformation { long_term_key }
    }

    pub fn get_long_term_key(&self) -> u128 {
        self.long_term_key
    }
}

/// Master Identification
///
/// Contains the EDIV and Rand values that are used to identify the LTK sent within a
/// [`EncryptionInformation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterIdentification {
    ediv: u16,
    rand: u64,
}

impl CommandData for MasterIdentification {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.ediv.to_le_bytes())?;

        extend(buffer, &self.rand.to_le_bytes())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 10 {
            let mut ediv = [0u8; 2];
            let mut rand = [0u8; 8];

            ediv.copy_from_slice(&icd[..2]);
            rand.copy_from_slice(&icd[2..]);

            Ok(MasterIdentification {
                ediv: <u16>::from_le_bytes(ediv),
                rand: <u64>::from_le_bytes(rand),
            })
        } else {
            Err(Error::Size)
        }
    }
}

impl MasterIdentification {
    pub fn new(ediv: u16, rand: u64) -> Self {
        MasterIdentification { ediv, rand }
    }

    pub fn get_ediv(&self) -> u16 {
        self.ediv
    }

    pub fn get_rand(&self) -> u64 {
        self.rand
    }
}

/// Identity Information
///
/// Contains the Identity Resolving Key (IRK).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityInformation {
    irk: u128,
}

impl CommandData for IdentityInformation {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.irk.to_le_bytes())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        Ok(IdentityInformation {
            irk: u128_from_icd(icd)?,
        })
    }
}

impl IdentityInformation {
    pub fn new(irk: u128) -> Self {
        IdentityInformation { irk }
    }

    pub fn get_irk(&self) -> u128 {
        self.irk
    }
}

/// Identity Address Information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityAddressInformation {
    address: IdentityAddress,
}

impl CommandData for IdentityAddressInformation {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        let address_type = if self.address.is_public() { 0 } else { 1 };

        push(buffer, address_type)?;

        extend(buffer, &self.address.get_address().0)
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 7 {
            let mut raw = [0u8; 6];

            raw.copy_from_slice(&icd[1..]);

            let address = match icd[0] {
                0 => IdentityAddress::Public(BluetoothDeviceAddress(raw)),
                1 => IdentityAddress::StaticRandom(BluetoothDeviceAddress(raw)),
                _ => return Err(Error::Value),
            };

            Ok(IdentityAddressInformation { address })
        } else {
            Err(Error::Size)
        }
    }
}

impl IdentityAddressInformation {
    pub fn new(address: IdentityAddress) -> Self {
        IdentityAddressInformation { address }
    }

    pub fn get_address(&self) -> IdentityAddress {
        self.address
    }
}

/// Signing Information
///
/// Contains the Connection Signature Resolving Key (CSRK).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningInformation {
    csrk: u128,
}

impl CommandData for SigningInformation {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.csrk.to_le_bytes())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        Ok(SigningInformation {
            csrk: u128_from_icd(icd)?,
        })
    }
}

impl SigningInformation {
    pub fn new(csrk: u128) -> Self {
        SigningInformation { csrk }
    }

    pub fn get_csrk(&self) -> u128 {
        self.csrk
    }
}

/// Security Request
///
/// Sent by the responding device to ask the initiating device to start pairing (or to encrypt
/// with a previously distributed LTK).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRequest {
    auth_req: AuthRequirements,
}

impl CommandData for SecurityRequest {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        push(buffer, self.auth_req.into_val())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        match icd {
            [auth_req] => Ok(SecurityRequest {
                auth_req: AuthRequirements::from_val(*auth_req),
            }),
            _ => Err(Error::Size),
        }
    }
}

impl SecurityRequest {
    pub fn new(auth_req: AuthRequirements) -> Self {
        SecurityRequest { auth_req }
    }

    pub fn get_auth_req(&self) -> AuthRequirements {
        self.auth_req
    }
}
