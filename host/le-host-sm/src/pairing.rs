//! Pairing methods as specified in the Bluetooth Specification (v5.0 | vol 3, part H, section 3.5)

use super::encrypt_info::{AuthRequirements, KeyDistributions};
use super::*;

/// The range of valid encryption key sizes (in octets)
pub const ENCRYPTION_KEY_SIZE_RANGE: core::ops::RangeInclusive<usize> = 7..=16;

/// The IO Capabilities of a device as it relates to the pairing method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IoCapability {
    /// The device only contains a display
    DisplayOnly,
    /// The device contains a display with a method for the user to enter yes or no
    DisplayWithYesOrNo,
    /// The device only contains a keyboard
    KeyboardOnly,
    /// The device has no input or output for the user
    NoInputNoOutput,
    /// The device contains a keyboard and a display
    KeyboardDisplay,
}

impl IoCapability {
    pub fn into_val(self) -> u8 {
        match self {
            IoCapability::DisplayOnly => 0x0,
            IoCapability::DisplayWithYesOrNo => 0x1,
            IoCapability::KeyboardOnly => 0x2,
            IoCapability::NoInputNoOutput => 0x3,
            IoCapability::KeyboardDisplay => 0x4,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(IoCapability::DisplayOnly),
            0x1 => Ok(IoCapability::DisplayWithYesOrNo),
            0x2 => Ok(IoCapability::KeyboardOnly),
            0x3 => Ok(IoCapability::NoInputNoOutput),
            0x4 => Ok(IoCapability::KeyboardDisplay),
            _ => Err(Error::Value),
        }
    }
}

/// Flag if out of band data can be received
///
/// `AuthenticationDataFromRemoteDevicePresent` means that this device has out of band data from
/// the peer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OobDataFlag {
    AuthenticationDataNotPresent,
    AuthenticationDataFromRemoteDevicePresent,
}

impl OobDataFlag {
    pub fn into_val(self) -> u8 {
        match self {
            OobDataFlag::AuthenticationDataNotPresent => 0x0,
            OobDataFlag::AuthenticationDataFromRemoteDevicePresent => 0x1,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(OobDataFlag::AuthenticationDataNotPresent),
            0x1 => Ok(OobDataFlag::AuthenticationDataFromRemoteDevicePresent),
            _ => Err(Error::Value),
        }
    }

    pub fn is_present(self) -> bool {
        self == OobDataFlag::AuthenticationDataFromRemoteDevicePresent
    }
}

/// The feature exchange of a *pairing request* or *pairing response*
///
/// Both PDUs have the same format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    io_capability: IoCapability,
    oob_data_flag: OobDataFlag,
    auth_req: AuthRequirements,
    max_encryption_size: usize,
    initiator_key_distribution: KeyDistributions,
    responder_key_distribution: KeyDistributions,
}

impl CommandData for PairingFeatures {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.raw())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        log::trace!("(SM) received pairing features: {:x?}", icd);

        if let [io, oob, auth_req, max_size, init_dist, resp_dist] = *icd {
            Ok(Self {
                io_capability: IoCapability::try_from_val(io)?,
                oob_data_flag: OobDataFlag::try_from_val(oob)?,
                auth_req: AuthRequirements::from_val(auth_req),
                max_encryption_size: if ENCRYPTION_KEY_SIZE_RANGE.contains(&(max_size as usize)) {
                    max_size as usize
                } else {
                    return Err(Error::Value);
                },
                initiator_key_distribution: KeyDistributions::from_val(init_dist),
                responder_key_distribution: KeyDistributions::from_val(resp_dist),
            })
        } else {
            log::error!("(SM) failed to generate 'pairing features' from raw data");
            log::trace!("(SM) failed raw data: '{:x?}'", icd);
            Err(Error::Size)
        }
    }
}

impl PairingFeatures {
    /// Create a new `PairingFeatures`
    ///
    /// `max_encryption_size` is clamped to the range of valid encryption key sizes.
    pub fn new(
        io_capability: IoCapability,
        oob_data_flag: OobDataFlag,
        auth_req: AuthRequirements,
        max_encryption_size: usize,
        initiator_key_distribution: KeyDistributions,
        responder_key_distribution: KeyDistributions,
    ) -> Self {
        let max_encryption_size = max_encryption_size.clamp(
            *ENCRYPTION_KEY_SIZE_RANGE.start(),
            *ENCRYPTION_KEY_SIZE_RANGE.end(),
        );

        PairingFeatures {
            io_capability,
            oob_data_flag,
            auth_req,
            max_encryption_size,
            initiator_key_distribution,
            responder_key_distribution,
        }
    }

    pub fn get_io_capability(&self) -> IoCapability {
        self.io_capability
    }

    pub fn get_oob_data_flag(&self) -> OobDataFlag {
        self.oob_data_flag
    }

    pub fn get_auth_req(&self) -> AuthRequirements {
        self.auth_req
    }

    pub fn get_max_encryption_size(&self) -> usize {
        self.max_encryption_size
    }

    pub fn get_initiator_key_distribution(&self) -> KeyDistributions {
        self.initiator_key_distribution
    }

    pub fn get_responder_key_distribution(&self) -> KeyDistributions {
        self.responder_key_distribution
    }

    fn raw(&self) -> [u8; 6] {
        [
            self.io_capability.into_val(),
            self.oob_data_flag.into_val(),
            self.auth_req.into_val(),
            self.max_encryption_size as u8,
            self.initiator_key_distribution.into_val(),
            self.responder_key_distribution.into_val(),
        ]
    }

    /// Get the `preq` or `pres` input of the [`c1`] toolbox function
    ///
    /// The value is the PDU (including the command code) as a little-endian number.
    ///
    /// [`c1`]: toolbox::c1
    pub fn c1_value(&self, command_type: CommandType) -> u128 {
        let mut bytes = [0u8; 16];

        bytes[0] = command_type.into_val();

        bytes[1..7].copy_from_slice(&self.raw());

        <u128>::from_le_bytes(bytes)
    }

    /// Get the IOcap (not the IO capabilities)
    ///
    /// This is the IOcapA/IOcapB value that is used as part of the [`f6`] toolbox function.
    ///
    /// [`f6`]: toolbox::f6
    pub fn get_io_cap(&self) -> [u8; 3] {
        [
            self.auth_req.into_val(),
            self.oob_data_flag.into_val(),
            self.io_capability.into_val(),
        ]
    }
}

/// A *pairing confirm* or a *pairing random*
///
/// Both PDUs carry a single 128 bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingValue {
    value: u128,
}

impl CommandData for PairingValue {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.value.to_le_bytes())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 16] = icd.try_into().map_err(|_| {
            log::error!("(SM) failed to generate a pairing value from raw data");
            log::trace!("(SM) failed raw data: {:x?}", icd);
            Error::Size
        })?;

        Ok(PairingValue {
            value: <u128>::from_le_bytes(bytes),
        })
    }
}

impl PairingValue {
    pub fn new(value: u128) -> Self {
        PairingValue { value }
    }

    pub fn get_value(&self) -> u128 {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PairingFailedReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyDerivationGenerationNotAllowed,
}

impl PairingFailedReason {
    pub fn into_val(self) -> u8 {
        match self {
            PairingFailedReason::PasskeyEntryFailed => 0x1,
            PairingFailedReason::OobNotAvailable => 0x2,
            PairingFailedReason::AuthenticationRequirements => 0x3,
            PairingFailedReason::ConfirmValueFailed => 0x4,
            PairingFailedReason::PairingNotSupported => 0x5,
            PairingFailedReason::EncryptionKeySize => 0x6,
            PairingFailedReason::CommandNotSupported => 0x7,
            PairingFailedReason::UnspecifiedReason => 0x8,
            PairingFailedReason::RepeatedAttempts => 0x9,
            PairingFailedReason::InvalidParameters => 0xa,
            PairingFailedReason::DhKeyCheckFailed => 0xb,
            PairingFailedReason::NumericComparisonFailed => 0xc,
            PairingFailedReason::BrEdrPairingInProgress => 0xd,
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => 0xe,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(PairingFailedReason::PasskeyEntryFailed),
            0x2 => Ok(PairingFailedReason::OobNotAvailable),
            0x3 => Ok(PairingFailedReason::AuthenticationRequirements),
            0x4 => Ok(PairingFailedReason::ConfirmValueFailed),
            0x5 => Ok(PairingFailedReason::PairingNotSupported),
            0x6 => Ok(PairingFailedReason::EncryptionKeySize),
            0x7 => Ok(PairingFailedReason::CommandNotSupported),
            0x8 => Ok(PairingFailedReason::UnspecifiedReason),
            0x9 => Ok(PairingFailedReason::RepeatedAttempts),
            0xa => Ok(PairingFailedReason::InvalidParameters),
            0xb => Ok(PairingFailedReason::DhKeyCheckFailed),
            0xc => Ok(PairingFailedReason::NumericComparisonFailed),
            0xd => Ok(PairingFailedReason::BrEdrPairingInProgress),
            0xe => Ok(PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed),
            _ => Err(Error::Value),
        }
    }
}

impl core::fmt::Display for PairingFailedReason {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PairingFailedReason::PasskeyEntryFailed => f.write_str("passkey entry failed"),
            PairingFailedReason::OobNotAvailable => f.write_str("out of band data not available"),
            PairingFailedReason::AuthenticationRequirements => f.write_str("authentication requirements not met"),
            PairingFailedReason::ConfirmValueFailed => f.write_str("confirm value check failed"),
            PairingFailedReason::PairingNotSupported => f.write_str("pairing not supported"),
            PairingFailedReason::EncryptionKeySize => f.write_str("invalid encryption key size"),
            PairingFailedReason::CommandNotSupported => f.write_str("security manager command not supported"),
            PairingFailedReason::UnspecifiedReason => f.write_str("unspecified reason"),
            PairingFailedReason::RepeatedAttempts => f.write_str("too many attempts at pairing"),
            PairingFailedReason::InvalidParameters => f.write_str("invalid parameters"),
            PairingFailedReason::DhKeyCheckFailed => f.write_str("Diffie Hellman key check failed"),
            PairingFailedReason::NumericComparisonFailed => f.write_str("numeric comparison failed"),
            PairingFailedReason::BrEdrPairingInProgress => f.write_str("BR/EDR pairing in progress"),
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => {
                f.write_str("cross transport key derivation generation not allowed")
            }
        }
    }
}

/// The Pairing Failed Command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFailed {
    reason: PairingFailedReason,
}

impl CommandData for PairingFailed {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        push(buffer, self.reason.into_val())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        match icd {
            [reason] => Ok(PairingFailed {
                reason: PairingFailedReason::try_from_val(*reason)?,
            }),
            _ => {
                log::error!("(SM) failed to generate 'pairing failed' from raw data");
                log::trace!("(SM) failed raw data: {:x?}", icd);
                Err(Error::Size)
            }
        }
    }
}

impl PairingFailed {
    pub fn new(reason: PairingFailedReason) -> Self {
        Self { reason }
    }

    /// Get the reason for why pairing failed
    pub fn get_reason(&self) -> PairingFailedReason {
        self.reason
    }
}

/// The Pairing Public Key Command
///
/// The key is kept in the PDU format, the x and y coordinates each in little-endian order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PairingPubKey {
    key: [u8; 64],
}

impl CommandData for PairingPubKey {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        extend(buffer, &self.key)
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let key: [u8; 64] = icd.try_into().map_err(|_| Error::Size)?;

        Ok(PairingPubKey { key })
    }
}

impl core::fmt::Debug for PairingPubKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("PairingPubKey").field("key", &&self.key[..]).finish()
    }
}

impl PairingPubKey {
    pub fn new(key: [u8; 64]) -> Self {
        PairingPubKey { key }
    }

    pub fn get_key(&self) -> [u8; 64] {
        self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPressNotification {
    PasskeyEntryStarted,
    PasskeyDigitEntered,
    PasskeyDigitErased,
    PasskeyCleared,
    PasskeyEntryCompleted,
}

impl CommandData for KeyPressNotification {
    fn into_command_format(&self, buffer: &mut PduBuffer) -> Result<(), Error> {
        push(buffer, self.into_val())
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        match icd {
            [val] => Self::try_from_val(*val),
            _ => {
                log::error!("(SM) failed to generate 'Key Press Notification' from raw data");
                log::trace!("(SM) failed raw data: {:x?}", icd);
                Err(Error::Size)
            }
        }
    }
}

impl KeyPressNotification {
    fn into_val(self) -> u8 {
        match self {
            KeyPressNotification::PasskeyEntryStarted => 0x0,
            KeyPressNotification::PasskeyDigitEntered => 0x1,
            KeyPressNotification::PasskeyDigitErased => 0x2,
            KeyPressNotification::PasskeyCleared => 0x3,
            KeyPressNotification::PasskeyEntryCompleted => 0x4,
        }
    }

    fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(KeyPressNotification::PasskeyEntryStarted),
            0x1 => Ok(KeyPressNotification::PasskeyDigitEntered),
            0x2 => Ok(KeyPressNotification::PasskeyDigitErased),
            0x3 => Ok(KeyPressNotification::PasskeyCleared),
            0x4 => Ok(KeyPressNotification::PasskeyEntryCompleted),
            _ => Err(Error::Value),
        }
    }
}

/// Direction of the passkey
///
/// Either both devices enter a passkey or one device displays the passkey and the other device
/// enters the passkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasskeyDirection {
    ResponderDisplaysInitiatorInputs,
    InitiatorDisplaysResponderInputs,
    InitiatorAndResponderInput,
}

/// The association model used for authenticating the pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMethod {
    /// Out of Band
    Oob,
    PassKeyEntry(PasskeyDirection),
    JustWorks,
    /// Numeric comparison
    NumbComp,
}

impl PairingMethod {
    /// Determine the pairing method from the features of the initiator and responder
    ///
    /// Legacy pairing only uses out of band data when both devices have it, secure connections
    /// uses it when either device has it. When neither device requires man in the middle
    /// protection the IO capabilities are not considered and the method is Just Works.
    pub fn determine_method(initiator: &PairingFeatures, responder: &PairingFeatures, is_legacy: bool) -> Self {
        let initiator_oob = initiator.get_oob_data_flag().is_present();
        let responder_oob = responder.get_oob_data_flag().is_present();

        let use_oob = if is_legacy {
            initiator_oob && responder_oob
        } else {
            initiator_oob || responder_oob
        };

        if use_oob {
            return PairingMethod::Oob;
        }

        let mitm = initiator.get_auth_req().contains(AuthRequirements::MITM)
            || responder.get_auth_req().contains(AuthRequirements::MITM);

        if !mitm {
            return PairingMethod::JustWorks;
        }

        Self::from_io_capabilities(
            initiator.get_io_capability(),
            responder.get_io_capability(),
            is_legacy,
        )
    }

    fn from_io_capabilities(initiator_io: IoCapability, responder_io: IoCapability, is_legacy: bool) -> Self {
        use IoCapability::*;
        use PasskeyDirection::*;

        match (responder_io, initiator_io, is_legacy) {
            (DisplayOnly, DisplayOnly, _) => PairingMethod::JustWorks,
            (DisplayOnly, DisplayWithYesOrNo, _) => PairingMethod::JustWorks,
            (DisplayOnly, KeyboardOnly, _) => PairingMethod::PassKeyEntry(ResponderDisplaysInitiatorInputs),
            (DisplayOnly, NoInputNoOutput, _) => PairingMethod::JustWorks,
            (DisplayOnly, KeyboardDisplay, _) => PairingMethod::PassKeyEntry(ResponderDisplaysInitiatorInputs),
            (DisplayWithYesOrNo, DisplayOnly, _) => PairingMethod::JustWorks,
            (DisplayWithYesOrNo, DisplayWithYesOrNo, false) => PairingMethod::NumbComp,
            (DisplayWithYesOrNo, DisplayWithYesOrNo, true) => PairingMethod::JustWorks,
            (DisplayWithYesOrNo, KeyboardOnly, _) => PairingMethod::PassKeyEntry(ResponderDisplaysInitiatorInputs),
            (DisplayWithYesOrNo, NoInputNoOutput, _) => PairingMethod::JustWorks,
            (DisplayWithYesOrNo, KeyboardDisplay, false) => PairingMethod::NumbComp,
            (DisplayWithYesOrNo, KeyboardDisplay, true) => {
                PairingMethod::PassKeyEntry(ResponderDisplaysInitiatorInputs)
            }
            (KeyboardOnly, DisplayOnly, _) => PairingMethod::PassKeyEntry(InitiatorDisplaysResponderInputs),
            (KeyboardOnly, DisplayWithYesOrNo, _) => PairingMethod::PassKeyEntry(InitiatorDisplaysResponderInputs),
            (KeyboardOnly, KeyboardOnly, _) => PairingMethod::PassKeyEntry(InitiatorAndResponderInput),
            (KeyboardOnly, NoInputNoOutput, _) => PairingMethod::JustWorks,
            (KeyboardOnly, KeyboardDisplay, _) => PairingMethod::PassKeyEntry(InitiatorDisplaysResponderInputs),
            (NoInputNoOutput, _, _) => PairingMethod::JustWorks,
            (KeyboardDisplay, DisplayOnly, _) => PairingMethod::PassKeyEntry(InitiatorDisplaysResponderInputs),
            (KeyboardDisplay, DisplayWithYesOrNo, false) => PairingMethod::NumbComp,
            (KeyboardDisplay, DisplayWithYesOrNo, true) => {
                PairingMethod::PassKeyEntry(InitiatorDisplaysResponderInputs)
            }
            (KeyboardDisplay, KeyboardOnly, _) => PairingMethod::PassKeyEntry(ResponderDisplaysInitiatorInputs),
            (KeyboardDisplay, NoInputNoOutput, _) => PairingMethod::JustWorks,
            (KeyboardDisplay, KeyboardDisplay, false) => PairingMethod::NumbComp,
            (KeyboardDisplay, KeyboardDisplay, true) => PairingMethod::PassKeyEntry(InitiatorDisplaysResponderInputs),
        }
    }

    /// Check if the method provides man in the middle protection
    pub fn is_authenticated(self) -> bool {
        self != PairingMethod::JustWorks
    }
}
