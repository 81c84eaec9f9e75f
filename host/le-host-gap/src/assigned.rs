//! Assigned numbers for advertising data
//!
//! These are the advertising data types from the *Assigned Numbers* document and the flag bits of
//! the Flags data type from the *Core Specification Supplement*.

/// Advertising data types
///
/// Only the types that the advertising data builder writes (or the report processing reads) are
/// listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssignedTypes {
    Flags,
    IncompleteListOf16bitServiceClassUuids,
    CompleteListOf16bitServiceClassUuids,
    IncompleteListOf32bitServiceClassUuids,
    CompleteListOf32bitServiceClassUuids,
    IncompleteListOf128bitServiceClassUuids,
    CompleteListOf128bitServiceClassUuids,
    ShortenedLocalName,
    CompleteLocalName,
    TxPowerLevel,
    PeripheralConnectionIntervalRange,
    ListOf16bitServiceSolicitationUuids,
    ListOf128bitServiceSolicitationUuids,
    ServiceData16BitUuid,
    PublicTargetAddress,
    RandomTargetAddress,
    Appearance,
    ListOf32bitServiceSolicitationUuids,
    ServiceData32BitUuid,
    ServiceData128BitUuid,
    ManufacturerSpecificData,
}

impl AssignedTypes {
    pub const fn val(&self) -> u8 {
        match *self {
            AssignedTypes::Flags => 0x01,
            AssignedTypes::IncompleteListOf16bitServiceClassUuids => 0x02,
            AssignedTypes::CompleteListOf16bitServiceClassUuids => 0x03,
            AssignedTypes::IncompleteListOf32bitServiceClassUuids => 0x04,
            AssignedTypes::CompleteListOf32bitServiceClassUuids => 0x05,
            AssignedTypes::IncompleteListOf128bitServiceClassUuids => 0x06,
            AssignedTypes::CompleteListOf128bitServiceClassUuids => 0x07,
            AssignedTypes::ShortenedLocalName => 0x08,
            AssignedTypes::CompleteLocalName => 0x09,
            AssignedTypes::TxPowerLevel => 0x0A,
            AssignedTypes::PeripheralConnectionIntervalRange => 0x12,
            AssignedTypes::ListOf16bitServiceSolicitationUuids => 0x14,
            AssignedTypes::ListOf128bitServiceSolicitationUuids => 0x15,
            AssignedTypes::ServiceData16BitUuid => 0x16,
            AssignedTypes::PublicTargetAddress => 0x17,
            AssignedTypes::RandomTargetAddress => 0x18,
            AssignedTypes::Appearance => 0x19,
            AssignedTypes::ListOf32bitServiceSolicitationUuids => 0x1F,
            AssignedTypes::ServiceData32BitUuid => 0x20,
            AssignedTypes::ServiceData128BitUuid => 0x21,
            AssignedTypes::ManufacturerSpecificData => 0xFF,
        }
    }
}

impl From<AssignedTypes> for u8 {
    fn from(ty: AssignedTypes) -> u8 {
        ty.val()
    }
}

/// Bits of the Flags data type
pub mod flags {
    /// LE limited discoverable mode
    pub const LE_LIMITED_DISCOVERABLE_MODE: u8 = 1 << 0;
    /// LE general discoverable mode
    pub const LE_GENERAL_DISCOVERABLE_MODE: u8 = 1 << 1;
    /// BR/EDR not supported
    pub const BR_EDR_NOT_SUPPORTED: u8 = 1 << 2;
    /// The controller supports simultaneous BR/EDR and LE to the same device
    pub const SIMULTANEOUS_LE_BR_EDR_CONTROLLER: u8 = 1 << 3;
    /// The host supports simultaneous BR/EDR and LE to the same device
    pub const SIMULTANEOUS_LE_BR_EDR_HOST: u8 = 1 << 4;

    pub const DISCOVERABLE_MASK: u8 = LE_LIMITED_DISCOVERABLE_MODE | LE_GENERAL_DISCOVERABLE_MODE;

    /// The "dual mode topology" bits
    pub const DMT_MASK: u8 = SIMULTANEOUS_LE_BR_EDR_CONTROLLER | SIMULTANEOUS_LE_BR_EDR_HOST;
}

/// Advertised transmit power levels
///
/// The transmit power field of [`AdvertisingData`] is an index into this table. Indexes larger
/// than the table are clamped to the last entry.
///
/// [`AdvertisingData`]: crate::advertising_data::AdvertisingData
pub const TX_POWER_LEVELS: [i8; 8] = [-12, -9, -6, -3, 0, 3, 6, 9];

/// Map a transmit power index to the advertised level in dBm
pub fn map_tx_power(index: u8) -> i8 {
    let index = core::cmp::min(index as usize, TX_POWER_LEVELS.len() - 1);

    TX_POWER_LEVELS[index]
}
