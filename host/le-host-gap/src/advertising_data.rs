//! Advertising data encoding
//!
//! Advertising data is built from an [`AdvertisingDataMask`] selecting which fields of an
//! [`AdvertisingData`] are to be written. The fields are written in a fixed priority order into a
//! 31 octet [`AdvertisingDataBuffer`]. A field that does not fit is skipped and its bit is left set
//! within the mask returned by [`AdvertisingDataBuffer::build`].
//!
//! Every field is an AD structure of the form `[length][type][data..]` where `length` counts the
//! type octet and the data but not itself.

use crate::assigned::{self, AssignedTypes};
use alloc::vec::Vec;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};
use le_host_core::buffer::LinearBuffer;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The maximum size of legacy advertising data (or scan response data)
pub const MAX_ADVERTISING_DATA_LEN: usize = 31;

/// The smallest AD structure is a length and a type
const MIN_AD_STRUCTURE_LEN: usize = 2;

/// A selection of advertising data fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisingDataMask(u32);

impl AdvertisingDataMask {
    pub const DEVICE_NAME: Self = AdvertisingDataMask(1 << 0);
    pub const FLAGS: Self = AdvertisingDataMask(1 << 1);
    pub const MANUFACTURER_DATA: Self = AdvertisingDataMask(1 << 2);
    pub const TX_POWER: Self = AdvertisingDataMask(1 << 3);
    pub const SERVICE_32: Self = AdvertisingDataMask(1 << 4);
    pub const CONNECTION_INTERVAL_RANGE: Self = AdvertisingDataMask(1 << 5);
    pub const SERVICE_16: Self = AdvertisingDataMask(1 << 6);
    pub const SERVICE_DATA: Self = AdvertisingDataMask(1 << 8);
    pub const SERVICE_128_SOLICITATION: Self = AdvertisingDataMask(1 << 10);
    pub const APPEARANCE: Self = AdvertisingDataMask(1 << 11);
    pub const SERVICE_32_SOLICITATION: Self = AdvertisingDataMask(1 << 14);
    pub const PROPRIETARY: Self = AdvertisingDataMask(1 << 15);
    pub const SERVICE_128: Self = AdvertisingDataMask(1 << 16);

    pub const fn empty() -> Self {
        AdvertisingDataMask(0)
    }

    pub const fn all() -> Self {
        AdvertisingDataMask(
            Self::DEVICE_NAME.0
                | Self::FLAGS.0
                | Self::MANUFACTURER_DATA.0
                | Self::TX_POWER.0
                | Self::SERVICE_32.0
                | Self::CONNECTION_INTERVAL_RANGE.0
                | Self::SERVICE_16.0
                | Self::SERVICE_DATA.0
                | Self::SERVICE_128_SOLICITATION.0
                | Self::APPEARANCE.0
                | Self::SERVICE_32_SOLICITATION.0
                | Self::PROPRIETARY.0
                | Self::SERVICE_128.0,
        )
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        AdvertisingDataMask(bits & Self::all().0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0
    }
}

impl BitOr for AdvertisingDataMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        AdvertisingDataMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AdvertisingDataMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl BitAnd for AdvertisingDataMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        AdvertisingDataMask(self.0 & rhs.0)
    }
}

impl Not for AdvertisingDataMask {
    type Output = Self;

    fn not(self) -> Self {
        AdvertisingDataMask(!self.0 & Self::all().0)
    }
}

/// A list of service UUIDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceUuids<T> {
    /// Set if `uuids` is every service of the device
    pub list_complete: bool,
    pub uuids: Vec<T>,
}

/// The UUID that prefixes service data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ServiceDataUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(u128),
}

impl ServiceDataUuid {
    fn len(&self) -> usize {
        match self {
            ServiceDataUuid::Uuid16(_) => 2,
            ServiceDataUuid::Uuid32(_) => 4,
            ServiceDataUuid::Uuid128(_) => 16,
        }
    }

    fn ad_type(&self) -> AssignedTypes {
        match self {
            ServiceDataUuid::Uuid16(_) => AssignedTypes::ServiceData16BitUuid,
            ServiceDataUuid::Uuid32(_) => AssignedTypes::ServiceData32BitUuid,
            ServiceDataUuid::Uuid128(_) => AssignedTypes::ServiceData128BitUuid,
        }
    }

    fn write_to(&self, buffer: &mut LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8>) -> Result<(), Overflow> {
        match self {
            ServiceDataUuid::Uuid16(uuid) => buffer.try_extend_from_slice(&uuid.to_le_bytes()),
            ServiceDataUuid::Uuid32(uuid) => buffer.try_extend_from_slice(&uuid.to_le_bytes()),
            ServiceDataUuid::Uuid128(uuid) => buffer.try_extend_from_slice(&uuid.to_le_bytes()),
        }
        .map_err(|_| Overflow)
    }
}

/// Service data
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceData {
    pub uuid: ServiceDataUuid,
    pub data: Vec<u8>,
}

/// A single 128 bit service UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Service128 {
    pub list_complete: bool,
    pub uuid: u128,
}

/// A vendor defined AD structure
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProprietaryElement {
    pub ad_type: u8,
    pub value: Vec<u8>,
}

/// The values of the advertising data fields
///
/// Which of these are written is selected by an [`AdvertisingDataMask`]. The device name is not
/// part of this, it is always the configured name of the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisingData {
    pub flags: u8,
    pub appearance: u16,
    pub manufacturer_data: Vec<u8>,
    /// Index into [`TX_POWER_LEVELS`](crate::assigned::TX_POWER_LEVELS)
    pub tx_power: u8,
    pub services_16: ServiceUuids<u16>,
    pub services_32: ServiceUuids<u32>,
    pub service_128: Option<Service128>,
    pub solicitation_32: Vec<u32>,
    pub solicitation_128: Option<u128>,
    pub service_data: Option<ServiceData>,
    /// Minimum and maximum peripheral connection interval
    pub connection_interval_range: (u16, u16),
    pub proprietary: Vec<ProprietaryElement>,
}

/// Advertising data as it is sent to the controller
///
/// Along with the encoded data, this tracks which fields were written and where the Flags value
/// is so it can be patched without rebuilding everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingDataBuffer {
    data: LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8>,
    data_mask: AdvertisingDataMask,
    flag_offset: Option<usize>,
}

struct Overflow;

impl AdvertisingDataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.data.clear();
        self.data_mask = AdvertisingDataMask::empty();
        self.flag_offset = None;
    }

    /// Get the encoded advertising data
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get a copy of the encoded data for sending
    pub fn payload(&self) -> LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8> {
        self.data
    }

    /// Get the mask of fields within the buffer
    pub fn data_mask(&self) -> AdvertisingDataMask {
        self.data_mask
    }

    /// Get the offset of the Flags value
    pub fn flag_offset(&self) -> Option<usize> {
        self.flag_offset
    }

    /// Get the Flags value
    pub fn flag(&self) -> Option<u8> {
        self.flag_offset.map(|offset| self.data[offset])
    }

    /// Get the offset of the first unused octet
    pub fn pad_offset(&self) -> usize {
        self.data.len()
    }

    /// Rebuild the advertising data
    ///
    /// The buffer is cleared and then every field within `mask` is written in priority order. The
    /// returned mask contains the fields that did not fit.
    pub fn build(&mut self, mask: AdvertisingDataMask, data: &AdvertisingData, device_name: &str) -> AdvertisingDataMask {
        self.clear();

        let remaining = build_adv_data(&mut self.data, &mut self.flag_offset, mask, data, device_name.as_bytes());

        self.data_mask = mask & !remaining;

        remaining
    }

    /// Patch the Flags value
    ///
    /// If there is a Flags field its value is overwritten. Otherwise a Flags field is appended,
    /// and if there is not enough room for it the buffer is reset before appending.
    pub fn update_flag(&mut self, flag: u8) {
        match self.flag_offset {
            Some(offset) => self.data[offset] = flag,
            None => {
                if self.data.remaining() < MIN_AD_STRUCTURE_LEN + 1 {
                    log::warn!("(GAP) no room for the flags, clearing advertising data");

                    self.clear();
                }

                // there is always room after the reset
                let _ = self.data.try_extend_from_slice(&[2, AssignedTypes::Flags.val(), flag]);

                self.flag_offset = Some(self.data.len() - 1);
            }
        }

        self.data_mask.insert(AdvertisingDataMask::FLAGS);
    }
}

fn put_structure(
    buffer: &mut LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8>,
    ad_type: AssignedTypes,
    payload: &[u8],
) -> Result<(), Overflow> {
    if buffer.remaining() < MIN_AD_STRUCTURE_LEN + payload.len() {
        return Err(Overflow);
    }

    buffer
        .try_extend_from_slice(&[payload.len() as u8 + 1, ad_type.val()])
        .and_then(|_| buffer.try_extend_from_slice(payload))
        .map_err(|_| Overflow)
}

fn put_uuid_list<const N: usize>(
    buffer: &mut LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8>,
    uuids: impl ExactSizeIterator<Item = [u8; N]>,
    complete: bool,
    partial_type: AssignedTypes,
    complete_type: AssignedTypes,
) -> bool {
    let total = uuids.len();

    if total == 0 {
        return true;
    }

    let count = core::cmp::min(total, buffer.remaining().saturating_sub(MIN_AD_STRUCTURE_LEN) / N);

    if count == 0 {
        return false;
    }

    let ad_type = if count < total || !complete {
        partial_type
    } else {
        complete_type
    };

    let _ = buffer.try_extend_from_slice(&[(count * N) as u8 + 1, ad_type.val()]);

    uuids.take(count).for_each(|uuid| {
        let _ = buffer.try_extend_from_slice(&uuid);
    });

    true
}

/// Write the selected advertising data fields
///
/// This is the priority ordered field writer. `flag_offset` is set to the position of the Flags
/// value when the Flags field is written. The returned mask contains every field of `mask` that
/// was not written.
pub fn build_adv_data(
    buffer: &mut LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8>,
    flag_offset: &mut Option<usize>,
    mut mask: AdvertisingDataMask,
    data: &AdvertisingData,
    device_name: &[u8],
) -> AdvertisingDataMask {
    if mask.contains(AdvertisingDataMask::FLAGS)
        && put_structure(buffer, AssignedTypes::Flags, &[data.flags]).is_ok()
    {
        *flag_offset = Some(buffer.len() - 1);

        mask.remove(AdvertisingDataMask::FLAGS);
    }

    if mask.contains(AdvertisingDataMask::APPEARANCE)
        && put_structure(buffer, AssignedTypes::Appearance, &data.appearance.to_le_bytes()).is_ok()
    {
        mask.remove(AdvertisingDataMask::APPEARANCE);
    }

    if mask.contains(AdvertisingDataMask::DEVICE_NAME) && buffer.remaining() > MIN_AD_STRUCTURE_LEN {
        let room = buffer.remaining() - MIN_AD_STRUCTURE_LEN;

        let (ad_type, name) = if device_name.len() > room {
            (AssignedTypes::ShortenedLocalName, &device_name[..room])
        } else {
            (AssignedTypes::CompleteLocalName, device_name)
        };

        if put_structure(buffer, ad_type, name).is_ok() {
            mask.remove(AdvertisingDataMask::DEVICE_NAME);
        }
    }

    if mask.contains(AdvertisingDataMask::MANUFACTURER_DATA) && data.manufacturer_data.is_empty() {
        mask.remove(AdvertisingDataMask::MANUFACTURER_DATA);
    } else if mask.contains(AdvertisingDataMask::MANUFACTURER_DATA) && buffer.remaining() > MIN_AD_STRUCTURE_LEN {
        let len = core::cmp::min(data.manufacturer_data.len(), buffer.remaining() - MIN_AD_STRUCTURE_LEN);

        if put_structure(
            buffer,
            AssignedTypes::ManufacturerSpecificData,
            &data.manufacturer_data[..len],
        )
        .is_ok()
        {
            mask.remove(AdvertisingDataMask::MANUFACTURER_DATA);
        }
    }

    if mask.contains(AdvertisingDataMask::TX_POWER)
        && put_structure(
            buffer,
            AssignedTypes::TxPowerLevel,
            &[assigned::map_tx_power(data.tx_power) as u8],
        )
        .is_ok()
    {
        mask.remove(AdvertisingDataMask::TX_POWER);
    }

    if mask.contains(AdvertisingDataMask::SERVICE_16)
        && put_uuid_list(
            buffer,
            data.services_16.uuids.iter().map(|uuid| uuid.to_le_bytes()),
            data.services_16.list_complete,
            AssignedTypes::IncompleteListOf16bitServiceClassUuids,
            AssignedTypes::CompleteListOf16bitServiceClassUuids,
        )
    {
        mask.remove(AdvertisingDataMask::SERVICE_16);
    }

    if mask.contains(AdvertisingDataMask::SERVICE_32)
        && put_uuid_list(
            buffer,
            data.services_32.uuids.iter().map(|uuid| uuid.to_le_bytes()),
            data.services_32.list_complete,
            AssignedTypes::IncompleteListOf32bitServiceClassUuids,
            AssignedTypes::CompleteListOf32bitServiceClassUuids,
        )
    {
        mask.remove(AdvertisingDataMask::SERVICE_32);
    }

    if mask.contains(AdvertisingDataMask::SERVICE_128) {
        if let Some(service) = data.service_128 {
            let ad_type = if service.list_complete {
                AssignedTypes::CompleteListOf128bitServiceClassUuids
            } else {
                AssignedTypes::IncompleteListOf128bitServiceClassUuids
            };

            if put_structure(buffer, ad_type, &service.uuid.to_le_bytes()).is_ok() {
                mask.remove(AdvertisingDataMask::SERVICE_128);
            }
        }
    }

    if mask.contains(AdvertisingDataMask::SERVICE_32_SOLICITATION)
        && put_uuid_list(
            buffer,
            data.solicitation_32.iter().map(|uuid| uuid.to_le_bytes()),
            true,
            AssignedTypes::ListOf32bitServiceSolicitationUuids,
            AssignedTypes::ListOf32bitServiceSolicitationUuids,
        )
    {
        mask.remove(AdvertisingDataMask::SERVICE_32_SOLICITATION);
    }

    if mask.contains(AdvertisingDataMask::SERVICE_128_SOLICITATION) {
        if let Some(uuid) = data.solicitation_128 {
            if put_structure(
                buffer,
                AssignedTypes::ListOf128bitServiceSolicitationUuids,
                &uuid.to_le_bytes(),
            )
            .is_ok()
            {
                mask.remove(AdvertisingDataMask::SERVICE_128_SOLICITATION);
            }
        }
    }

    if mask.contains(AdvertisingDataMask::SERVICE_DATA) {
        if let Some(service_data) = &data.service_data {
            let uuid_len = service_data.uuid.len();

            if buffer.remaining() > uuid_len + MIN_AD_STRUCTURE_LEN {
                let len = core::cmp::min(
                    service_data.data.len(),
                    buffer.remaining() - MIN_AD_STRUCTURE_LEN - uuid_len,
                );

                let _ = buffer.try_extend_from_slice(&[(uuid_len + len) as u8 + 1, service_data.uuid.ad_type().val()]);

                if service_data.uuid.write_to(buffer).is_ok()
                    && buffer.try_extend_from_slice(&service_data.data[..len]).is_ok()
                {
                    mask.remove(AdvertisingDataMask::SERVICE_DATA);
                }
            }
        }
    }

    if mask.contains(AdvertisingDataMask::CONNECTION_INTERVAL_RANGE) {
        let (low, high) = data.connection_interval_range;

        let mut range = [0u8; 4];

        range[..2].copy_from_slice(&low.to_le_bytes());
        range[2..].copy_from_slice(&high.to_le_bytes());

        if put_structure(buffer, AssignedTypes::PeripheralConnectionIntervalRange, &range).is_ok() {
            mask.remove(AdvertisingDataMask::CONNECTION_INTERVAL_RANGE);
        }
    }

    if mask.contains(AdvertisingDataMask::PROPRIETARY) {
        let mut all_written = true;

        for element in data.proprietary.iter() {
            if buffer.remaining() < MIN_AD_STRUCTURE_LEN + element.value.len() {
                all_written = false;
                break;
            }

            let _ = buffer.try_extend_from_slice(&[element.value.len() as u8 + 1, element.ad_type]);
            let _ = buffer.try_extend_from_slice(&element.value);
        }

        if all_written {
            mask.remove(AdvertisingDataMask::PROPRIETARY);
        }
    }

    mask
}

/// Find an AD structure
///
/// The structures within `buffer` are walked until the one with type `ad_type` is found. The
/// offset and length of its data (excluding the length and type octets) are returned. A length
/// of zero or a structure that runs past the end of `buffer` ends the search.
pub fn find_ad_field(buffer: &[u8], ad_type: u8) -> Option<(usize, usize)> {
    let mut position = 0;

    while position < buffer.len() {
        let length = buffer[position] as usize;

        if length == 0 || position + 1 + length > buffer.len() {
            break;
        }

        if buffer[position + 1] == ad_type {
            return Some((position + 2, length - 1));
        }

        position += length + 1;
    }

    None
}

/// Get the data of an AD structure
pub fn check_adv_data(buffer: &[u8], ad_type: u8) -> Option<&[u8]> {
    find_ad_field(buffer, ad_type).map(|(offset, len)| &buffer[offset..offset + len])
}
