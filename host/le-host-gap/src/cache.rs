//! Advertising report results
//!
//! Advertising reports are accumulated into the [`InquiryDatabase`] and the [`AdvertisingCache`].
//! The database has an entry per peer address. The cache holds the advertising data (and scan
//! response data) of the most recently reported device, this is the data given to the result
//! callbacks.

use crate::advertising_data::{find_ad_field, MAX_ADVERTISING_DATA_LEN};
use crate::assigned::{flags, AssignedTypes};
use alloc::vec::Vec;
use core::ops::{BitOr, BitOrAssign};
use le_host_core::buffer::LinearBuffer;
use le_host_core::BluetoothDeviceAddress;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The maximum size of cached advertising data plus scan response data
pub const MAX_CACHED_DATA_LEN: usize = 2 * MAX_ADVERTISING_DATA_LEN;

/// The maximum number of devices within the inquiry database
pub const INQUIRY_DATABASE_SIZE: usize = 40;

/// The event type of an advertising report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReportEventType {
    ConnectableUndirected,
    ConnectableDirected,
    ScannableUndirected,
    NonConnectableUndirected,
    ScanResponse,
}

impl ReportEventType {
    pub fn into_val(self) -> u8 {
        match self {
            ReportEventType::ConnectableUndirected => 0x0,
            ReportEventType::ConnectableDirected => 0x1,
            ReportEventType::ScannableUndirected => 0x2,
            ReportEventType::NonConnectableUndirected => 0x3,
            ReportEventType::ScanResponse => 0x4,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, u8> {
        match val {
            0x0 => Ok(ReportEventType::ConnectableUndirected),
            0x1 => Ok(ReportEventType::ConnectableDirected),
            0x2 => Ok(ReportEventType::ScannableUndirected),
            0x3 => Ok(ReportEventType::NonConnectableUndirected),
            0x4 => Ok(ReportEventType::ScanResponse),
            _ => Err(val),
        }
    }

    /// Check if a connection can be made to the advertiser
    pub fn is_connectable(self) -> bool {
        matches!(
            self,
            ReportEventType::ConnectableUndirected | ReportEventType::ConnectableDirected
        )
    }
}

/// The kind of device that was found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceType(u8);

impl DeviceType {
    pub const BR_EDR: Self = DeviceType(0x1);
    pub const BLE: Self = DeviceType(0x2);
    pub const DUAL_MODE: Self = DeviceType(0x3);

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DeviceType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        DeviceType(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeviceType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// The scanning activities
///
/// Scanning is shared by discovery (general or limited inquiry), selective connection,
/// observation, and the discovery scan. The results of a report are only given to the activities
/// that are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanActivity(u8);

impl ScanActivity {
    pub const GENERAL_INQUIRY: Self = ScanActivity(0x10);
    pub const LIMITED_INQUIRY: Self = ScanActivity(0x20);
    pub const SELECTIVE_CONNECTION: Self = ScanActivity(0x40);
    pub const OBSERVE: Self = ScanActivity(0x80);
    pub const DISCOVER: Self = ScanActivity(0x08);

    pub const INQUIRY: Self = ScanActivity(Self::GENERAL_INQUIRY.0 | Self::LIMITED_INQUIRY.0);

    pub const fn empty() -> Self {
        ScanActivity(0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0
    }

    pub fn is_inquiry_active(&self) -> bool {
        self.intersects(Self::INQUIRY)
    }

    pub fn is_observe_active(&self) -> bool {
        self.intersects(Self::OBSERVE)
    }

    pub fn is_selective_connection_active(&self) -> bool {
        self.intersects(Self::SELECTIVE_CONNECTION)
    }

    pub fn is_discover_active(&self) -> bool {
        self.intersects(Self::DISCOVER)
    }
}

/// Which results a report is given to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultFlags(u8);

impl ResultFlags {
    pub const INQUIRY: Self = ResultFlags(0x01);
    pub const OBSERVE: Self = ResultFlags(0x02);
    pub const SELECTIVE_CONNECTION: Self = ResultFlags(0x04);
    pub const DISCOVER: Self = ResultFlags(0x08);

    pub const fn empty() -> Self {
        ResultFlags(0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0
    }
}

impl BitOr for ResultFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        ResultFlags(self.0 | rhs.0)
    }
}

/// A discovered device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InquiryResult {
    pub address: BluetoothDeviceAddress,
    /// The address type as it was within the report
    pub address_type: u8,
    pub rssi: i8,
    pub device_type: DeviceType,
    /// The event type of the last advertising packet (scan responses are not recorded here)
    pub event_type: ReportEventType,
    /// The value of the Flags data type, zero if there was none
    pub flag: u8,
}

/// An entry of the inquiry database
#[derive(Debug, Clone, Copy)]
pub struct InquiryEntry {
    pub result: InquiryResult,
    /// Length of the advertising data within the cache
    pub adv_data_len: usize,
    /// Length of the scan response data within the cache
    pub scan_rsp_len: usize,
    /// Set when the scan response has been received or one is not expected
    pub scan_rsp: bool,
    /// The inquiry this entry was last updated in
    pub inquiry_count: u32,
    last_used: u32,
}

impl InquiryEntry {
    fn new(address: BluetoothDeviceAddress) -> Self {
        InquiryEntry {
            result: InquiryResult {
                address,
                address_type: 0,
                rssi: 0,
                device_type: DeviceType::default(),
                event_type: ReportEventType::ConnectableUndirected,
                flag: 0,
            },
            adv_data_len: 0,
            scan_rsp_len: 0,
            scan_rsp: false,
            inquiry_count: 0,
            last_used: 0,
        }
    }
}

/// The database of discovered devices
///
/// The database holds at most [`INQUIRY_DATABASE_SIZE`] entries. When it is full the least
/// recently used entry that was not found within the current inquiry is reused.
#[derive(Debug, Default)]
pub struct InquiryDatabase {
    entries: Vec<InquiryEntry>,
    inquiry_count: u32,
    use_count: u32,
}

impl InquiryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new inquiry
    pub fn new_inquiry(&mut self) {
        self.inquiry_count = self.inquiry_count.wrapping_add(1);
    }

    /// End the current inquiry
    ///
    /// Entries of LE only devices still waiting for their scan response are dropped, the other
    /// entries are kept for the next inquiry.
    pub fn end_inquiry(&mut self) {
        self.entries
            .retain(|entry| entry.scan_rsp || entry.result.device_type != DeviceType::BLE);

        self.inquiry_count = self.inquiry_count.wrapping_add(1);
    }

    /// Get the current inquiry count
    pub fn inquiry_count(&self) -> u32 {
        self.inquiry_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }

    pub fn find(&self, address: &BluetoothDeviceAddress) -> Option<&InquiryEntry> {
        self.entries.iter().find(|entry| entry.result.address == *address)
    }

    pub fn find_mut(&mut self, address: &BluetoothDeviceAddress) -> Option<&mut InquiryEntry> {
        self.entries.iter_mut().find(|entry| entry.result.address == *address)
    }

    /// Get the entry for `address` or create a new one
    ///
    /// The returned boolean is true when the entry was created.
    pub fn get_or_create(&mut self, address: &BluetoothDeviceAddress) -> (&mut InquiryEntry, bool) {
        self.use_count = self.use_count.wrapping_add(1);

        let use_count = self.use_count;

        let (index, created) = match self.entries.iter().position(|entry| entry.result.address == *address) {
            Some(index) => (index, false),
            None if self.entries.len() < INQUIRY_DATABASE_SIZE => {
                self.entries.push(InquiryEntry::new(*address));

                (self.entries.len() - 1, true)
            }
            None => {
                let inquiry_count = self.inquiry_count;

                let index = self
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, entry)| (entry.inquiry_count == inquiry_count, entry.last_used))
                    .map(|(index, _)| index)
                    .unwrap_or_default();

                log::debug!(
                    "(GAP) inquiry database full, reusing the entry of {}",
                    self.entries[index].result.address
                );

                self.entries[index] = InquiryEntry::new(*address);

                (index, true)
            }
        };

        let entry = &mut self.entries[index];

        entry.last_used = use_count;

        (entry, created)
    }
}

/// The advertising data cache
///
/// This holds the advertising data and scan response data of a single device. The cache is
/// reset whenever advertising data (not a scan response) is received or a report is from a
/// different device.
#[derive(Debug, Default)]
pub struct AdvertisingCache {
    address: Option<BluetoothDeviceAddress>,
    data: LinearBuffer<MAX_CACHED_DATA_LEN, u8>,
}

impl AdvertisingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the address of the device whose data is within the cache
    pub fn address(&self) -> Option<&BluetoothDeviceAddress> {
        self.address.as_ref()
    }

    /// Get the cached data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.address = None;
        self.data.clear();
    }

    fn reset(&mut self, entry: &mut InquiryEntry) {
        self.data.clear();
        entry.adv_data_len = 0;
        entry.scan_rsp_len = 0;
    }

    /// Add the data of an advertising report
    ///
    /// Whole AD structures are appended to the cache until a structure with a length of zero or a
    /// structure that does not fit is reached. The lengths recorded in `entry` are updated to the
    /// new cache contents.
    pub fn cache_adv_data(
        &mut self,
        address: &BluetoothDeviceAddress,
        entry: &mut InquiryEntry,
        data: &[u8],
        event_type: ReportEventType,
    ) {
        if event_type != ReportEventType::ScanResponse {
            self.reset(entry);
        }

        if self.address.as_ref() != Some(address) {
            self.reset(entry);

            self.address = Some(*address);
        }

        if data.len() > MAX_CACHED_DATA_LEN {
            log::warn!("(GAP) advertising data of {} is too long ({} octets)", address, data.len());
            return;
        }

        let mut position = 0;

        while position < data.len() {
            let length = data[position] as usize;

            if length == 0 || position + 1 + length > data.len() {
                break;
            }

            if self.data.try_extend_from_slice(&data[position..=position + length]).is_err() {
                break;
            }

            position += length + 1;
        }

        if event_type == ReportEventType::ScanResponse {
            entry.scan_rsp_len = self.data.len() - entry.adv_data_len;
        } else {
            entry.adv_data_len = self.data.len();
        }
    }

    /// Get the device name within the cached data
    pub fn device_name(&self) -> Option<&[u8]> {
        [AssignedTypes::CompleteLocalName, AssignedTypes::ShortenedLocalName]
            .into_iter()
            .find_map(|ad_type| find_ad_field(&self.data, ad_type.val()))
            .map(|(offset, len)| &self.data[offset..offset + len])
    }
}

/// Determine who gets the result of an advertising report
///
/// The observer and discover results are set whenever their scan is active. The selective
/// connection result is set when selective connection is active and the advertising is
/// connectable. If `filter` is
/// given and does not match `address` nothing more is added. The inquiry result is set when the
/// Flags within `data` match the active inquiry mode. Without advertising data the inquiry result
/// is never set.
pub fn is_discoverable(
    activity: ScanActivity,
    filter: Option<&BluetoothDeviceAddress>,
    address: &BluetoothDeviceAddress,
    event_type: ReportEventType,
    data: &[u8],
) -> ResultFlags {
    let mut result = ResultFlags::empty();

    if activity.is_observe_active() {
        result.insert(ResultFlags::OBSERVE);
    }

    if activity.is_discover_active() {
        result.insert(ResultFlags::DISCOVER);
    }

    if activity.is_selective_connection_active() && event_type.is_connectable() {
        result.insert(ResultFlags::SELECTIVE_CONNECTION);
    }

    if let Some(filter) = filter {
        if filter != address {
            return result;
        }
    }

    if data.is_empty() {
        return result;
    }

    if let Some((offset, len)) = find_ad_field(data, AssignedTypes::Flags.val()) {
        if len >= 1 {
            let flag = data[offset];

            if activity.intersects(ScanActivity::GENERAL_INQUIRY) && flag & flags::DISCOVERABLE_MASK != 0 {
                result.insert(ResultFlags::INQUIRY);
            }

            if activity.intersects(ScanActivity::LIMITED_INQUIRY)
                && flag & flags::LE_LIMITED_DISCOVERABLE_MODE != 0
            {
                result.insert(ResultFlags::INQUIRY);
            }
        }
    }

    result
}
