//! LE controller commands
//!
//! These are the commands the GAP controller sends to the Bluetooth controller. A [`Command`]
//! knows its opcode and how to pack its parameters, the transport of the command is left to the
//! [`GapEnvironment`](crate::controller::GapEnvironment).

use le_host_core::buffer::LinearBuffer;
use le_host_core::BluetoothDeviceAddress;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The largest parameter of a command sent by the GAP controller
pub const MAX_PARAMETER_LEN: usize = 32;

/// Packed command parameters
pub type CommandParameter = LinearBuffer<MAX_PARAMETER_LEN, u8>;

macro_rules! interval {
    ( $(#[ $expl:meta ])* $name:ident, $raw_low:expr, $raw_hi:expr, $raw_default:expr, $micro_sec_conv:expr ) => {
        $(#[ $expl ])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name {
            interval: u16,
        }

        impl $name {
            pub const RAW_MIN: u16 = $raw_low;
            pub const RAW_MAX: u16 = $raw_hi;

            /// Try to create a `
            #[doc = core::stringify!($name)]
            /// ` from a raw u16 value
            ///
            /// # Error
            /// Input `raw` is either greater than
            #[doc = core::stringify!($raw_hi)]
            /// or the value is less than
            #[doc = core::stringify!($raw_low)]
            /// .
            pub fn try_from_raw(raw: u16) -> Result<Self, &'static str> {
                if ($raw_low..=$raw_hi).contains(&raw) {
                    Ok($name { interval: raw })
                } else {
                    Err(concat!("Raw value out of range: ", $raw_low, "..=", $raw_hi))
                }
            }

            pub(crate) const fn from_raw_unchecked(raw: u16) -> Self {
                $name { interval: raw }
            }

            /// Get the raw value
            pub fn get_raw_val(&self) -> u16 {
                self.interval
            }

            /// Get the value of the interval as a `Duration`
            pub fn get_duration(&self) -> core::time::Duration {
                core::time::Duration::from_micros((self.interval as u64) * $micro_sec_conv)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name { interval: $raw_default }
            }
        }

        impl TryFrom<u16> for $name {
            type Error = &'static str;

            fn try_from(v: u16) -> Result<Self, Self::Error> {
                $name::try_from_raw(v)
            }
        }
    };
}

interval!(
    /// The advertising interval in units of 625 microseconds
    AdvertisingInterval,
    0x0020,
    0x4000,
    0x0800,
    625
);

interval!(
    /// The scanning interval in units of 625 microseconds
    ScanningInterval,
    0x0004,
    0x4000,
    0x0010,
    625
);

interval!(
    /// The scanning window in units of 625 microseconds
    ScanningWindow,
    0x0004,
    0x4000,
    0x0010,
    625
);

/// The advertising event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AdvertisingType {
    #[default]
    ConnectableAndScannableUndirected,
    ConnectableHighDutyCycleDirected,
    ScannableUndirected,
    NonConnectableUndirected,
    ConnectableLowDutyCycleDirected,
}

impl AdvertisingType {
    pub fn into_val(self) -> u8 {
        match self {
            AdvertisingType::ConnectableAndScannableUndirected => 0x00,
            AdvertisingType::ConnectableHighDutyCycleDirected => 0x01,
            AdvertisingType::ScannableUndirected => 0x02,
            AdvertisingType::NonConnectableUndirected => 0x03,
            AdvertisingType::ConnectableLowDutyCycleDirected => 0x04,
        }
    }

    pub fn is_directed(self) -> bool {
        matches!(
            self,
            AdvertisingType::ConnectableHighDutyCycleDirected | AdvertisingType::ConnectableLowDutyCycleDirected
        )
    }
}

/// The address type used by the controller for its own address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OwnAddressType {
    #[default]
    PublicDeviceAddress,
    RandomDeviceAddress,
    RpaFromLocalIrkOrPublicAddress,
    RpaFromLocalIrkOrRandomAddress,
}

impl OwnAddressType {
    pub fn into_val(self) -> u8 {
        match self {
            OwnAddressType::PublicDeviceAddress => 0x00,
            OwnAddressType::RandomDeviceAddress => 0x01,
            OwnAddressType::RpaFromLocalIrkOrPublicAddress => 0x02,
            OwnAddressType::RpaFromLocalIrkOrRandomAddress => 0x03,
        }
    }
}

/// The address type of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeerAddressType {
    #[default]
    PublicAddress,
    RandomAddress,
}

impl PeerAddressType {
    pub fn into_val(self) -> u8 {
        match self {
            PeerAddressType::PublicAddress => 0x00,
            PeerAddressType::RandomAddress => 0x01,
        }
    }
}

/// The advertising channels
///
/// This is a bit mask, channel 37 is bit 0, channel 38 is bit 1, and channel 39 is bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisingChannelMap(u8);

impl AdvertisingChannelMap {
    pub const CHANNEL_37: Self = AdvertisingChannelMap(0x1);
    pub const CHANNEL_38: Self = AdvertisingChannelMap(0x2);
    pub const CHANNEL_39: Self = AdvertisingChannelMap(0x4);
    pub const ALL: Self = AdvertisingChannelMap(0x7);

    /// Create a channel map from the raw bit mask
    ///
    /// At least one channel must be enabled.
    pub fn try_from_raw(raw: u8) -> Result<Self, &'static str> {
        if raw != 0 && raw & !0x7 == 0 {
            Ok(AdvertisingChannelMap(raw))
        } else {
            Err("channel map must enable at least one of channels 37, 38, or 39")
        }
    }

    pub fn get_raw_val(&self) -> u8 {
        self.0
    }
}

impl Default for AdvertisingChannelMap {
    fn default() -> Self {
        Self::ALL
    }
}

/// The advertising filter policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AdvertisingFilterPolicy {
    #[default]
    AllDevices,
    AllConnectionRequestsWhiteListedDeviceScanRequests,
    AllScanRequestsWhiteListedDeviceConnectionRequests,
    WhiteListedDevices,
}

impl AdvertisingFilterPolicy {
    pub fn into_val(self) -> u8 {
        match self {
            AdvertisingFilterPolicy::AllDevices => 0x00,
            AdvertisingFilterPolicy::AllConnectionRequestsWhiteListedDeviceScanRequests => 0x01,
            AdvertisingFilterPolicy::AllScanRequestsWhiteListedDeviceConnectionRequests => 0x02,
            AdvertisingFilterPolicy::WhiteListedDevices => 0x03,
        }
    }
}

/// The type of scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanType {
    PassiveScanning,
    #[default]
    ActiveScanning,
}

impl ScanType {
    pub fn into_val(self) -> u8 {
        match self {
            ScanType::PassiveScanning => 0x00,
            ScanType::ActiveScanning => 0x01,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, u8> {
        match val {
            0x00 => Ok(ScanType::PassiveScanning),
            0x01 => Ok(ScanType::ActiveScanning),
            _ => Err(val),
        }
    }
}

/// The scanning filter policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanningFilterPolicy {
    #[default]
    AcceptAll,
    WhiteListed,
}

impl ScanningFilterPolicy {
    pub fn into_val(self) -> u8 {
        match self {
            ScanningFilterPolicy::AcceptAll => 0x00,
            ScanningFilterPolicy::WhiteListed => 0x01,
        }
    }
}

/// Parameters of the *LE Set Advertising Parameters* command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdvertisingParameters {
    pub minimum_advertising_interval: AdvertisingInterval,
    pub maximum_advertising_interval: AdvertisingInterval,
    pub advertising_type: AdvertisingType,
    pub own_address_type: OwnAddressType,
    pub peer_address_type: PeerAddressType,
    pub peer_address: BluetoothDeviceAddress,
    pub advertising_channel_map: AdvertisingChannelMap,
    pub advertising_filter_policy: AdvertisingFilterPolicy,
}

/// Parameters of the *LE Set Scan Parameters* command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanningParameters {
    pub scan_type: ScanType,
    pub scan_interval: ScanningInterval,
    pub scan_window: ScanningWindow,
    pub own_address_type: OwnAddressType,
    pub scanning_filter_policy: ScanningFilterPolicy,
}

/// A command sent to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetRandomAddress(BluetoothDeviceAddress),
    SetAdvertisingParameters(AdvertisingParameters),
    SetAdvertisingData(LinearBuffer<31, u8>),
    SetScanResponseData(LinearBuffer<31, u8>),
    SetAdvertisingEnable(bool),
    SetScanParameters(ScanningParameters),
    SetScanEnable { enable: bool, filter_duplicates: bool },
}

/// The opcode group of the LE controller commands
const LE_OGF: u16 = 0x08;

impl Command {
    /// Get the opcode of the command
    pub fn opcode(&self) -> u16 {
        let ocf = match self {
            Command::SetRandomAddress(_) => 0x0005,
            Command::SetAdvertisingParameters(_) => 0x0006,
            Command::SetAdvertisingData(_) => 0x0008,
            Command::SetScanResponseData(_) => 0x0009,
            Command::SetAdvertisingEnable(_) => 0x000A,
            Command::SetScanParameters(_) => 0x000B,
            Command::SetScanEnable { .. } => 0x000C,
        };

        LE_OGF << 10 | ocf
    }

    /// Pack the command parameter
    pub fn get_parameter(&self) -> CommandParameter {
        let mut parameter = CommandParameter::new();

        // no parameter is larger than MAX_PARAMETER_LEN
        let _ = match self {
            Command::SetRandomAddress(address) => parameter.try_extend_from_slice(&address.0),
            Command::SetAdvertisingParameters(p) => {
                let mut raw = [0u8; 15];

                raw[0..2].copy_from_slice(&p.minimum_advertising_interval.get_raw_val().to_le_bytes());
                raw[2..4].copy_from_slice(&p.maximum_advertising_interval.get_raw_val().to_le_bytes());
                raw[4] = p.advertising_type.into_val();
                raw[5] = p.own_address_type.into_val();
                raw[6] = p.peer_address_type.into_val();
                raw[7..13].copy_from_slice(&p.peer_address.0);
                raw[13] = p.advertising_channel_map.get_raw_val();
                raw[14] = p.advertising_filter_policy.into_val();

                parameter.try_extend_from_slice(&raw)
            }
            Command::SetAdvertisingData(data) | Command::SetScanResponseData(data) => {
                let mut raw = [0u8; 32];

                raw[0] = data.len() as u8;
                raw[1..1 + data.len()].copy_from_slice(data);

                parameter.try_extend_from_slice(&raw)
            }
            Command::SetAdvertisingEnable(enable) => parameter.try_push(*enable as u8),
            Command::SetScanParameters(p) => {
                let mut raw = [0u8; 7];

                raw[0] = p.scan_type.into_val();
                raw[1..3].copy_from_slice(&p.scan_interval.get_raw_val().to_le_bytes());
                raw[3..5].copy_from_slice(&p.scan_window.get_raw_val().to_le_bytes());
                raw[5] = p.own_address_type.into_val();
                raw[6] = p.scanning_filter_policy.into_val();

                parameter.try_extend_from_slice(&raw)
            }
            Command::SetScanEnable {
                enable,
                filter_duplicates,
            } => parameter.try_extend_from_slice(&[*enable as u8, *filter_duplicates as u8]),
        };

        parameter
    }
}
