//! The GAP controller
//!
//! [`GapController`] holds the advertising and scanning state of the local device. Every
//! operation that needs the Bluetooth controller sends a [`Command`] through the
//! [`GapEnvironment`] and the controller state is updated once the command was sent. Command
//! failures reported later by the Bluetooth controller are passed to [`on_adv_enable_complete`]
//! and [`on_scan_enable_complete`] to roll the state back.
//!
//! [`on_adv_enable_complete`]: GapController::on_adv_enable_complete
//! [`on_scan_enable_complete`]: GapController::on_scan_enable_complete

mod scan;

pub use scan::{InquiryMode, InquiryParameters, ScanningState};

use crate::advertising_data::{AdvertisingData, AdvertisingDataBuffer, AdvertisingDataMask, MAX_ADVERTISING_DATA_LEN};
use crate::assigned::flags;
use crate::cache::InquiryResult;
use crate::config::{GapConfig, PrivacyMode};
use crate::hci::{
    AdvertisingChannelMap, AdvertisingFilterPolicy, AdvertisingInterval, AdvertisingParameters, AdvertisingType,
    Command, OwnAddressType, PeerAddressType,
};
use crate::time_consts::{FAST_ADVERTISING_PERIOD, LIMITED_DISCOVERABLE_TIMEOUT};
use crate::topology::{TopologyMask, TopologyState, TopologyTracker};
use crate::Error;
use core::time::Duration;
use le_host_core::buffer::LinearBuffer;
use le_host_core::errors::Error as ControllerError;
use le_host_core::{AddressType, BluetoothDeviceAddress};
use scan::ScanningControl;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Advertising interval for connectable advertising (30ms to 60ms)
const FAST_INTERVAL_1: (AdvertisingInterval, AdvertisingInterval) = (
    AdvertisingInterval::from_raw_unchecked(0x0030),
    AdvertisingInterval::from_raw_unchecked(0x0060),
);

/// Advertising interval for non-connectable advertising (100ms to 150ms)
const FAST_INTERVAL_2: (AdvertisingInterval, AdvertisingInterval) = (
    AdvertisingInterval::from_raw_unchecked(0x00A0),
    AdvertisingInterval::from_raw_unchecked(0x00F0),
);

/// Advertising interval for high duty cycle directed advertising
const HIGH_DUTY_DIRECTED_INTERVAL: (AdvertisingInterval, AdvertisingInterval) = (
    AdvertisingInterval::from_raw_unchecked(400),
    AdvertisingInterval::from_raw_unchecked(800),
);

/// Advertising interval once fast advertising has ended (1.28s)
const SLOW_INTERVAL: AdvertisingInterval = AdvertisingInterval::from_raw_unchecked(0x0800);

/// The command could not be sent to the Bluetooth controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError;

impl core::fmt::Display for SendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("failed to send the command to the controller")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SendError {}

/// The timers used by the GAP controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GapTimer {
    /// End of fast advertising
    FastAdvertising,
    /// End of the limited discoverable mode
    LimitedDiscoverable,
    /// End of observation
    Observe,
    /// End of a discovery scan
    Discover,
    /// End of an inquiry
    Inquiry,
}

/// The procedure a result or a completion belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Inquiry,
    Observe,
    Discover,
}

/// What the resolving list of the controller is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvingListUsage {
    Advertising,
    Scanning,
}

/// The role of the local device within a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Master,
    Slave,
}

/// The environment of the GAP controller
///
/// This is where the GAP controller sends its commands, runs its timers, and reports its
/// results. The methods with a default implementation are hooks into the privacy and white list
/// management of the host, the defaults are for a host without either.
pub trait GapEnvironment {
    /// Send a command to the Bluetooth controller
    fn send_command(&mut self, command: Command) -> Result<(), SendError>;

    /// Start (or restart) a timer
    ///
    /// The expiration is delivered back through
    /// [`on_timer_expired`](GapController::on_timer_expired).
    fn start_timer(&mut self, timer: GapTimer, duration: Duration);

    /// Stop a timer
    ///
    /// Stopping a timer that is not running does nothing.
    fn stop_timer(&mut self, timer: GapTimer);

    /// A device was found by an inquiry, by observation, or by a discovery scan
    ///
    /// `data` is the cached advertising data and scan response data of the device.
    fn on_result(&mut self, kind: ResultKind, result: &InquiryResult, data: &[u8]);

    /// An inquiry, observation, or discovery scan finished
    fn on_complete(&mut self, kind: ResultKind, status: ControllerError, num_responses: u16);

    /// Look up the identity of a peer within the resolving list
    fn resolving_list_identity(
        &mut self,
        _address: &BluetoothDeviceAddress,
    ) -> Option<(AddressType, BluetoothDeviceAddress)> {
        None
    }

    /// Get the identity of the first entry of the resolving list
    fn first_resolving_list_entry(&mut self) -> Option<(AddressType, BluetoothDeviceAddress)> {
        None
    }

    fn enable_resolving_list(&mut self, _usage: ResolvingListUsage) {}

    fn disable_resolving_list(&mut self, _usage: ResolvingListUsage) {}

    /// Apply the pending changes to the white list
    fn execute_white_list_operations(&mut self) {}

    /// Map a reported address to the identity of the peer
    ///
    /// The returned address and address type replace the ones within the advertising report.
    fn map_to_identity(&mut self, address: BluetoothDeviceAddress, address_type: u8) -> (BluetoothDeviceAddress, u8) {
        (address, address_type)
    }

    /// A connectable device was found while selective connection is active
    fn on_selective_connection_candidate(&mut self, _address: &BluetoothDeviceAddress, _name: Option<&[u8]>) {}
}

/// The discoverable mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DiscoverableMode {
    #[default]
    NonDiscoverable,
    LimitedDiscoverable,
    GeneralDiscoverable,
}

impl DiscoverableMode {
    pub fn into_val(self) -> u16 {
        match self {
            DiscoverableMode::NonDiscoverable => 0x000,
            DiscoverableMode::LimitedDiscoverable => 0x100,
            DiscoverableMode::GeneralDiscoverable => 0x200,
        }
    }

    pub fn try_from_val(val: u16) -> Result<Self, Error> {
        match val {
            0x000 => Ok(DiscoverableMode::NonDiscoverable),
            0x100 => Ok(DiscoverableMode::LimitedDiscoverable),
            0x200 => Ok(DiscoverableMode::GeneralDiscoverable),
            _ => Err(Error::IllegalValue),
        }
    }
}

/// The connectable mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectableMode {
    #[default]
    NonConnectable,
    Connectable,
}

impl ConnectableMode {
    pub fn into_val(self) -> u16 {
        match self {
            ConnectableMode::NonConnectable => 0x000,
            ConnectableMode::Connectable => 0x100,
        }
    }

    pub fn try_from_val(val: u16) -> Result<Self, Error> {
        match val {
            0x000 => Ok(ConnectableMode::NonConnectable),
            0x100 => Ok(ConnectableMode::Connectable),
            _ => Err(Error::IllegalValue),
        }
    }
}

/// How a connectable device advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DirectedConnection {
    #[default]
    Undirected,
    HighDuty,
    LowDuty,
}

/// The state of advertising
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertisingState {
    #[default]
    Idle,
    Advertising,
    StopAdvertising,
}

/// Advertising parameters set by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisingConfig {
    pub interval_min: AdvertisingInterval,
    pub interval_max: AdvertisingInterval,
    pub channel_map: AdvertisingChannelMap,
    pub advertising_type: AdvertisingType,
    pub own_address_type: OwnAddressType,
    /// The peer of directed advertising
    pub peer_address_type: PeerAddressType,
    pub peer_address: BluetoothDeviceAddress,
    pub filter_policy: AdvertisingFilterPolicy,
}

/// The addresses and event type of the next advertising parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResolvedAddresses {
    advertising_type: AdvertisingType,
    own_address_type: OwnAddressType,
    peer_address_type: PeerAddressType,
    peer_address: BluetoothDeviceAddress,
}

fn peer_address_type(address_type: AddressType) -> PeerAddressType {
    if address_type.is_random() {
        PeerAddressType::RandomAddress
    } else {
        PeerAddressType::PublicAddress
    }
}

/// The topology state entered by advertising with `advertising_type`
fn advertising_topology_state(advertising_type: AdvertisingType) -> TopologyState {
    match advertising_type {
        AdvertisingType::ConnectableAndScannableUndirected => TopologyState::ConnectableAdvertising,
        AdvertisingType::ConnectableHighDutyCycleDirected => TopologyState::HighDutyDirectedAdvertising,
        AdvertisingType::ConnectableLowDutyCycleDirected => TopologyState::LowDutyDirectedAdvertising,
        AdvertisingType::ScannableUndirected => TopologyState::ScannableAdvertising,
        AdvertisingType::NonConnectableUndirected => TopologyState::NonConnectableAdvertising,
    }
}

#[derive(Debug, Clone)]
struct AdvertisingControl {
    state: AdvertisingState,
    enabled: bool,
    fast_adv_on: bool,
    connectable_mode: ConnectableMode,
    discoverable_mode: DiscoverableMode,
    directed_connection: DirectedConnection,
    /// Count of sent *set advertising parameters* commands
    parameter_writes: u32,
    /// Parameters of the last *set advertising parameters* command
    advertising_type: AdvertisingType,
    own_address_type: OwnAddressType,
    peer_address_type: PeerAddressType,
    peer_address: BluetoothDeviceAddress,
    interval: (AdvertisingInterval, AdvertisingInterval),
    /// Interval configured by the user, this replaces the fast advertising intervals
    custom_interval: Option<(AdvertisingInterval, AdvertisingInterval)>,
    direct_peer_address_type: PeerAddressType,
    direct_peer_address: BluetoothDeviceAddress,
    channel_map: AdvertisingChannelMap,
    filter_policy: AdvertisingFilterPolicy,
    scan_rsp: bool,
    white_list_engaged: bool,
    data: AdvertisingDataBuffer,
}

impl AdvertisingControl {
    fn new(own_address_type: OwnAddressType) -> Self {
        AdvertisingControl {
            state: AdvertisingState::Idle,
            enabled: false,
            fast_adv_on: false,
            connectable_mode: ConnectableMode::NonConnectable,
            discoverable_mode: DiscoverableMode::NonDiscoverable,
            directed_connection: DirectedConnection::Undirected,
            parameter_writes: 0,
            advertising_type: AdvertisingType::NonConnectableUndirected,
            own_address_type,
            peer_address_type: PeerAddressType::PublicAddress,
            peer_address: BluetoothDeviceAddress::zeroed(),
            interval: (SLOW_INTERVAL, SLOW_INTERVAL),
            custom_interval: None,
            direct_peer_address_type: PeerAddressType::PublicAddress,
            direct_peer_address: BluetoothDeviceAddress::zeroed(),
            channel_map: AdvertisingChannelMap::ALL,
            filter_policy: AdvertisingFilterPolicy::AllDevices,
            scan_rsp: false,
            white_list_engaged: false,
            data: AdvertisingDataBuffer::new(),
        }
    }

    fn current_addresses(&self) -> ResolvedAddresses {
        ResolvedAddresses {
            advertising_type: self.advertising_type,
            own_address_type: self.own_address_type,
            peer_address_type: self.peer_address_type,
            peer_address: self.peer_address,
        }
    }
}

/// The GAP controller
///
/// See the [module] level documentation.
///
/// [module]: self
pub struct GapController<E> {
    env: E,
    config: GapConfig,
    topology: TopologyTracker,
    adv: AdvertisingControl,
    scan: ScanningControl,
    master_links: usize,
    slave_links: usize,
}

impl<E: GapEnvironment> GapController<E> {
    pub fn new(config: GapConfig, env: E) -> Self {
        let topology = TopologyTracker::new(config.le_supported_states);
        let adv = AdvertisingControl::new(config.own_address_type);

        GapController {
            env,
            config,
            topology,
            adv,
            scan: ScanningControl::new(),
            master_links: 0,
            slave_links: 0,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn config(&self) -> &GapConfig {
        &self.config
    }

    /// Get the current link layer states
    pub fn topology(&self) -> TopologyMask {
        self.topology.current()
    }

    pub fn is_advertising(&self) -> bool {
        self.adv.enabled
    }

    pub fn advertising_state(&self) -> AdvertisingState {
        self.adv.state
    }

    pub fn read_discoverability(&self) -> DiscoverableMode {
        self.adv.discoverable_mode
    }

    pub fn read_connectability(&self) -> ConnectableMode {
        self.adv.connectable_mode
    }

    /// Get the advertising data last built by [`write_advertising_data`]
    ///
    /// [`write_advertising_data`]: GapController::write_advertising_data
    pub fn advertising_data(&self) -> &AdvertisingDataBuffer {
        &self.adv.data
    }

    /// Read the current advertising parameters
    pub fn read_advertising_parameters(&self) -> AdvertisingConfig {
        let (interval_min, interval_max) = self.adv.custom_interval.unwrap_or(self.adv.interval);

        AdvertisingConfig {
            interval_min,
            interval_max,
            channel_map: self.adv.channel_map,
            advertising_type: self.adv.advertising_type,
            own_address_type: self.adv.own_address_type,
            peer_address_type: self.adv.direct_peer_address_type,
            peer_address: self.adv.direct_peer_address,
            filter_policy: self.adv.filter_policy,
        }
    }

    fn check_ble(&self) -> Result<(), Error> {
        if self.config.supports_ble {
            Ok(())
        } else {
            log::error!("(GAP) controller does not support LE");

            Err(Error::IllegalValue)
        }
    }

    fn send(&mut self, command: Command) -> Result<(), Error> {
        let opcode = command.opcode();

        self.env.send_command(command).map_err(|e| {
            log::error!("(GAP) command {:#06x}: {}", opcode, e);

            Error::NoResources
        })
    }

    /// Set the random address of the controller
    pub fn set_random_address(&mut self, address: BluetoothDeviceAddress) -> Result<(), Error> {
        self.check_ble()?;

        self.send(Command::SetRandomAddress(address))
    }

    /// Set the advertising parameters
    ///
    /// Advertising is stopped for the update and restarted afterwards if it was enabled. The
    /// interval within `config` replaces the intervals normally picked by the discoverable and
    /// connectable modes.
    pub fn set_advertising_parameters(&mut self, config: AdvertisingConfig) -> Result<(), Error> {
        self.check_ble()?;

        if config.interval_min > config.interval_max {
            log::error!("(GAP) minimum advertising interval is larger than the maximum");
            return Err(Error::IllegalValue);
        }

        if config.advertising_type.is_directed() && config.peer_address.is_zeroed() {
            log::error!("(GAP) directed advertising requires a peer address");
            return Err(Error::IllegalValue);
        }

        self.rollback_on_error(|gap| {
            let was_enabled = gap.adv.enabled;

            if was_enabled {
                gap.stop_advertising()?;
            }

            gap.adv.custom_interval = Some((config.interval_min, config.interval_max));
            gap.adv.channel_map = config.channel_map;
            gap.adv.filter_policy = config.filter_policy;
            gap.adv.direct_peer_address_type = config.peer_address_type;
            gap.adv.direct_peer_address = config.peer_address;

            gap.adv.directed_connection = match config.advertising_type {
                AdvertisingType::ConnectableHighDutyCycleDirected => DirectedConnection::HighDuty,
                AdvertisingType::ConnectableLowDutyCycleDirected => DirectedConnection::LowDuty,
                _ => DirectedConnection::Undirected,
            };

            gap.adv.connectable_mode = match config.advertising_type {
                AdvertisingType::ScannableUndirected | AdvertisingType::NonConnectableUndirected => {
                    ConnectableMode::NonConnectable
                }
                _ => ConnectableMode::Connectable,
            };

            let addresses = ResolvedAddresses {
                advertising_type: config.advertising_type,
                own_address_type: config.own_address_type,
                peer_address_type: config.peer_address_type,
                peer_address: config.peer_address,
            };

            gap.write_advertising_parameters((config.interval_min, config.interval_max), addresses)?;

            if was_enabled {
                gap.start_adv()?;
            }

            Ok(())
        })
    }

    /// Run an advertising operation, restoring the advertising state if it fails
    ///
    /// A failed operation may have already sent some of its commands. Those are reverted with
    /// the saved state, if reverting fails too the state mirrors what the controller was left
    /// with.
    fn rollback_on_error<F>(&mut self, operation: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Self) -> Result<(), Error>,
    {
        let saved = self.adv.clone();

        operation(self).map_err(|e| {
            self.restore_advertising(saved);

            e
        })
    }

    fn restore_advertising(&mut self, saved: AdvertisingControl) {
        let failed = core::mem::replace(&mut self.adv, saved.clone());

        // values held by the controller
        self.adv.state = failed.state;
        self.adv.enabled = failed.enabled;
        self.adv.fast_adv_on = failed.fast_adv_on;
        self.adv.white_list_engaged = failed.white_list_engaged;
        self.adv.parameter_writes = failed.parameter_writes;
        self.adv.interval = failed.interval;
        self.adv.advertising_type = failed.advertising_type;
        self.adv.own_address_type = failed.own_address_type;
        self.adv.peer_address_type = failed.peer_address_type;
        self.adv.peer_address = failed.peer_address;
        self.adv.data = failed.data;

        if let Err(e) = self.revert_controller(&saved) {
            log::error!("(GAP) failed to restore advertising: {}", e);
        }
    }

    fn revert_controller(&mut self, saved: &AdvertisingControl) -> Result<(), Error> {
        if self.adv.parameter_writes != saved.parameter_writes {
            self.stop_advertising()?;
            self.write_advertising_parameters(saved.interval, saved.current_addresses())?;
        }

        if self.adv.data != saved.data {
            self.send(Command::SetAdvertisingData(saved.data.payload()))?;

            self.adv.data = saved.data.clone();
        }

        if saved.enabled && !self.adv.enabled {
            self.start_adv()?;
        } else if !saved.enabled && self.adv.enabled {
            self.stop_advertising()?;
        }

        self.adv.fast_adv_on = saved.fast_adv_on && self.adv.enabled;

        Ok(())
    }

    fn write_advertising_parameters(
        &mut self,
        interval: (AdvertisingInterval, AdvertisingInterval),
        addresses: ResolvedAddresses,
    ) -> Result<(), Error> {
        let parameters = AdvertisingParameters {
            minimum_advertising_interval: interval.0,
            maximum_advertising_interval: interval.1,
            advertising_type: addresses.advertising_type,
            own_address_type: addresses.own_address_type,
            peer_address_type: addresses.peer_address_type,
            peer_address: addresses.peer_address,
            advertising_channel_map: self.adv.channel_map,
            advertising_filter_policy: self.adv.filter_policy,
        };

        self.send(Command::SetAdvertisingParameters(parameters))?;

        self.adv.parameter_writes = self.adv.parameter_writes.wrapping_add(1);
        self.adv.interval = interval;
        self.adv.advertising_type = addresses.advertising_type;
        self.adv.own_address_type = addresses.own_address_type;
        self.adv.peer_address_type = addresses.peer_address_type;
        self.adv.peer_address = addresses.peer_address;

        Ok(())
    }

    /// Start advertising
    ///
    /// Nothing is sent if advertising is already enabled.
    pub fn start_advertising(&mut self) -> Result<(), Error> {
        self.check_ble()?;

        if self.adv.enabled {
            log::debug!("(GAP) advertising is already enabled");
            return Ok(());
        }

        self.start_adv()
    }

    fn start_adv(&mut self) -> Result<(), Error> {
        let state = advertising_topology_state(self.adv.advertising_type);

        if !self.topology.check_state(state.mask()) {
            log::error!("(GAP) cannot advertise ({:?}) in the current state", state);
            return Err(Error::WrongMode);
        }

        if self.config.privacy.is_enabled() && !self.adv.advertising_type.is_directed() {
            self.env.enable_resolving_list(ResolvingListUsage::Advertising);
        }

        if self.adv.filter_policy != AdvertisingFilterPolicy::AllDevices {
            self.env.execute_white_list_operations();
            self.adv.white_list_engaged = true;
        }

        match self.send(Command::SetAdvertisingEnable(true)) {
            Ok(()) => {
                log::info!("(GAP) advertising started");

                self.adv.enabled = true;
                self.adv.state = AdvertisingState::Advertising;
                self.topology.set_state(state);

                Ok(())
            }
            Err(e) => {
                self.adv.enabled = false;
                self.adv.white_list_engaged = false;

                Err(e)
            }
        }
    }

    /// Stop advertising
    ///
    /// Nothing is sent if advertising is not enabled. The advertising parameters are kept.
    pub fn stop_advertising(&mut self) -> Result<(), Error> {
        if !self.adv.enabled {
            return Ok(());
        }

        self.send(Command::SetAdvertisingEnable(false))?;

        log::info!("(GAP) advertising stopped");

        self.adv.fast_adv_on = false;
        self.adv.enabled = false;
        self.adv.state = AdvertisingState::StopAdvertising;
        self.adv.white_list_engaged = false;
        self.topology.clear_state(TopologyMask::ADVERTISING);

        Ok(())
    }

    /// Determine the advertising type and the addresses for the connectable and discoverable
    /// modes
    fn resolve_addresses(&mut self) -> ResolvedAddresses {
        let privacy = self.config.privacy;

        let advertising_type = match (self.adv.connectable_mode, self.adv.directed_connection) {
            (ConnectableMode::NonConnectable, _) if self.adv.scan_rsp => AdvertisingType::ScannableUndirected,
            (ConnectableMode::NonConnectable, _) => AdvertisingType::NonConnectableUndirected,
            (_, DirectedConnection::Undirected) => AdvertisingType::ConnectableAndScannableUndirected,
            (_, DirectedConnection::HighDuty) => AdvertisingType::ConnectableHighDutyCycleDirected,
            (_, DirectedConnection::LowDuty) => AdvertisingType::ConnectableLowDutyCycleDirected,
        };

        let mut resolved = ResolvedAddresses {
            advertising_type,
            own_address_type: self.config.own_address_type,
            peer_address_type: self.adv.direct_peer_address_type,
            peer_address: self.adv.direct_peer_address,
        };

        if advertising_type.is_directed() {
            if privacy.uses_resolving_list() {
                if let Some((address_type, identity)) = self.env.resolving_list_identity(&self.adv.direct_peer_address) {
                    self.env.enable_resolving_list(ResolvingListUsage::Advertising);

                    resolved.own_address_type = OwnAddressType::RpaFromLocalIrkOrRandomAddress;
                    resolved.peer_address_type = peer_address_type(address_type);
                    resolved.peer_address = identity;

                    return resolved;
                }
            }

            if privacy.is_enabled() {
                self.env.disable_resolving_list(ResolvingListUsage::Advertising);
            }

            return resolved;
        }

        let with_white_list = self.adv.filter_policy != AdvertisingFilterPolicy::AllDevices;

        if (privacy == PrivacyMode::V1_2 && with_white_list) || privacy == PrivacyMode::Mixed {
            match self.env.first_resolving_list_entry() {
                Some((address_type, identity)) => {
                    resolved.own_address_type = OwnAddressType::RpaFromLocalIrkOrRandomAddress;
                    resolved.peer_address_type = peer_address_type(address_type);
                    resolved.peer_address = identity;
                }
                None => resolved.own_address_type = OwnAddressType::RandomDeviceAddress,
            }
        } else if privacy.is_enabled() {
            resolved.own_address_type = OwnAddressType::RandomDeviceAddress;
        }

        resolved
    }

    fn select_interval(&self, advertising_type: AdvertisingType) -> (AdvertisingInterval, AdvertisingInterval) {
        if let Some(interval) = self.adv.custom_interval {
            return interval;
        }

        match advertising_type {
            AdvertisingType::ConnectableHighDutyCycleDirected => HIGH_DUTY_DIRECTED_INTERVAL,
            AdvertisingType::ConnectableAndScannableUndirected | AdvertisingType::ConnectableLowDutyCycleDirected => {
                FAST_INTERVAL_1
            }
            AdvertisingType::ScannableUndirected | AdvertisingType::NonConnectableUndirected => FAST_INTERVAL_2,
        }
    }

    /// Update the Flags AD structure for the discoverable mode
    ///
    /// The advertising data is only sent when the flag changed.
    fn set_adv_flag(&mut self) -> Result<(), Error> {
        let old_flag = self.adv.data.flag();

        let mut flag = old_flag.unwrap_or_default() | flags::BR_EDR_NOT_SUPPORTED;

        if self.config.simultaneous_le_bredr {
            flag |= flags::DMT_MASK;
        } else {
            flag &= !flags::DMT_MASK;
        }

        flag &= !flags::DISCOVERABLE_MASK;

        match self.adv.discoverable_mode {
            DiscoverableMode::LimitedDiscoverable => flag |= flags::LE_LIMITED_DISCOVERABLE_MODE,
            DiscoverableMode::GeneralDiscoverable => flag |= flags::LE_GENERAL_DISCOVERABLE_MODE,
            DiscoverableMode::NonDiscoverable => (),
        }

        if old_flag == Some(flag) {
            return Ok(());
        }

        log::trace!("(GAP) advertising flag {:#04x}", flag);

        let mut data = self.adv.data.clone();

        data.update_flag(flag);

        self.send(Command::SetAdvertisingData(data.payload()))?;

        self.adv.data = data;

        Ok(())
    }

    /// Apply the connectable and discoverable modes
    fn update_advertising_mode(&mut self) -> Result<(), Error> {
        let resolved = self.resolve_addresses();

        let new_enable = !(self.adv.connectable_mode == ConnectableMode::NonConnectable
            && self.adv.discoverable_mode == DiscoverableMode::NonDiscoverable);

        let interval = self.select_interval(resolved.advertising_type);

        if new_enable {
            self.set_adv_flag()?;

            let parameters_changed = resolved.advertising_type != self.adv.advertising_type
                || resolved.own_address_type != self.adv.own_address_type
                || !self.adv.fast_adv_on;

            if parameters_changed {
                self.stop_advertising()?;
                self.write_advertising_parameters(interval, resolved)?;
            }
        }

        if self.adv.enabled != new_enable {
            if new_enable {
                self.start_adv()?;
            } else {
                self.stop_advertising()?;
            }
        }

        self.env.stop_timer(GapTimer::FastAdvertising);

        if self.adv.enabled {
            self.adv.fast_adv_on = true;
            self.env.start_timer(GapTimer::FastAdvertising, FAST_ADVERTISING_PERIOD);
        } else if self.config.privacy.is_enabled() {
            self.env.disable_resolving_list(ResolvingListUsage::Advertising);
        }

        Ok(())
    }

    /// Set the discoverable mode
    ///
    /// Advertising is started when the device becomes discoverable and stopped when it is
    /// neither discoverable nor connectable. The limited discoverable mode ends after
    /// [`LIMITED_DISCOVERABLE_TIMEOUT`]. Nothing changes when the mode cannot be applied.
    pub fn set_discoverability(&mut self, mode: DiscoverableMode) -> Result<(), Error> {
        self.check_ble()?;

        log::debug!("(GAP) discoverable mode {:?}", mode);

        self.rollback_on_error(|gap| {
            gap.adv.discoverable_mode = mode;

            gap.update_advertising_mode()
        })?;

        if mode == DiscoverableMode::LimitedDiscoverable {
            self.env
                .start_timer(GapTimer::LimitedDiscoverable, LIMITED_DISCOVERABLE_TIMEOUT);
        } else {
            self.env.stop_timer(GapTimer::LimitedDiscoverable);
        }

        Ok(())
    }

    /// Set the connectable mode
    pub fn set_connectability(&mut self, mode: ConnectableMode) -> Result<(), Error> {
        self.check_ble()?;

        log::debug!("(GAP) connectable mode {:?}", mode);

        self.rollback_on_error(|gap| {
            gap.adv.connectable_mode = mode;

            gap.update_advertising_mode()
        })
    }

    /// Set how connectable advertising is directed
    ///
    /// Directed advertising goes to the peer of the last [`set_advertising_parameters`].
    ///
    /// [`set_advertising_parameters`]: GapController::set_advertising_parameters
    pub fn set_connectable_mode(&mut self, directed: DirectedConnection) -> Result<(), Error> {
        self.check_ble()?;

        if directed != DirectedConnection::Undirected && self.adv.direct_peer_address.is_zeroed() {
            log::error!("(GAP) directed advertising requires a peer address");
            return Err(Error::IllegalValue);
        }

        self.rollback_on_error(|gap| {
            gap.adv.directed_connection = directed;

            gap.update_advertising_mode()
        })
    }

    /// Change the advertising filter policy
    pub fn update_advertising_filter_policy(&mut self, filter_policy: AdvertisingFilterPolicy) -> Result<(), Error> {
        self.check_ble()?;

        if self.adv.filter_policy == filter_policy {
            return Ok(());
        }

        self.rollback_on_error(|gap| {
            gap.adv.filter_policy = filter_policy;

            let addresses = if gap.adv.connectable_mode == ConnectableMode::Connectable {
                gap.resolve_addresses()
            } else {
                gap.adv.current_addresses()
            };

            let was_enabled = gap.adv.enabled;

            if was_enabled {
                gap.stop_advertising()?;
            }

            let interval = gap.adv.custom_interval.unwrap_or((SLOW_INTERVAL, SLOW_INTERVAL));

            gap.write_advertising_parameters(interval, addresses)?;

            if was_enabled {
                gap.start_adv()?;
            }

            Ok(())
        })
    }

    /// Build and send the advertising data
    ///
    /// Fields within `mask` that do not fit are left out with a warning.
    pub fn write_advertising_data(&mut self, mask: AdvertisingDataMask, data: &AdvertisingData) -> Result<(), Error> {
        self.check_ble()?;

        let mut buffer = self.adv.data.clone();

        let remaining = buffer.build(mask, data, &self.config.device_name);

        if !remaining.is_empty() {
            log::warn!("(GAP) advertising data fields {:#x} did not fit", remaining.bits());
        }

        self.send(Command::SetAdvertisingData(buffer.payload()))?;

        self.adv.data = buffer;

        Ok(())
    }

    /// Build and send the scan response data
    pub fn write_scan_response_data(&mut self, mask: AdvertisingDataMask, data: &AdvertisingData) -> Result<(), Error> {
        self.check_ble()?;

        let mut buffer = AdvertisingDataBuffer::new();

        let remaining = buffer.build(mask, data, &self.config.device_name);

        if !remaining.is_empty() {
            log::warn!("(GAP) scan response data fields {:#x} did not fit", remaining.bits());
        }

        self.send(Command::SetScanResponseData(buffer.payload()))?;

        self.adv.scan_rsp = !mask.is_empty();

        Ok(())
    }

    fn raw_data(data: &[u8]) -> Result<LinearBuffer<MAX_ADVERTISING_DATA_LEN, u8>, Error> {
        LinearBuffer::try_from(data).map_err(|_| {
            log::error!("(GAP) {} octets of data is larger than {}", data.len(), MAX_ADVERTISING_DATA_LEN);

            Error::IllegalValue
        })
    }

    /// Send already encoded advertising data
    pub fn write_advertising_data_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_ble()?;

        let data = Self::raw_data(data)?;

        self.send(Command::SetAdvertisingData(data))
    }

    /// Send already encoded scan response data
    pub fn write_scan_response_data_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_ble()?;

        let buffer = Self::raw_data(data)?;

        self.send(Command::SetScanResponseData(buffer))?;

        self.adv.scan_rsp = !data.is_empty();

        Ok(())
    }

    /// Process the status of a *set advertising enable* command
    ///
    /// A failure means the enable (or disable) never took effect.
    pub fn on_adv_enable_complete(&mut self, status: ControllerError) {
        if status.is_ok() {
            return;
        }

        log::error!("(GAP) set advertising enable failed: {}", status);

        self.adv.enabled = !self.adv.enabled;

        if self.adv.enabled {
            self.adv.state = AdvertisingState::Advertising;
            self.topology
                .set_state(advertising_topology_state(self.adv.advertising_type));
        } else {
            self.adv.fast_adv_on = false;
            self.adv.state = AdvertisingState::StopAdvertising;
            self.adv.white_list_engaged = false;
            self.topology.clear_state(TopologyMask::ADVERTISING);
        }
    }

    /// High duty cycle directed advertising timed out without a connection
    pub fn on_directed_advertising_timeout(&mut self) {
        log::info!("(GAP) directed advertising timed out");

        self.adv.enabled = false;
        self.adv.fast_adv_on = false;
        self.adv.state = AdvertisingState::StopAdvertising;
        self.adv.directed_connection = DirectedConnection::Undirected;
        self.topology.clear_state(TopologyMask::ADVERTISING);
    }

    /// A link in `role` was established (`up`) or disconnected
    ///
    /// The controller stops advertising once a slave link is established.
    pub fn on_link_role_changed(&mut self, role: LinkRole, up: bool) {
        let count = match role {
            LinkRole::Master => &mut self.master_links,
            LinkRole::Slave => &mut self.slave_links,
        };

        *count = if up { *count + 1 } else { count.saturating_sub(1) };

        self.topology.clear_state(TopologyMask::CONNECTION);

        if self.master_links > 0 {
            self.topology.set_state(TopologyState::Master);
        }

        if self.slave_links > 0 {
            self.topology.set_state(TopologyState::Slave);
        }

        if role == LinkRole::Slave && up {
            self.adv.enabled = false;
            self.adv.fast_adv_on = false;
            self.adv.state = AdvertisingState::StopAdvertising;
            self.adv.directed_connection = DirectedConnection::Undirected;
            self.topology.clear_state(TopologyMask::ADVERTISING);
        }
    }

    /// Process the expiration of a timer
    pub fn on_timer_expired(&mut self, timer: GapTimer) -> Result<(), Error> {
        log::trace!("(GAP) timer {:?} expired", timer);

        match timer {
            GapTimer::Observe => self.stop_observe(),
            GapTimer::Discover => self.stop_discover(),
            GapTimer::Inquiry => self.stop_inquiry(),
            GapTimer::LimitedDiscoverable => self.rollback_on_error(|gap| {
                if gap.adv.discoverable_mode == DiscoverableMode::LimitedDiscoverable {
                    gap.adv.discoverable_mode = DiscoverableMode::NonDiscoverable;
                }

                gap.set_adv_flag()
            }),
            GapTimer::FastAdvertising => self.start_slow_advertising(),
        }
    }

    /// Continue advertising with the slow interval
    fn start_slow_advertising(&mut self) -> Result<(), Error> {
        if !self.adv.enabled {
            return Ok(());
        }

        self.rollback_on_error(|gap| {
            gap.stop_advertising()?;

            let addresses = gap.resolve_addresses();

            gap.write_advertising_parameters((SLOW_INTERVAL, SLOW_INTERVAL), addresses)?;

            gap.start_adv()
        })
    }
}
