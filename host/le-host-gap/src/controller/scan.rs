//! Scanning, observation, and discovery

use super::{GapController, GapEnvironment, ResolvingListUsage, ResultKind};
use super::GapTimer;
use crate::advertising_data::{find_ad_field, MAX_ADVERTISING_DATA_LEN};
use crate::assigned::{flags, AssignedTypes};
use crate::cache::{
    is_discoverable, AdvertisingCache, DeviceType, InquiryDatabase, InquiryEntry, ReportEventType, ResultFlags,
    ScanActivity,
};
use crate::hci::{
    Command, OwnAddressType, ScanType, ScanningFilterPolicy, ScanningInterval, ScanningParameters, ScanningWindow,
};
use crate::topology::{TopologyMask, TopologyState};
use crate::Error;
use core::time::Duration;
use le_host_core::errors::Error as ControllerError;
use le_host_core::BluetoothDeviceAddress;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scan interval and window of an inquiry (5s)
const LOW_LATENCY_SCAN: u16 = 8000;

/// Scan interval and window used when scanning was not configured (11.25ms)
const DISCOVERY_SCAN: u16 = 0x12;

/// The state of scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanningState {
    #[default]
    Idle,
    Scanning,
    StopScanning,
}

/// The devices reported by an inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InquiryMode {
    /// Devices in either the general or limited discoverable mode
    #[default]
    General,
    /// Only devices in the limited discoverable mode
    Limited,
}

/// Parameters of an inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InquiryParameters {
    pub mode: InquiryMode,
    /// Duration of the inquiry in seconds, zero runs the inquiry until it is cancelled
    pub duration: u16,
    /// Stop the inquiry after this many responses, zero is unlimited
    pub max_responses: u16,
    /// Only report this device
    pub filter_address: Option<BluetoothDeviceAddress>,
}

#[derive(Debug)]
pub(super) struct ScanningControl {
    state: ScanningState,
    /// The type of the running scan
    scan_type: Option<ScanType>,
    last_scan_type: ScanType,
    custom: Option<(ScanType, ScanningInterval, ScanningWindow)>,
    interval: ScanningInterval,
    window: ScanningWindow,
    filter_policy: ScanningFilterPolicy,
    white_list_engaged: bool,
    activity: ScanActivity,
    inquiry: InquiryParameters,
    num_responses: u16,
    database: InquiryDatabase,
    cache: AdvertisingCache,
}

impl ScanningControl {
    pub(super) fn new() -> Self {
        ScanningControl {
            state: ScanningState::Idle,
            scan_type: None,
            last_scan_type: ScanType::ActiveScanning,
            custom: None,
            interval: ScanningInterval::from_raw_unchecked(DISCOVERY_SCAN),
            window: ScanningWindow::from_raw_unchecked(DISCOVERY_SCAN),
            filter_policy: ScanningFilterPolicy::AcceptAll,
            white_list_engaged: false,
            activity: ScanActivity::empty(),
            inquiry: InquiryParameters::default(),
            num_responses: 0,
            database: InquiryDatabase::new(),
            cache: AdvertisingCache::new(),
        }
    }

    fn default_parameters(&self) -> (ScanType, ScanningInterval, ScanningWindow) {
        self.custom.unwrap_or((
            ScanType::ActiveScanning,
            ScanningInterval::from_raw_unchecked(DISCOVERY_SCAN),
            ScanningWindow::from_raw_unchecked(DISCOVERY_SCAN),
        ))
    }

    fn low_latency_parameters() -> (ScanType, ScanningInterval, ScanningWindow) {
        (
            ScanType::ActiveScanning,
            ScanningInterval::from_raw_unchecked(LOW_LATENCY_SCAN),
            ScanningWindow::from_raw_unchecked(LOW_LATENCY_SCAN),
        )
    }

    fn is_low_latency(&self) -> bool {
        self.interval.get_raw_val() == LOW_LATENCY_SCAN && self.window.get_raw_val() == LOW_LATENCY_SCAN
    }
}

/// A single report of an *LE Advertising Report* event
struct RawReport<'a> {
    event_type: u8,
    address_type: u8,
    address: BluetoothDeviceAddress,
    data: &'a [u8],
    rssi: i8,
}

struct ReportReader<'a> {
    raw: &'a [u8],
}

impl<'a> ReportReader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.raw.len() < len {
            return None;
        }

        let (taken, rest) = self.raw.split_at(len);

        self.raw = rest;

        Some(taken)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn report(&mut self) -> Option<RawReport<'a>> {
        let event_type = self.byte()?;
        let address_type = self.byte()?;

        let mut address = BluetoothDeviceAddress::zeroed();

        address.0.copy_from_slice(self.take(6)?);

        let len = self.byte()? as usize;
        let data = self.take(len)?;
        let rssi = self.byte()? as i8;

        Some(RawReport {
            event_type,
            address_type,
            address,
            data,
            rssi,
        })
    }
}

/// Update the inquiry entry of a device with a new report
///
/// The returned boolean is false when the report should not be delivered yet. This is the case
/// for connectable or scannable advertising during an active scan, the result is delivered once
/// the scan response arrives.
fn update_inquiry_result(
    cache: &mut AdvertisingCache,
    entry: &mut InquiryEntry,
    inquiry_count: u32,
    scan_type: Option<ScanType>,
    report: &RawReport<'_>,
    event_type: ReportEventType,
) -> bool {
    let address = entry.result.address;

    cache.cache_adv_data(&address, entry, report.data, event_type);

    entry.result.rssi = report.rssi;
    entry.result.address_type = report.address_type;

    let mut to_report = true;

    if scan_type == Some(ScanType::ActiveScanning)
        && matches!(
            event_type,
            ReportEventType::ConnectableUndirected | ReportEventType::ScannableUndirected
        )
    {
        entry.scan_rsp = false;
        to_report = false;
    } else {
        entry.scan_rsp = true;
    }

    if entry.inquiry_count != inquiry_count {
        entry.result.device_type = DeviceType::BLE;
    } else {
        entry.result.device_type |= DeviceType::BLE;
    }

    if event_type != ReportEventType::ScanResponse {
        entry.result.event_type = event_type;
    }

    entry.inquiry_count = inquiry_count;

    if let Some((offset, len)) = find_ad_field(cache.data(), AssignedTypes::Flags.val()) {
        if len >= 1 {
            let flag = cache.data()[offset];

            entry.result.flag = flag;

            // a random address is never used by a BR/EDR device
            if flag & flags::BR_EDR_NOT_SUPPORTED == 0
                && event_type != ReportEventType::ConnectableDirected
                && report.address_type & 0x1 == 0
            {
                entry.result.device_type |= DeviceType::DUAL_MODE;
            }
        }
    }

    to_report
}

impl<E: GapEnvironment> GapController<E> {
    pub fn scanning_state(&self) -> ScanningState {
        self.scan.state
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.scan_type.is_some()
    }

    pub fn scan_activity(&self) -> ScanActivity {
        self.scan.activity
    }

    /// Get the number of devices found by the current inquiry or observation
    pub fn num_responses(&self) -> u16 {
        self.scan.num_responses
    }

    /// Get the database of found devices
    pub fn inquiry_database(&self) -> &InquiryDatabase {
        &self.scan.database
    }

    /// Set the parameters used by [`start_scan`] and [`observe`]
    ///
    /// The interval and the window must be within 0x4 to 0x4000. The window is not checked
    /// against the interval.
    ///
    /// [`start_scan`]: GapController::start_scan
    /// [`observe`]: GapController::observe
    pub fn set_scan_parameters(&mut self, interval: u16, window: u16, scan_type: u8) -> Result<(), Error> {
        self.check_ble()?;

        let interval = ScanningInterval::try_from_raw(interval).map_err(|_| Error::IllegalValue)?;
        let window = ScanningWindow::try_from_raw(window).map_err(|_| Error::IllegalValue)?;
        let scan_type = ScanType::try_from_val(scan_type).map_err(|_| Error::IllegalValue)?;

        self.scan.custom = Some((scan_type, interval, window));

        Ok(())
    }

    fn scan_own_address_type(&self) -> OwnAddressType {
        if self.config.privacy.uses_resolving_list() {
            OwnAddressType::RpaFromLocalIrkOrRandomAddress
        } else if self.config.privacy.is_enabled() {
            OwnAddressType::RandomDeviceAddress
        } else {
            self.config.own_address_type
        }
    }

    fn send_scan_parameters(
        &mut self,
        scan_type: ScanType,
        interval: ScanningInterval,
        window: ScanningWindow,
    ) -> Result<(), Error> {
        let parameters = ScanningParameters {
            scan_type,
            scan_interval: interval,
            scan_window: window,
            own_address_type: self.scan_own_address_type(),
            scanning_filter_policy: self.scan.filter_policy,
        };

        self.send(Command::SetScanParameters(parameters))?;

        self.scan.interval = interval;
        self.scan.window = window;

        Ok(())
    }

    fn enable_scan(&mut self, scan_type: ScanType, filter_duplicates: bool) -> Result<(), Error> {
        let state = match scan_type {
            ScanType::PassiveScanning => TopologyState::PassiveScan,
            ScanType::ActiveScanning => TopologyState::ActiveScan,
        };

        if !self.topology.check_state(state.mask()) {
            log::error!("(GAP) cannot scan ({:?}) in the current state", state);
            return Err(Error::WrongMode);
        }

        if self.config.privacy.is_enabled() {
            self.env.enable_resolving_list(ResolvingListUsage::Scanning);
        }

        self.send(Command::SetScanEnable {
            enable: true,
            filter_duplicates,
        })?;

        log::info!("(GAP) scanning started");

        self.scan.scan_type = Some(scan_type);
        self.scan.last_scan_type = scan_type;
        self.scan.state = ScanningState::Scanning;
        self.topology.set_state(state);

        Ok(())
    }

    fn start_scan_with(
        &mut self,
        (scan_type, interval, window): (ScanType, ScanningInterval, ScanningWindow),
        filter_duplicates: bool,
    ) -> Result<(), Error> {
        self.send_scan_parameters(scan_type, interval, window)?;

        self.enable_scan(scan_type, filter_duplicates)
    }

    /// Start scanning
    ///
    /// The parameters of [`set_scan_parameters`] are used, otherwise an active scan with the
    /// default interval and window is started. Nothing is sent if a scan is already running.
    ///
    /// [`set_scan_parameters`]: GapController::set_scan_parameters
    pub fn start_scan(&mut self) -> Result<(), Error> {
        self.check_ble()?;

        if self.is_scanning() {
            return Ok(());
        }

        let parameters = self.scan.default_parameters();

        self.start_scan_with(parameters, true)
    }

    /// Stop scanning
    pub fn stop_scan(&mut self) -> Result<(), Error> {
        self.check_ble()?;

        if !self.is_scanning() {
            return Ok(());
        }

        self.send(Command::SetScanEnable {
            enable: false,
            filter_duplicates: true,
        })?;

        log::info!("(GAP) scanning stopped");

        self.scan.scan_type = None;
        self.scan.state = ScanningState::StopScanning;
        self.scan.white_list_engaged = false;
        self.scan.filter_policy = ScanningFilterPolicy::AcceptAll;
        self.topology.clear_state(TopologyMask::SCANNING);

        Ok(())
    }

    /// Process the status of a *set scan parameters* command
    pub fn on_scan_param_set_complete(&mut self, status: ControllerError) -> Result<(), ControllerError> {
        status.ok_or_else(|e| {
            log::error!("(GAP) set scan parameters failed: {}", e);

            e
        })
    }

    /// Process the status of a *set scan enable* command
    ///
    /// A failure rolls back the scanning state.
    pub fn on_scan_enable_complete(&mut self, status: ControllerError) {
        if status.is_ok() {
            return;
        }

        log::error!("(GAP) set scan enable failed: {}", status);

        match self.scan.state {
            ScanningState::Scanning => {
                self.scan.scan_type = None;
                self.scan.state = ScanningState::StopScanning;
                self.topology.clear_state(TopologyMask::SCANNING);
            }
            ScanningState::StopScanning => {
                let scan_type = self.scan.last_scan_type;

                self.scan.scan_type = Some(scan_type);
                self.scan.state = ScanningState::Scanning;

                self.topology.set_state(match scan_type {
                    ScanType::PassiveScanning => TopologyState::PassiveScan,
                    ScanType::ActiveScanning => TopologyState::ActiveScan,
                });
            }
            ScanningState::Idle => (),
        }
    }

    /// Start or stop observing advertisers
    ///
    /// Every advertising report is delivered to [`GapEnvironment::on_result`] as an observation
    /// result. A non-zero `duration` (in seconds) stops the observation when it expires.
    pub fn observe(&mut self, start: bool, duration: u16) -> Result<(), Error> {
        self.check_ble()?;

        if !start {
            return if self.scan.activity.is_observe_active() {
                self.stop_observe()
            } else {
                Ok(())
            };
        }

        let activity = self.scan.activity;

        if activity.is_observe_active() || activity.is_discover_active() || activity.is_inquiry_active() {
            log::warn!("(GAP) cannot observe, scan activity {:?}", activity);
            return Err(Error::Busy);
        }

        if !self.is_scanning() {
            let parameters = self.scan.default_parameters();

            self.start_scan_with(parameters, false)?;
        }

        self.scan.activity.insert(ScanActivity::OBSERVE);
        self.scan.num_responses = 0;
        self.scan.database.new_inquiry();

        if duration != 0 {
            self.env
                .start_timer(GapTimer::Observe, Duration::from_secs(duration.into()));
        }

        Ok(())
    }

    pub(super) fn stop_observe(&mut self) -> Result<(), Error> {
        let mut remaining = self.scan.activity;

        remaining.remove(ScanActivity::OBSERVE);

        if remaining.is_empty() {
            self.stop_scan()?;
        }

        self.env.stop_timer(GapTimer::Observe);

        self.scan.activity = remaining;

        self.end_scan_results();

        self.env
            .on_complete(ResultKind::Observe, ControllerError::NoError, self.scan.num_responses);

        Ok(())
    }

    /// Start or stop a discovery scan
    ///
    /// Every advertising report is delivered to [`GapEnvironment::on_result`] as a discover
    /// result whatever the discoverable mode of the advertiser is. A non-zero `duration` (in
    /// seconds) stops the scan when it expires. Observation, inquiries and the discovery scan
    /// share the inquiry database so only one of them can run at a time.
    pub fn scan(&mut self, start: bool, duration: u16) -> Result<(), Error> {
        self.check_ble()?;

        if !start {
            return if self.scan.activity.is_discover_active() {
                self.stop_discover()
            } else {
                log::warn!("(GAP) no discovery scan to stop");
                Ok(())
            };
        }

        let activity = self.scan.activity;

        if activity.is_discover_active() || activity.is_observe_active() || activity.is_inquiry_active() {
            log::warn!("(GAP) cannot start a discovery scan, scan activity {:?}", activity);
            return Err(Error::Busy);
        }

        if !self.is_scanning() {
            let parameters = self.scan.default_parameters();

            self.start_scan_with(parameters, false)?;
        }

        self.scan.activity.insert(ScanActivity::DISCOVER);
        self.scan.num_responses = 0;
        self.scan.database.new_inquiry();

        if duration != 0 {
            self.env
                .start_timer(GapTimer::Discover, Duration::from_secs(duration.into()));
        }

        Ok(())
    }

    pub(super) fn stop_discover(&mut self) -> Result<(), Error> {
        let mut remaining = self.scan.activity;

        remaining.remove(ScanActivity::DISCOVER);

        if remaining.is_empty() {
            self.stop_scan()?;
        }

        self.env.stop_timer(GapTimer::Discover);

        self.scan.activity = remaining;

        self.end_scan_results();

        log::info!("(GAP) discovery scan complete, {} responses", self.scan.num_responses);

        self.env
            .on_complete(ResultKind::Discover, ControllerError::NoError, self.scan.num_responses);

        Ok(())
    }

    /// Start discovering devices
    ///
    /// Only devices advertising with a discoverable mode matching the inquiry mode are reported.
    /// The inquiry uses a low latency active scan.
    pub fn start_inquiry(&mut self, parameters: InquiryParameters) -> Result<(), Error> {
        self.check_ble()?;

        let activity = self.scan.activity;

        if activity.is_inquiry_active()
            || activity.is_selective_connection_active()
            || activity.is_observe_active()
            || activity.is_discover_active()
        {
            log::warn!("(GAP) cannot start an inquiry, scan activity {:?}", activity);
            return Err(Error::Busy);
        }

        let low_latency = ScanningControl::low_latency_parameters();

        if !self.is_scanning() {
            self.start_scan_with(low_latency, false)?;
        } else if !self.scan.is_low_latency() {
            let previous = (self.scan.last_scan_type, self.scan.interval, self.scan.window);

            self.stop_scan()?;

            if let Err(e) = self.start_scan_with(low_latency, false) {
                if let Err(e) = self.start_scan_with(previous, false) {
                    log::error!("(GAP) failed to resume scanning: {}", e);
                }

                return Err(e);
            }
        }

        self.scan.activity.insert(match parameters.mode {
            InquiryMode::General => ScanActivity::GENERAL_INQUIRY,
            InquiryMode::Limited => ScanActivity::LIMITED_INQUIRY,
        });

        log::info!("(GAP) inquiry started ({:?})", parameters.mode);

        self.scan.inquiry = parameters;
        self.scan.num_responses = 0;
        self.scan.database.new_inquiry();
        self.scan.cache.clear();

        if parameters.duration != 0 {
            self.env
                .start_timer(GapTimer::Inquiry, Duration::from_secs(parameters.duration.into()));
        }

        Ok(())
    }

    /// Cancel a running inquiry
    pub fn cancel_inquiry(&mut self) -> Result<(), Error> {
        self.check_ble()?;

        if self.scan.activity.is_inquiry_active() {
            self.stop_inquiry()
        } else {
            Ok(())
        }
    }

    /// End the inquiry
    ///
    /// The inquiry stays active when the scan cannot be stopped or returned to its normal
    /// parameters.
    pub(super) fn stop_inquiry(&mut self) -> Result<(), Error> {
        let mut remaining = self.scan.activity;

        remaining.remove(ScanActivity::INQUIRY);

        if remaining.is_empty() {
            self.stop_scan()?;
        } else if self.scan.is_low_latency() {
            self.leave_low_latency()?;
        }

        self.env.stop_timer(GapTimer::Inquiry);

        self.scan.activity = remaining;

        self.end_scan_results();

        log::info!("(GAP) inquiry complete, {} responses", self.scan.num_responses);

        self.env
            .on_complete(ResultKind::Inquiry, ControllerError::NoError, self.scan.num_responses);

        Ok(())
    }

    /// Forget the results that are only meaningful while the scan runs
    fn end_scan_results(&mut self) {
        self.scan.database.end_inquiry();
        self.scan.cache.clear();
    }

    /// Restart the scan with the default parameters
    fn leave_low_latency(&mut self) -> Result<(), Error> {
        self.stop_scan()?;

        let parameters = self.scan.default_parameters();

        self.start_scan_with(parameters, false).map_err(|e| {
            if let Err(e) = self.start_scan_with(ScanningControl::low_latency_parameters(), false) {
                log::error!("(GAP) failed to resume the inquiry scan: {}", e);
            }

            e
        })
    }

    /// Start or stop scanning for selective connection
    pub fn set_selective_connection(&mut self, active: bool) -> Result<(), Error> {
        self.check_ble()?;

        if active {
            if self.scan.activity.is_inquiry_active() {
                return Err(Error::Busy);
            }

            if !self.is_scanning() {
                let (_, interval, window) = self.scan.default_parameters();

                self.start_scan_with((ScanType::PassiveScanning, interval, window), true)?;
            }

            self.scan.activity.insert(ScanActivity::SELECTIVE_CONNECTION);
        } else {
            let mut remaining = self.scan.activity;

            remaining.remove(ScanActivity::SELECTIVE_CONNECTION);

            if remaining.is_empty() {
                self.stop_scan()?;
            }

            self.scan.activity = remaining;
        }

        Ok(())
    }

    /// Process the parameter of an *LE Advertising Report* event
    ///
    /// Reports are ignored when no scan is running. Malformed reports end the processing of
    /// the event, reports with more than 31 octets of data are dropped.
    pub fn on_advertising_report(&mut self, parameter: &[u8]) {
        if !self.is_scanning() {
            log::debug!("(GAP) advertising report while not scanning");
            return;
        }

        let mut reader = ReportReader { raw: parameter };

        let Some(num_reports) = reader.byte() else {
            return;
        };

        for _ in 0..num_reports {
            let Some(mut report) = reader.report() else {
                log::warn!("(GAP) malformed advertising report");
                return;
            };

            if report.data.len() > MAX_ADVERTISING_DATA_LEN {
                log::warn!(
                    "(GAP) dropped report of {} with {} octets of data",
                    report.address,
                    report.data.len()
                );
                continue;
            }

            let event_type = match ReportEventType::try_from_val(report.event_type) {
                Ok(event_type) => event_type,
                Err(raw) => {
                    log::warn!("(GAP) unknown advertising report event type {}", raw);
                    continue;
                }
            };

            let (address, address_type) = self.env.map_to_identity(report.address, report.address_type);

            report.address = address;
            report.address_type = address_type;

            self.process_report(&report, event_type);
        }
    }

    fn process_report(&mut self, report: &RawReport<'_>, event_type: ReportEventType) {
        let inquiry_count = self.scan.database.inquiry_count();

        let mut update = true;

        if let Some(entry) = self.scan.database.find(&report.address) {
            if entry.inquiry_count == inquiry_count {
                if !entry.result.device_type.contains(DeviceType::BLE) || !entry.scan_rsp {
                    update = true;
                } else if self.scan.activity.is_observe_active() || self.scan.activity.is_discover_active() {
                    update = false;
                } else {
                    return;
                }
            }
        }

        let (entry, created) = self.scan.database.get_or_create(&report.address);

        if created || entry.inquiry_count != inquiry_count {
            self.scan.num_responses = self.scan.num_responses.saturating_add(1);
        }

        if !update_inquiry_result(
            &mut self.scan.cache,
            entry,
            inquiry_count,
            self.scan.scan_type,
            report,
            event_type,
        ) {
            return;
        }

        let result = entry.result;
        let scan_rsp = entry.scan_rsp;

        let mut found = is_discoverable(
            self.scan.activity,
            self.scan.inquiry.filter_address.as_ref(),
            &report.address,
            event_type,
            self.scan.cache.data(),
        );

        if found.is_empty() {
            log::debug!("(GAP) {} is not discoverable", report.address);
            return;
        }

        if !update {
            found.remove(ResultFlags::INQUIRY);
        }

        if self.scan.activity.is_selective_connection_active() {
            if found.contains(ResultFlags::SELECTIVE_CONNECTION) {
                self.env
                    .on_selective_connection_candidate(&report.address, self.scan.cache.device_name());
            }
        } else {
            if found.contains(ResultFlags::INQUIRY) {
                self.env
                    .on_result(ResultKind::Inquiry, &result, self.scan.cache.data());
            }

            if found.contains(ResultFlags::OBSERVE) {
                self.env
                    .on_result(ResultKind::Observe, &result, self.scan.cache.data());
            }

            if found.contains(ResultFlags::DISCOVER) {
                self.env
                    .on_result(ResultKind::Discover, &result, self.scan.cache.data());
            }
        }

        let max_responses = self.scan.inquiry.max_responses;

        if self.scan.activity.is_inquiry_active()
            && max_responses != 0
            && self.scan.num_responses >= max_responses
            && result.device_type.contains(DeviceType::BLE)
            && scan_rsp
        {
            if let Err(e) = self.stop_inquiry() {
                log::error!("(GAP) failed to stop the inquiry: {}", e);
            }
        }
    }
}
