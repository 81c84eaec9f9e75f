//! Finding other devices with inquiries, observation, discovery scans, and selective connection

use le_host_core::{AddressType, BluetoothDeviceAddress};
use le_host_gap::cache::DeviceType;
use le_host_gap::config::GapConfig;
use le_host_gap::controller::{
    ConnectableMode, GapController, GapTimer, InquiryMode, InquiryParameters, ResultKind,
};
use le_host_gap::hci::{Command, ScanType};
use le_host_gap::topology::TopologyState;
use le_host_gap::Error;
use le_host_tests::{Record, RecordingEnvironment};
use std::time::Duration;

const DEVICE_A: BluetoothDeviceAddress = BluetoothDeviceAddress([0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6]);
const DEVICE_B: BluetoothDeviceAddress = BluetoothDeviceAddress([0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6]);

const GENERAL: [u8; 3] = [2, 0x01, 0x06];
const LIMITED: [u8; 3] = [2, 0x01, 0x05];

const CONNECTABLE_UNDIRECTED: u8 = 0;
const NON_CONNECTABLE_UNDIRECTED: u8 = 3;
const SCAN_RESPONSE: u8 = 4;

const PUBLIC: u8 = 0;
const RANDOM: u8 = 1;

fn controller() -> GapController<RecordingEnvironment> {
    le_host_tests::init_logging();

    GapController::new(GapConfig::default(), RecordingEnvironment::default())
}

/// Create the parameter of an *LE Advertising Report* event with a single report
fn report(event_type: u8, address_type: u8, address: BluetoothDeviceAddress, data: &[u8]) -> Vec<u8> {
    let mut raw = vec![1, event_type, address_type];

    raw.extend_from_slice(&address.0);
    raw.push(data.len() as u8);
    raw.extend_from_slice(data);
    raw.push(-60i8 as u8);

    raw
}

fn general_inquiry(duration: u16) -> InquiryParameters {
    InquiryParameters {
        mode: InquiryMode::General,
        duration,
        ..InquiryParameters::default()
    }
}

#[test]
fn inquiry_while_advertising() {
    let mut gap = controller();

    gap.set_connectability(ConnectableMode::Connectable).unwrap();

    gap.start_inquiry(general_inquiry(10)).unwrap();

    assert!(gap
        .env()
        .records
        .contains(&Record::StartTimer(GapTimer::Inquiry, Duration::from_secs(10))));

    assert!(gap.topology().contains(TopologyState::ConnectableAdvertising));
    assert!(gap.topology().contains(TopologyState::ActiveScan));

    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &GENERAL));
    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_B, &LIMITED));

    assert_eq!(vec![DEVICE_A, DEVICE_B], gap.env().results(ResultKind::Inquiry));

    gap.on_timer_expired(GapTimer::Inquiry).unwrap();

    assert_eq!(vec![2], gap.env().completions(ResultKind::Inquiry));
    assert!(!gap.is_scanning());
    assert!(gap.is_advertising());
    assert!(!gap.topology().contains(TopologyState::ActiveScan));
}

#[test]
fn inquiry_result_carries_the_scan_response() {
    let mut gap = controller();

    gap.start_inquiry(general_inquiry(0)).unwrap();

    let name = [5, 0x09, b'n', b'a', b'm', b'e'];

    gap.on_advertising_report(&report(CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &GENERAL));
    gap.on_advertising_report(&report(SCAN_RESPONSE, PUBLIC, DEVICE_A, &name));

    let results: Vec<&Record> = gap
        .env()
        .records
        .iter()
        .filter(|record| matches!(record, Record::Result { .. }))
        .collect();

    assert_eq!(1, results.len());

    match results[0] {
        Record::Result { kind, result, data } => {
            assert_eq!(ResultKind::Inquiry, *kind);
            assert_eq!(DEVICE_A, result.address);
            assert_eq!(-60, result.rssi);
            assert_eq!([&GENERAL[..], &name[..]].concat(), *data);
        }
        _ => unreachable!(),
    }

    // no timer means the inquiry runs until it is cancelled
    assert!(!gap.env().is_timer_running(GapTimer::Inquiry));

    gap.cancel_inquiry().unwrap();

    assert_eq!(vec![1], gap.env().completions(ResultKind::Inquiry));
}

#[test]
fn inquiry_for_a_single_device() {
    let mut gap = controller();

    let parameters = InquiryParameters {
        filter_address: Some(DEVICE_B),
        ..general_inquiry(5)
    };

    gap.start_inquiry(parameters).unwrap();

    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &GENERAL));
    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_B, &GENERAL));

    assert_eq!(vec![DEVICE_B], gap.env().results(ResultKind::Inquiry));
}

#[test]
fn every_inquiry_reports_again() {
    let mut gap = controller();

    for _ in 0..2 {
        gap.start_inquiry(general_inquiry(0)).unwrap();

        gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &GENERAL));
        gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &GENERAL));

        assert_eq!(1, gap.num_responses());

        gap.cancel_inquiry().unwrap();
    }

    assert_eq!(vec![DEVICE_A, DEVICE_A], gap.env().results(ResultKind::Inquiry));
    assert_eq!(vec![1, 1], gap.env().completions(ResultKind::Inquiry));
    assert_eq!(1, gap.inquiry_database().len());
}

#[test]
fn resolvable_addresses_are_reported_by_identity() {
    let rpa = BluetoothDeviceAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x46]);

    let mut gap = controller();

    gap.env_mut()
        .resolving_list
        .push((rpa, AddressType::PublicIdentity, DEVICE_A));

    gap.observe(true, 0).unwrap();

    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, RANDOM, rpa, &[]));

    assert_eq!(vec![DEVICE_A], gap.env().results(ResultKind::Observe));

    let entry = gap.inquiry_database().find(&DEVICE_A).unwrap();

    assert_eq!(AddressType::PublicIdentity.into_val(), entry.result.address_type);
    assert!(gap.inquiry_database().find(&rpa).is_none());
}

#[test]
fn dual_mode_devices() {
    let mut gap = controller();

    gap.observe(true, 0).unwrap();

    // BR/EDR is supported according to the flags
    let flags = [2, 0x01, 0x02];

    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &flags));
    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, RANDOM, DEVICE_B, &flags));

    let device_a = gap.inquiry_database().find(&DEVICE_A).unwrap().result;
    let device_b = gap.inquiry_database().find(&DEVICE_B).unwrap().result;

    assert_eq!(DeviceType::DUAL_MODE, device_a.device_type);
    assert_eq!(0x02, device_a.flag);
    assert_eq!(DeviceType::BLE, device_b.device_type);

    gap.observe(false, 0).unwrap();

    assert_eq!(vec![2], gap.env().completions(ResultKind::Observe));
}

#[test]
fn selective_connection_candidates() {
    let mut gap = controller();

    gap.set_selective_connection(true).unwrap();

    assert!(gap.env().commands().any(|command| matches!(
        command,
        Command::SetScanParameters(parameters) if parameters.scan_type == ScanType::PassiveScanning
    )));

    gap.on_advertising_report(&report(
        CONNECTABLE_UNDIRECTED,
        PUBLIC,
        DEVICE_A,
        &[3, 0x09, b'h', b'i'],
    ));

    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_B, &GENERAL));

    let candidates: Vec<&Record> = gap
        .env()
        .records
        .iter()
        .filter(|record| matches!(record, Record::SelectiveConnectionCandidate { .. }))
        .collect();

    assert_eq!(
        vec![&Record::SelectiveConnectionCandidate {
            address: DEVICE_A,
            name: Some(b"hi".to_vec()),
        }],
        candidates
    );

    assert_eq!(Err(Error::Busy), gap.start_inquiry(general_inquiry(0)));

    gap.set_selective_connection(false).unwrap();

    assert!(!gap.is_scanning());
    assert_eq!(Some(&Command::SetScanEnable { enable: false, filter_duplicates: true }), gap.env().last_command());
}

#[test]
fn inquiry_that_cannot_start() {
    let mut gap = controller();

    gap.env_mut().fail_commands = true;

    assert_eq!(Err(Error::NoResources), gap.start_inquiry(general_inquiry(10)));

    assert!(!gap.is_scanning());
    assert!(gap.scan_activity().is_empty());
    assert!(!gap.env().is_timer_running(GapTimer::Inquiry));
}

#[test]
fn discovery_scan_reports_every_advertiser() {
    let mut gap = controller();

    gap.scan(true, 8).unwrap();

    assert!(gap.env().is_timer_running(GapTimer::Discover));

    // neither device is discoverable, a discovery scan reports them anyway
    let not_discoverable = [2, 0x01, 0x04];

    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &not_discoverable));
    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, RANDOM, DEVICE_B, &[]));
    gap.on_advertising_report(&report(NON_CONNECTABLE_UNDIRECTED, PUBLIC, DEVICE_A, &not_discoverable));

    assert_eq!(vec![DEVICE_A, DEVICE_B, DEVICE_A], gap.env().results(ResultKind::Discover));
    assert!(gap.env().results(ResultKind::Inquiry).is_empty());
    assert!(gap.env().results(ResultKind::Observe).is_empty());
    assert_eq!(2, gap.num_responses());

    gap.on_timer_expired(GapTimer::Discover).unwrap();

    assert_eq!(vec![2], gap.env().completions(ResultKind::Discover));
    assert!(!gap.env().is_timer_running(GapTimer::Discover));
    assert!(!gap.is_scanning());
}

#[test]
fn discovery_scan_excludes_observation_and_inquiry() {
    let mut gap = controller();

    gap.observe(true, 0).unwrap();

    assert_eq!(Err(Error::Busy), gap.scan(true, 0));

    gap.observe(false, 0).unwrap();
    gap.scan(true, 0).unwrap();

    assert_eq!(Err(Error::Busy), gap.observe(true, 0));
    assert_eq!(Err(Error::Busy), gap.start_inquiry(general_inquiry(0)));
    assert_eq!(Err(Error::Busy), gap.scan(true, 0));

    // selective connection shares the scan
    gap.set_selective_connection(true).unwrap();
    gap.scan(false, 0).unwrap();

    assert!(gap.is_scanning());
    assert!(gap.scan_activity().is_selective_connection_active());
    assert!(!gap.scan_activity().is_discover_active());
    assert_eq!(vec![0], gap.env().completions(ResultKind::Discover));
}

#[test]
fn failed_cancel_leaves_the_inquiry_running() {
    let mut gap = controller();

    gap.start_inquiry(general_inquiry(10)).unwrap();

    gap.env_mut().fail_commands = true;

    assert_eq!(Err(Error::NoResources), gap.cancel_inquiry());
    assert!(gap.scan_activity().is_inquiry_active());
    assert!(gap.env().is_timer_running(GapTimer::Inquiry));
    assert!(gap.env().completions(ResultKind::Inquiry).is_empty());

    gap.env_mut().fail_commands = false;

    gap.cancel_inquiry().unwrap();

    assert!(!gap.env().is_timer_running(GapTimer::Inquiry));
    assert_eq!(vec![0], gap.env().completions(ResultKind::Inquiry));
}
