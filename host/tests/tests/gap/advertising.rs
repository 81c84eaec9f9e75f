//! Advertising driven by the discoverable and connectable modes

use le_host_core::{AddressType, BluetoothDeviceAddress};
use le_host_gap::advertising_data::{AdvertisingData, AdvertisingDataMask};
use le_host_gap::config::{GapConfig, PrivacyMode};
use le_host_gap::controller::{
    AdvertisingConfig, AdvertisingState, ConnectableMode, DirectedConnection, DiscoverableMode, GapController,
    GapTimer, LinkRole, ResolvingListUsage,
};
use le_host_gap::hci::{AdvertisingInterval, AdvertisingParameters, AdvertisingType, Command, OwnAddressType, PeerAddressType};
use le_host_gap::topology::TopologyState;
use le_host_gap::Error;
use le_host_tests::{Record, RecordingEnvironment};
use std::time::Duration;

const PEER: BluetoothDeviceAddress = BluetoothDeviceAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
const PEER_IDENTITY: BluetoothDeviceAddress = BluetoothDeviceAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

fn controller(config: GapConfig) -> GapController<RecordingEnvironment> {
    le_host_tests::init_logging();

    GapController::new(config, RecordingEnvironment::default())
}

fn named(name: &str) -> GapConfig {
    GapConfig {
        device_name: name.into(),
        ..GapConfig::default()
    }
}

fn parameters(env: &RecordingEnvironment) -> Vec<AdvertisingParameters> {
    env.commands()
        .filter_map(|command| match command {
            Command::SetAdvertisingParameters(parameters) => Some(*parameters),
            _ => None,
        })
        .collect()
}

fn interval(parameters: &AdvertisingParameters) -> (u16, u16) {
    (
        parameters.minimum_advertising_interval.get_raw_val(),
        parameters.maximum_advertising_interval.get_raw_val(),
    )
}

#[test]
fn general_discoverable_peripheral() {
    let mut gap = controller(named("le"));

    gap.write_advertising_data(AdvertisingDataMask::DEVICE_NAME, &AdvertisingData::default())
        .unwrap();

    gap.set_discoverability(DiscoverableMode::GeneralDiscoverable).unwrap();

    assert!(gap.is_advertising());
    assert_eq!(DiscoverableMode::GeneralDiscoverable, gap.read_discoverability());

    // the flags are appended after the name
    assert_eq!(&[3, 0x09, b'l', b'e', 2, 0x01, 0x06], gap.advertising_data().as_slice());

    let parameters = parameters(gap.env());

    assert_eq!(1, parameters.len());
    assert_eq!(AdvertisingType::NonConnectableUndirected, parameters[0].advertising_type);
    assert_eq!((0xA0, 0xF0), interval(&parameters[0]));

    assert_eq!(Some(&Command::SetAdvertisingEnable(true)), gap.env().last_command());
    assert!(gap.env().is_timer_running(GapTimer::FastAdvertising));
    assert!(gap.topology().contains(TopologyState::NonConnectableAdvertising));
}

#[test]
fn becoming_connectable_restarts_advertising() {
    let mut gap = controller(GapConfig::default());

    gap.set_discoverability(DiscoverableMode::GeneralDiscoverable).unwrap();

    gap.env_mut().clear();

    gap.set_connectability(ConnectableMode::Connectable).unwrap();

    let commands: Vec<Command> = gap.env().commands().cloned().collect();

    assert_eq!(3, commands.len());
    assert_eq!(Command::SetAdvertisingEnable(false), commands[0]);
    assert_eq!(Command::SetAdvertisingEnable(true), commands[2]);

    let parameters = parameters(gap.env());

    assert_eq!(AdvertisingType::ConnectableAndScannableUndirected, parameters[0].advertising_type);
    assert_eq!((0x30, 0x60), interval(&parameters[0]));

    assert!(gap.topology().contains(TopologyState::ConnectableAdvertising));
    assert!(!gap.topology().contains(TopologyState::NonConnectableAdvertising));
}

#[test]
fn fast_advertising_slows_down() {
    let mut gap = controller(GapConfig::default());

    gap.set_connectability(ConnectableMode::Connectable).unwrap();

    gap.env_mut().clear();

    gap.on_timer_expired(GapTimer::FastAdvertising).unwrap();

    let parameters = parameters(gap.env());

    assert_eq!(1, parameters.len());
    assert_eq!((0x800, 0x800), interval(&parameters[0]));
    assert!(gap.is_advertising());
    assert_eq!(Some(&Command::SetAdvertisingEnable(true)), gap.env().last_command());
}

#[test]
fn limited_discoverable_ends() {
    let mut gap = controller(GapConfig::default());

    gap.set_connectability(ConnectableMode::Connectable).unwrap();
    gap.set_discoverability(DiscoverableMode::LimitedDiscoverable).unwrap();

    assert!(gap
        .env()
        .records
        .contains(&Record::StartTimer(GapTimer::LimitedDiscoverable, Duration::from_secs(180))));

    assert_eq!(Some(0x05), gap.advertising_data().flag());

    gap.env_mut().clear();

    gap.on_timer_expired(GapTimer::LimitedDiscoverable).unwrap();

    assert_eq!(DiscoverableMode::NonDiscoverable, gap.read_discoverability());
    assert_eq!(Some(0x04), gap.advertising_data().flag());

    // still connectable
    assert!(gap.is_advertising());
    assert_eq!(
        vec![&Command::SetAdvertisingData(gap.advertising_data().payload())],
        gap.env().commands().collect::<Vec<_>>()
    );
}

#[test]
fn neither_discoverable_nor_connectable_stops_advertising() {
    let mut gap = controller(GapConfig::default());

    gap.set_discoverability(DiscoverableMode::GeneralDiscoverable).unwrap();
    gap.set_discoverability(DiscoverableMode::NonDiscoverable).unwrap();

    assert!(!gap.is_advertising());
    assert_eq!(AdvertisingState::StopAdvertising, gap.advertising_state());
    assert_eq!(Some(&Command::SetAdvertisingEnable(false)), gap.env().last_command());
    assert!(!gap.env().is_timer_running(GapTimer::FastAdvertising));
}

#[test]
fn connection_as_slave_ends_advertising() {
    let mut gap = controller(GapConfig::default());

    gap.set_connectability(ConnectableMode::Connectable).unwrap();

    gap.on_link_role_changed(LinkRole::Slave, true);

    assert!(!gap.is_advertising());
    assert!(gap.topology().contains(TopologyState::Slave));

    gap.on_link_role_changed(LinkRole::Slave, false);

    assert!(!gap.topology().contains(TopologyState::Slave));
}

#[test]
fn user_parameters_replace_the_fast_interval() {
    let mut gap = controller(GapConfig::default());

    let config = AdvertisingConfig {
        interval_min: AdvertisingInterval::try_from_raw(0x100).unwrap(),
        interval_max: AdvertisingInterval::try_from_raw(0x200).unwrap(),
        advertising_type: AdvertisingType::ConnectableAndScannableUndirected,
        ..AdvertisingConfig::default()
    };

    gap.set_advertising_parameters(config).unwrap();

    assert_eq!(ConnectableMode::Connectable, gap.read_connectability());

    gap.start_advertising().unwrap();
    gap.set_discoverability(DiscoverableMode::GeneralDiscoverable).unwrap();

    for parameters in parameters(gap.env()) {
        assert_eq!((0x100, 0x200), interval(&parameters));
    }

    gap.stop_advertising().unwrap();

    assert!(!gap.is_advertising());
    assert_eq!(config.interval_min, gap.read_advertising_parameters().interval_min);
}

#[test]
fn directed_advertising_requires_a_peer() {
    let mut gap = controller(GapConfig::default());

    assert_eq!(Err(Error::IllegalValue), gap.set_connectable_mode(DirectedConnection::HighDuty));

    let config = AdvertisingConfig {
        advertising_type: AdvertisingType::ConnectableHighDutyCycleDirected,
        ..AdvertisingConfig::default()
    };

    assert_eq!(Err(Error::IllegalValue), gap.set_advertising_parameters(config));

    assert!(gap.env().records.is_empty());
}

#[test]
fn directed_advertising_to_a_resolvable_peer() {
    let config = GapConfig {
        privacy: PrivacyMode::V1_2,
        ..GapConfig::default()
    };

    let mut gap = controller(config);

    gap.env_mut()
        .resolving_list
        .push((PEER, AddressType::Public, PEER_IDENTITY));

    let config = AdvertisingConfig {
        advertising_type: AdvertisingType::ConnectableLowDutyCycleDirected,
        peer_address: PEER,
        peer_address_type: PeerAddressType::RandomAddress,
        ..AdvertisingConfig::default()
    };

    gap.set_advertising_parameters(config).unwrap();

    gap.env_mut().clear();

    gap.set_connectable_mode(DirectedConnection::LowDuty).unwrap();

    let parameters = parameters(gap.env());

    assert_eq!(1, parameters.len());
    assert_eq!(AdvertisingType::ConnectableLowDutyCycleDirected, parameters[0].advertising_type);
    assert_eq!(OwnAddressType::RpaFromLocalIrkOrRandomAddress, parameters[0].own_address_type);
    assert_eq!(PeerAddressType::PublicAddress, parameters[0].peer_address_type);
    assert_eq!(PEER_IDENTITY, parameters[0].peer_address);

    assert!(gap
        .env()
        .records
        .contains(&Record::EnableResolvingList(ResolvingListUsage::Advertising)));

    assert!(gap.topology().contains(TopologyState::LowDutyDirectedAdvertising));
}

#[test]
fn privacy_advertises_with_a_random_address() {
    let config = GapConfig {
        privacy: PrivacyMode::V1_1,
        ..GapConfig::default()
    };

    let mut gap = controller(config);

    gap.set_connectability(ConnectableMode::Connectable).unwrap();

    assert_eq!(OwnAddressType::RandomDeviceAddress, parameters(gap.env())[0].own_address_type);

    gap.set_connectability(ConnectableMode::NonConnectable).unwrap();

    assert!(gap
        .env()
        .records
        .contains(&Record::DisableResolvingList(ResolvingListUsage::Advertising)));
}

#[test]
fn advertising_data_with_scan_response() {
    let mut gap = controller(named("scan response"));

    let data = AdvertisingData {
        appearance: 0x0341,
        ..AdvertisingData::default()
    };

    gap.write_advertising_data(AdvertisingDataMask::APPEARANCE, &data).unwrap();
    gap.write_scan_response_data(AdvertisingDataMask::DEVICE_NAME, &data)
        .unwrap();

    gap.set_discoverability(DiscoverableMode::GeneralDiscoverable).unwrap();

    // a scan response makes non-connectable advertising scannable
    assert_eq!(AdvertisingType::ScannableUndirected, parameters(gap.env())[0].advertising_type);
    assert!(gap.topology().contains(TopologyState::ScannableAdvertising));

    assert!(gap.env().commands().any(|command| matches!(
        command,
        Command::SetScanResponseData(data) if data[1] == 0x09 && &data[2..] == b"scan response"
    )));
}

#[test]
fn commands_that_cannot_be_sent() {
    let mut gap = controller(GapConfig::default());

    gap.env_mut().fail_commands = true;

    assert_eq!(
        Err(Error::NoResources),
        gap.set_discoverability(DiscoverableMode::GeneralDiscoverable)
    );

    assert!(!gap.is_advertising());
    assert_eq!(DiscoverableMode::NonDiscoverable, gap.read_discoverability());
    assert!(gap.env().records.is_empty());

    gap.env_mut().fail_commands = false;

    gap.set_discoverability(DiscoverableMode::GeneralDiscoverable).unwrap();

    assert!(gap.is_advertising());
}
