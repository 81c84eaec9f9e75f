//! Distribution of keys after the link is encrypted

use le_host_core::BluetoothDeviceAddress;
use le_host_sm::encrypt_info::{AuthRequirements, KeyDistributions};
use le_host_sm::{CommandType, IdentityAddress, LocalIdentity, Phase, SecuritySettings};
use le_host_tests::PairingHarness;

fn with_identity(irk: u128, address: IdentityAddress, auth_req: AuthRequirements) -> SecuritySettings {
    let keys = KeyDistributions::ENC_KEY | KeyDistributions::ID_KEY | KeyDistributions::SIGN_KEY;

    SecuritySettings {
        auth_req,
        initiator_key_distribution: keys,
        responder_key_distribution: keys,
        identity: Some(LocalIdentity { irk, address }),
        ..SecuritySettings::default()
    }
}

#[test]
fn identities_are_exchanged() {
    let initiator_identity = IdentityAddress::Public(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]));
    let responder_identity = IdentityAddress::StaticRandom(BluetoothDeviceAddress([6, 5, 4, 3, 2, 0xC1]));

    let initiator = with_identity(0x1111, initiator_identity, AuthRequirements::BONDING);
    let responder = with_identity(0x2222, responder_identity, AuthRequirements::BONDING);

    let mut harness = PairingHarness::new(initiator, responder);

    harness.connect(true, true);

    harness.pair();

    let initiator = harness.initiator.keys();
    let responder = harness.responder.keys();

    assert_eq!(Some(0x1111), initiator.get_irk());
    assert_eq!(Some(initiator_identity), initiator.get_identity());
    assert_eq!(Some(0x2222), initiator.get_peer_irk());
    assert_eq!(Some(responder_identity), initiator.get_peer_identity());

    assert_eq!(Some(0x1111), responder.get_peer_irk());
    assert_eq!(Some(initiator_identity), responder.get_peer_identity());

    assert!(initiator.get_csrk().is_some());
    assert_eq!(initiator.get_csrk(), responder.get_peer_csrk());
    assert_eq!(responder.get_csrk(), initiator.get_peer_csrk());

    for device in [&harness.initiator, &harness.responder] {
        assert_eq!(1, device.sent_count(CommandType::IdentityInformation));
        assert_eq!(1, device.sent_count(CommandType::IdentityAddressInformation));
        assert_eq!(1, device.sent_count(CommandType::SigningInformation));
    }
}

#[test]
fn responder_distributes_first() {
    let address = IdentityAddress::Public(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]));

    let settings = with_identity(0x1234, address, AuthRequirements::BONDING);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let first_initiator_key = harness
        .initiator
        .sent
        .iter()
        .position(|pdu| pdu.command_type() == CommandType::IdentityInformation)
        .unwrap();

    // the initiator sent its pairing request and public key before distributing keys
    assert_eq!(
        vec![CommandType::PairingRequest, CommandType::PairingPublicKey],
        harness.initiator.sent[..2]
            .iter()
            .map(|pdu| pdu.command_type())
            .collect::<Vec<_>>()
    );

    assert!(first_initiator_key > 2);

    assert_eq!(Some(0x1234), harness.initiator.keys().get_peer_irk());
}

#[test]
fn secure_connections_distributes_no_encryption_key() {
    let address = IdentityAddress::Public(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]));

    let settings = with_identity(0x55, address, AuthRequirements::BONDING | AuthRequirements::SC);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    for device in [&harness.initiator, &harness.responder] {
        assert_eq!(0, device.sent_count(CommandType::EncryptionInformation));
        assert_eq!(0, device.sent_count(CommandType::MasterIdentification));
        assert_eq!(1, device.sent_count(CommandType::IdentityInformation));
    }

    let keys = harness.initiator.keys();

    assert!(keys.is_secure_connection());
    assert_eq!(None, keys.get_peer_ltk());
    assert_eq!(Some(0x55), keys.get_peer_irk());
}

#[test]
fn legacy_distributes_encryption_keys() {
    let settings = SecuritySettings {
        auth_req: AuthRequirements::BONDING,
        ..SecuritySettings::default()
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    for device in [&harness.initiator, &harness.responder] {
        assert_eq!(1, device.sent_count(CommandType::EncryptionInformation));
        assert_eq!(1, device.sent_count(CommandType::MasterIdentification));
        assert_eq!(0, device.sent_count(CommandType::IdentityInformation));
    }

    let ltk = harness.responder.keys().get_ltk().unwrap();

    // the distributed LTK is found by its EDIV and Rand once pairing has completed
    assert_eq!(Some(ltk.ltk), harness.responder.sm.on_ltk_request(harness.handle, ltk.rand, ltk.ediv));
    assert_eq!(None, harness.responder.sm.on_ltk_request(harness.handle, ltk.rand ^ 1, ltk.ediv));
}

#[test]
fn bonded_keys_are_restored_after_reconnecting() {
    let settings = SecuritySettings::default();

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let keys = harness.responder.keys();

    harness.responder.sm.on_disconnect(harness.handle);

    assert_eq!(None, harness.responder.sm.phase(harness.handle));

    harness.connect(false, false);

    assert_eq!(None, harness.responder.sm.keys(harness.handle));

    harness.responder.sm.restore_keys(harness.handle, keys).unwrap();

    assert_eq!(Some(Phase::Complete), harness.responder.sm.phase(harness.handle));
    assert_eq!(Some(keys), harness.responder.sm.keys(harness.handle));

    let ltk = keys.get_ltk().unwrap();

    assert_eq!(Some(ltk.ltk), harness.responder.sm.on_ltk_request(harness.handle, 0, 0));
}
