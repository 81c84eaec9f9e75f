//! LE Secure Connections pairing between two Security Managers

use le_host_sm::encrypt_info::{AuthRequirements, KeyDistributions};
use le_host_sm::pairing::{IoCapability, PairingFailedReason};
use le_host_sm::{toolbox, CommandType, KeyType, LocalOobData, SecuritySettings};
use le_host_tests::PairingHarness;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

fn secure(io_capability: IoCapability, mitm: bool) -> SecuritySettings {
    let auth_req = if mitm {
        AuthRequirements::BONDING | AuthRequirements::SC | AuthRequirements::MITM
    } else {
        AuthRequirements::BONDING | AuthRequirements::SC
    };

    SecuritySettings {
        io_capability,
        auth_req,
        ..SecuritySettings::default()
    }
}

fn dh_key_checks(keys: &[KeyType]) -> (Option<u128>, Option<u128>) {
    let local = keys.iter().find_map(|key| match key {
        KeyType::LocalDhKeyCheck(check) => Some(*check),
        _ => None,
    });

    let peer = keys.iter().find_map(|key| match key {
        KeyType::PeerDhKeyCheck(check) => Some(*check),
        _ => None,
    });

    (local, peer)
}

#[test]
fn just_works() {
    let settings = secure(IoCapability::NoInputNoOutput, false);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let initiator = harness.initiator.keys();
    let responder = harness.responder.keys();

    assert!(initiator.is_secure_connection());
    assert!(!initiator.is_authenticated());

    // both devices derive the same LTK and nothing is distributed for it
    assert!(initiator.get_ltk().is_some());
    assert_eq!(initiator.get_ltk(), responder.get_ltk());
    assert_eq!(None, initiator.get_peer_ltk());
    assert_eq!(0, harness.initiator.sent_count(CommandType::EncryptionInformation));
    assert_eq!(0, harness.responder.sent_count(CommandType::EncryptionInformation));

    let (ea, initiator_expected) = dh_key_checks(&harness.initiator.keys_ready());
    let (eb, responder_expected) = dh_key_checks(&harness.responder.keys_ready());

    assert!(ea.is_some() && eb.is_some());
    assert_eq!(ea, responder_expected);
    assert_eq!(eb, initiator_expected);

    assert_eq!(1, harness.initiator.sent_count(CommandType::PairingPublicKey));
    assert_eq!(1, harness.responder.sent_count(CommandType::PairingPublicKey));
    assert_eq!(0, harness.initiator.sent_count(CommandType::PairingConfirm));
    assert_eq!(1, harness.responder.sent_count(CommandType::PairingConfirm));

    assert!(harness.initiator.errors.is_empty());
    assert!(harness.responder.errors.is_empty());
}

#[test]
fn numeric_comparison() {
    let settings = secure(IoCapability::DisplayWithYesOrNo, true);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let value = harness.initiator.numeric_comparison_value();

    assert!(value.is_some());
    assert!(value.unwrap() <= 999_999);
    assert_eq!(value, harness.responder.numeric_comparison_value());

    let keys = harness.initiator.keys();

    assert!(keys.is_authenticated());
    assert_eq!(keys.get_ltk(), harness.responder.keys().get_ltk());
}

#[test]
fn numeric_comparison_rejected() {
    let settings = secure(IoCapability::DisplayWithYesOrNo, true);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.responder.accept_numeric_comparison = false;

    harness.pair();

    assert_eq!(
        Some(Err(PairingFailedReason::NumericComparisonFailed)),
        harness.responder.auth_complete()
    );

    assert_eq!(
        Some(Err(PairingFailedReason::NumericComparisonFailed)),
        harness.initiator.auth_complete()
    );
}

#[test]
fn passkey_entry() {
    let initiator = secure(IoCapability::KeyboardOnly, true);
    let responder = secure(IoCapability::DisplayOnly, true);

    let mut harness = PairingHarness::new(initiator, responder);

    harness.pair();

    assert!(harness.responder.displayed_passkey().is_some());

    let keys = harness.initiator.keys();

    assert!(keys.is_authenticated());
    assert_eq!(keys.get_ltk(), harness.responder.keys().get_ltk());

    // a confirm and a random for every bit of the passkey
    for device in [&harness.initiator, &harness.responder] {
        assert_eq!(20, device.sent_count(CommandType::PairingConfirm));
        assert_eq!(20, device.sent_count(CommandType::PairingRandom));
    }
}

#[test]
fn passkey_entered_on_both() {
    let settings = secure(IoCapability::KeyboardOnly, true);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.initiator.passkey_input = Some(0x0F_0F0F);
    harness.responder.passkey_input = Some(0x0F_0F0F);

    harness.pair();

    assert!(harness.initiator.keys().is_authenticated());
    assert_eq!(None, harness.initiator.displayed_passkey());
    assert_eq!(None, harness.responder.displayed_passkey());
}

#[test]
fn mismatched_passkey() {
    let settings = secure(IoCapability::KeyboardOnly, true);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.initiator.passkey_input = Some(1);
    harness.responder.passkey_input = Some(2);

    harness.pair();

    assert_eq!(
        Some(Err(PairingFailedReason::ConfirmValueFailed)),
        harness.initiator.auth_complete()
    );
}

#[test]
fn out_of_band() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x0B);

    let responder = SecuritySettings {
        local_oob: Some(LocalOobData::generate(&mut rng)),
        ..secure(IoCapability::NoInputNoOutput, false)
    };

    let mut harness = PairingHarness::new(secure(IoCapability::NoInputNoOutput, false), responder);

    let oob_data = harness.responder.sm.local_oob_data().unwrap();

    harness
        .initiator
        .sm
        .set_peer_oob_data(harness.handle, oob_data)
        .unwrap();

    harness.pair();

    let keys = harness.initiator.keys();

    assert!(keys.is_authenticated());
    assert_eq!(keys.get_ltk(), harness.responder.keys().get_ltk());

    assert_eq!(0, harness.initiator.sent_count(CommandType::PairingConfirm));
    assert_eq!(0, harness.responder.sent_count(CommandType::PairingConfirm));
}

#[test]
fn out_of_band_confirm_mismatch() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x0C);

    let responder = SecuritySettings {
        local_oob: Some(LocalOobData::generate(&mut rng)),
        ..secure(IoCapability::NoInputNoOutput, false)
    };

    let mut harness = PairingHarness::new(secure(IoCapability::NoInputNoOutput, false), responder);

    let mut oob_data = harness.responder.sm.local_oob_data().unwrap();

    oob_data.confirm ^= 1;

    harness
        .initiator
        .sm
        .set_peer_oob_data(harness.handle, oob_data)
        .unwrap();

    harness.pair();

    assert_eq!(
        Some(Err(PairingFailedReason::ConfirmValueFailed)),
        harness.initiator.auth_complete()
    );

    assert_eq!(
        Some(Err(PairingFailedReason::ConfirmValueFailed)),
        harness.responder.auth_complete()
    );
}

#[test]
fn link_key_derivation() {
    let settings = SecuritySettings {
        initiator_key_distribution: KeyDistributions::ENC_KEY | KeyDistributions::LINK_KEY,
        responder_key_distribution: KeyDistributions::ENC_KEY | KeyDistributions::LINK_KEY,
        ..secure(IoCapability::NoInputNoOutput, false)
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let initiator = harness.initiator.keys();
    let ltk = initiator.get_ltk().unwrap().ltk;

    assert_eq!(Some(toolbox::link_key_from_ltk(ltk)), initiator.get_link_key());
    assert_eq!(initiator.get_link_key(), harness.responder.keys().get_link_key());
}

#[test]
fn no_link_key_for_a_random_address() {
    let settings = SecuritySettings {
        initiator_key_distribution: KeyDistributions::LINK_KEY,
        responder_key_distribution: KeyDistributions::LINK_KEY,
        ..secure(IoCapability::NoInputNoOutput, false)
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.connect(false, true);

    harness.pair();

    // the responder has a random address and distributed no identity
    assert_eq!(None, harness.initiator.keys().get_link_key());
    assert!(harness.responder.keys().get_link_key().is_some());
}

#[test]
fn secure_connections_only() {
    let initiator = SecuritySettings {
        secure_connections_only: true,
        ..secure(IoCapability::NoInputNoOutput, false)
    };

    let responder = SecuritySettings {
        auth_req: AuthRequirements::BONDING,
        ..SecuritySettings::default()
    };

    let mut harness = PairingHarness::new(initiator, responder);

    harness.pair();

    assert_eq!(
        Some(Err(PairingFailedReason::AuthenticationRequirements)),
        harness.initiator.auth_complete()
    );

    assert_eq!(
        Some(Err(PairingFailedReason::AuthenticationRequirements)),
        harness.responder.auth_complete()
    );

    assert_eq!(0, harness.initiator.sent_count(CommandType::PairingPublicKey));
}
