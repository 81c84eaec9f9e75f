//! LE legacy pairing between two Security Managers

use le_host_sm::encrypt_info::{AuthRequirements, KeyDistributions};
use le_host_sm::pairing::{IoCapability, PairingFailedReason};
use le_host_sm::{AesSource, CommandType, KeyType, Phase, SecuritySettings};
use le_host_tests::PairingHarness;

fn legacy(io_capability: IoCapability, auth_req: AuthRequirements) -> SecuritySettings {
    SecuritySettings {
        io_capability,
        auth_req,
        ..SecuritySettings::default()
    }
}

fn short_term_key(keys: &[KeyType]) -> Option<u128> {
    keys.iter().find_map(|key| match key {
        KeyType::Stk(stk) => Some(*stk),
        _ => None,
    })
}

#[test]
fn just_works() {
    let settings = legacy(IoCapability::NoInputNoOutput, AuthRequirements::BONDING);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let initiator = harness.initiator.keys();
    let responder = harness.responder.keys();

    assert!(!initiator.is_secure_connection());
    assert!(!initiator.is_authenticated());
    assert_eq!(16, initiator.get_key_size());

    // every device distributes its own LTK
    assert_eq!(initiator.get_peer_ltk(), responder.get_ltk());
    assert_eq!(responder.get_peer_ltk(), initiator.get_ltk());
    assert!(initiator.get_ltk().is_some());

    let stk = short_term_key(&harness.initiator.keys_ready());

    assert!(stk.is_some());
    assert_eq!(stk, short_term_key(&harness.responder.keys_ready()));

    assert_eq!(Some(Phase::Complete), harness.initiator.sm.phase(harness.handle));
    assert_eq!(Some(Phase::Complete), harness.responder.sm.phase(harness.handle));

    assert!(harness.initiator.errors.is_empty());
    assert!(harness.responder.errors.is_empty());
}

#[test]
fn temporary_key_of_just_works_is_zero() {
    let settings = legacy(IoCapability::DisplayOnly, AuthRequirements::NO_BONDING);

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    assert!(harness.initiator.keys_ready().contains(&KeyType::Tk(0)));
    assert!(harness.responder.keys_ready().contains(&KeyType::Tk(0)));

    // no bonding means no key distribution
    assert_eq!(0, harness.initiator.sent_count(CommandType::EncryptionInformation));
    assert_eq!(0, harness.responder.sent_count(CommandType::EncryptionInformation));
    assert!(harness.initiator.keys().get_ltk().is_none());
}

#[test]
fn passkey_entry() {
    let initiator = legacy(IoCapability::KeyboardOnly, AuthRequirements::BONDING | AuthRequirements::MITM);
    let responder = legacy(IoCapability::DisplayOnly, AuthRequirements::BONDING | AuthRequirements::MITM);

    let mut harness = PairingHarness::new(initiator, responder);

    harness.pair();

    let passkey = harness.responder.displayed_passkey().expect("responder did not display a passkey");

    assert!(passkey <= 999_999);
    assert_eq!(None, harness.initiator.displayed_passkey());

    assert!(harness.initiator.keys_ready().contains(&KeyType::Tk(passkey.into())));

    let keys = harness.initiator.keys();

    assert!(keys.is_authenticated());
    assert_eq!(keys.get_peer_ltk(), harness.responder.keys().get_ltk());
}

#[test]
fn wrong_passkey_fails_the_confirm() {
    let initiator = legacy(IoCapability::KeyboardOnly, AuthRequirements::BONDING | AuthRequirements::MITM);
    let responder = legacy(IoCapability::KeyboardOnly, AuthRequirements::BONDING | AuthRequirements::MITM);

    let mut harness = PairingHarness::new(initiator, responder);

    harness.initiator.passkey_input = Some(123_456);
    harness.responder.passkey_input = Some(654_321);

    harness.pair();

    assert_eq!(
        Some(Err(PairingFailedReason::ConfirmValueFailed)),
        harness.responder.auth_complete()
    );

    assert_eq!(
        Some(Err(PairingFailedReason::ConfirmValueFailed)),
        harness.initiator.auth_complete()
    );

    assert_eq!(1, harness.responder.sent_count(CommandType::PairingFailed));
    assert_eq!(0, harness.initiator.sent_count(CommandType::PairingFailed));
    assert_eq!(0, harness.responder.sent_count(CommandType::PairingRandom));
}

#[test]
fn out_of_band_temporary_key() {
    let tk = 0x0123_4567_89AB_CDEF_0011_2233_4455_6677;

    let settings = SecuritySettings {
        legacy_oob_tk: Some(tk),
        ..legacy(IoCapability::NoInputNoOutput, AuthRequirements::BONDING)
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    assert!(harness.initiator.keys_ready().contains(&KeyType::Tk(tk)));
    assert!(harness.initiator.keys().is_authenticated());
}

#[test]
fn controller_encryption() {
    let settings = SecuritySettings {
        aes_source: AesSource::Controller,
        ..legacy(IoCapability::NoInputNoOutput, AuthRequirements::BONDING)
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let initiator = harness.initiator.keys();

    assert_eq!(initiator.get_peer_ltk(), harness.responder.keys().get_ltk());

    // two randoms and five encryptions for the STK, then two of each for the distributed LTK
    assert_eq!(11, harness.initiator.sm.controller().requests);
}

#[test]
fn encryption_key_size_is_negotiated() {
    let initiator = SecuritySettings {
        max_encryption_key_size: 10,
        ..legacy(IoCapability::NoInputNoOutput, AuthRequirements::BONDING)
    };

    let responder = legacy(IoCapability::NoInputNoOutput, AuthRequirements::BONDING);

    let mut harness = PairingHarness::new(initiator, responder);

    harness.pair();

    let keys = harness.responder.keys();

    assert_eq!(10, keys.get_key_size());

    let ltk = keys.get_ltk().unwrap().ltk;

    assert_eq!(0, ltk >> 80);

    let stk = short_term_key(&harness.responder.keys_ready()).unwrap();

    assert_eq!(0, stk >> 80);
}

#[test]
fn signing_key_distribution() {
    let settings = SecuritySettings {
        initiator_key_distribution: KeyDistributions::ENC_KEY | KeyDistributions::SIGN_KEY,
        responder_key_distribution: KeyDistributions::ENC_KEY | KeyDistributions::SIGN_KEY,
        ..legacy(IoCapability::NoInputNoOutput, AuthRequirements::BONDING)
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    harness.pair();

    let initiator = harness.initiator.keys();
    let responder = harness.responder.keys();

    assert!(initiator.get_csrk().is_some());
    assert_eq!(initiator.get_csrk(), responder.get_peer_csrk());
    assert_eq!(responder.get_csrk(), initiator.get_peer_csrk());
}
