//! Pairing that does not succeed

use le_host_core::errors::Error as HciError;
use le_host_sm::encrypt_info::AuthRequirements;
use le_host_sm::pairing::{IoCapability, PairingFailedReason};
use le_host_sm::{CommandType, Error, Phase, Role, SecuritySettings};
use le_host_tests::PairingHarness;

fn both_failed(harness: &PairingHarness, reason: PairingFailedReason) {
    assert_eq!(Some(Err(reason)), harness.initiator.auth_complete());
    assert_eq!(Some(Err(reason)), harness.responder.auth_complete());

    assert_eq!(Some(Phase::Failed), harness.initiator.sm.phase(harness.handle));
    assert_eq!(Some(Phase::Failed), harness.responder.sm.phase(harness.handle));

    assert_eq!(None, harness.initiator.sm.keys(harness.handle));
}

#[test]
fn corrupted_dh_key_check() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    harness.set_intercept(|role, bytes| {
        if role == Role::Initiator && bytes[0] == CommandType::PairingDHKeyCheck.into_val() {
            bytes[1] ^= 0xFF;
        }
    });

    harness.pair();

    both_failed(&harness, PairingFailedReason::DhKeyCheckFailed);

    // only the device that detected the failure sends a pairing failed
    assert_eq!(1, harness.responder.sent_count(CommandType::PairingFailed));
    assert_eq!(0, harness.initiator.sent_count(CommandType::PairingFailed));
}

#[test]
fn corrupted_public_key() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    // a point that is not on the curve
    harness.set_intercept(|role, bytes| {
        if role == Role::Responder && bytes[0] == CommandType::PairingPublicKey.into_val() {
            bytes[33..].fill(0x5A);
        }
    });

    harness.pair();

    both_failed(&harness, PairingFailedReason::DhKeyCheckFailed);
}

#[test]
fn truncated_pdu() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    harness.set_intercept(|role, bytes| {
        if role == Role::Responder && bytes[0] == CommandType::PairingConfirm.into_val() {
            bytes.truncate(9);
        }
    });

    harness.pair();

    both_failed(&harness, PairingFailedReason::InvalidParameters);

    assert_eq!(vec![Error::Size], harness.initiator.errors);
}

#[test]
fn unsupported_command() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    assert_eq!(
        Err(Error::Value),
        harness.responder.sm.on_pdu(harness.handle, &[0x20, 0x01])
    );

    harness.run();

    assert_eq!(1, harness.responder.sent_count(CommandType::PairingFailed));
    assert_eq!(Some(Err(PairingFailedReason::CommandNotSupported)), harness.responder.auth_complete());
}

#[test]
fn controller_rejects_requests() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    harness.initiator.sm.controller_mut().reject = Some(HciError::CommandDisallowed);

    harness.pair();

    both_failed(&harness, PairingFailedReason::UnspecifiedReason);

    assert!(harness.initiator.errors.contains(&Error::Controller(HciError::CommandDisallowed)));
}

#[test]
fn controller_request_fails() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    harness.responder.sm.controller_mut().status = HciError::HardwareFailure;

    harness.pair();

    both_failed(&harness, PairingFailedReason::UnspecifiedReason);

    assert!(harness.responder.errors.contains(&Error::Controller(HciError::HardwareFailure)));
}

#[test]
fn encryption_key_too_small() {
    let initiator = SecuritySettings {
        max_encryption_key_size: 10,
        ..SecuritySettings::default()
    };

    let responder = SecuritySettings {
        min_encryption_key_size: 16,
        ..SecuritySettings::default()
    };

    let mut harness = PairingHarness::new(initiator, responder);

    harness.pair();

    both_failed(&harness, PairingFailedReason::EncryptionKeySize);

    assert_eq!(0, harness.responder.sent_count(CommandType::PairingResponse));
}

#[test]
fn man_in_the_middle_protection_is_unavailable() {
    let responder = SecuritySettings {
        auth_req: AuthRequirements::BONDING | AuthRequirements::SC | AuthRequirements::MITM,
        ..SecuritySettings::default()
    };

    let mut harness = PairingHarness::new(SecuritySettings::default(), responder);

    harness.pair();

    both_failed(&harness, PairingFailedReason::AuthenticationRequirements);
}

#[test]
fn passkey_entry_is_cancelled() {
    let settings = SecuritySettings {
        io_capability: IoCapability::KeyboardOnly,
        auth_req: AuthRequirements::BONDING | AuthRequirements::SC | AuthRequirements::MITM,
        ..SecuritySettings::default()
    };

    let mut harness = PairingHarness::new(settings.clone(), settings);

    // neither device displays the passkey so pairing stalls until the user replies
    harness.pair();

    assert_eq!(Some(Phase::Authentication), harness.initiator.sm.phase(harness.handle));

    assert_eq!(Ok(()), harness.initiator.sm.passkey_reply(harness.handle, None));

    harness.run();

    both_failed(&harness, PairingFailedReason::PasskeyEntryFailed);
}

#[test]
fn pairing_again_after_a_failure() {
    let mut harness = PairingHarness::new(SecuritySettings::default(), SecuritySettings::default());

    harness.initiator.sm.controller_mut().reject = Some(HciError::CommandDisallowed);

    harness.pair();

    assert_eq!(Some(Phase::Failed), harness.initiator.sm.phase(harness.handle));

    harness.initiator.sm.controller_mut().reject = None;
    harness.initiator.events.clear();
    harness.responder.events.clear();

    harness.pair();

    assert!(harness.initiator.keys().is_secure_connection());
    assert_eq!(harness.initiator.keys().get_ltk(), harness.responder.keys().get_ltk());
}
