//! LE Secure Connections pairing
//!
//! After the public keys are exchanged, authentication stage 1 depends on the pairing method.
//! Stage 2 is the exchange of the DHKey check values created with `f6` from the MacKey of `f5`.

use crate::control_block::{Phase, RandEncProcState};
use crate::manager::{KeyType, SecurityManagerEvent, Session, SmController, Step, StepError, UNSPECIFIED};
use crate::pairing::{PairingFailedReason, PairingMethod, PairingPubKey, PairingValue};
use crate::{toolbox, CommandType, LongTermKey, Pdu};

/// The number of rounds of passkey entry, one for each bit of the passkey
const PASSKEY_ROUNDS: u8 = 20;

/// The `z` input of `f4` for a round of passkey entry
fn passkey_round_bit(passkey: u128, round: u8) -> u8 {
    0x80 | ((passkey >> round) & 1) as u8
}

impl<C: SmController> Session<'_, C> {
    /// Create the key pair of this device
    ///
    /// The key pair of the local out of band data is used when there is one, otherwise the
    /// private key is generated from four random requests.
    pub(crate) fn generate_key_pair(&mut self) -> Step {
        if let Some((private_key, public_key)) = self.settings.local_oob.and_then(|oob| oob.key_pair()) {
            self.cb.private_key = Some(private_key);
            self.cb.public_key = Some(public_key);

            return self.key_pair_ready();
        }

        self.request_random(RandEncProcState::GenPrivateKey { part: 0 })
    }

    pub(crate) fn on_private_key_octets(&mut self, part: u8, octets: [u8; 8]) -> Step {
        let start = usize::from(part) * 8;

        self.cb.rand_octets[start..start + 8].copy_from_slice(&octets);

        if part < 3 {
            return self.request_random(RandEncProcState::GenPrivateKey { part: part + 1 });
        }

        let private_key = toolbox::private_key_from_bytes(&self.cb.rand_octets);

        self.cb.rand_octets = [0; 32];

        match private_key {
            Some(private_key) => {
                self.cb.public_key = Some(toolbox::public_key(&private_key));
                self.cb.private_key = Some(private_key);

                self.key_pair_ready()
            }
            None => {
                log::debug!("(SM) generated an invalid private key, regenerating");

                self.request_random(RandEncProcState::GenPrivateKey { part: 0 })
            }
        }
    }

    fn send_public_key(&mut self) -> Step {
        let public_key = self.cb.public_key.as_ref().ok_or(UNSPECIFIED)?;

        let wire = toolbox::public_key_into_wire(public_key);

        self.send(Pdu::PairingPublicKey(PairingPubKey::new(wire)));

        self.cb.public_key_sent = true;

        Ok(())
    }

    /// The initiator sends its public key first, the responder answers with its own
    fn key_pair_ready(&mut self) -> Step {
        if self.cb.is_initiator() {
            self.send_public_key()
        } else if self.cb.peer_public_key.is_some() {
            self.send_public_key()?;

            self.public_keys_exchanged()
        } else {
            Ok(())
        }
    }

    pub(crate) fn on_public_key(&mut self, key: PairingPubKey) -> Step {
        let expected = self.cb.is_secure_connection
            && self.cb.phase == Phase::PublicKeyExchange
            && self.cb.peer_public_key.is_none()
            && (!self.cb.is_initiator() || self.cb.public_key_sent);

        if !expected {
            return Err(self.unexpected(CommandType::PairingPublicKey, None));
        }

        let peer_public_key = match toolbox::public_key_from_wire(&key.get_key()) {
            Some(peer_public_key) => peer_public_key,
            None => {
                log::error!("(SM) public key of the peer is not on the curve");

                return Err(StepError::Failed(PairingFailedReason::DhKeyCheckFailed));
            }
        };

        log::trace!("(SM) peer public key: {:x?}", &key.get_key()[..]);

        self.cb.peer_public_key = Some(peer_public_key);

        if self.cb.is_initiator() {
            self.public_keys_exchanged()
        } else if self.cb.public_key.is_some() {
            self.send_public_key()?;

            self.public_keys_exchanged()
        } else {
            Ok(())
        }
    }

    /// The x coordinates of the public keys of this device and the peer (in that order)
    fn public_key_xs(&self) -> Result<([u8; 32], [u8; 32]), StepError> {
        match (&self.cb.public_key, &self.cb.peer_public_key) {
            (Some(local), Some(peer)) => Ok((toolbox::public_key_x(local), toolbox::public_key_x(peer))),
            _ => Err(UNSPECIFIED),
        }
    }

    /// PKax and PKbx
    fn initiator_responder_xs(&self) -> Result<([u8; 32], [u8; 32]), StepError> {
        let (local, peer) = self.public_key_xs()?;

        Ok(if self.cb.is_initiator() {
            (local, peer)
        } else {
            (peer, local)
        })
    }

    /// Na and Nb
    fn nonces(&self) -> Result<(u128, u128), StepError> {
        let nonce = self.cb.nonce.ok_or(UNSPECIFIED)?;
        let peer_nonce = self.cb.peer_nonce.ok_or(UNSPECIFIED)?;

        Ok(if self.cb.is_initiator() {
            (nonce, peer_nonce)
        } else {
            (peer_nonce, nonce)
        })
    }

    fn public_keys_exchanged(&mut self) -> Step {
        let dh_key = match (&self.cb.private_key, &self.cb.peer_public_key) {
            (Some(private_key), Some(peer_public_key)) => toolbox::ecdh(private_key, peer_public_key),
            _ => return Err(UNSPECIFIED),
        };

        log::trace!("(SM) DHKey: {:x?}", dh_key);

        self.cb.dh_key = Some(dh_key);

        self.set_phase(Phase::Authentication);

        match self.cb.method {
            PairingMethod::JustWorks | PairingMethod::NumbComp => self.generate_nonce(),
            PairingMethod::PassKeyEntry(direction) => self.acquire_passkey(direction),
            PairingMethod::Oob => {
                self.verify_peer_oob()?;

                self.generate_nonce()
            }
        }
    }

    /// Check the out of band data of the peer against its public key
    fn verify_peer_oob(&self) -> Step {
        if let Some(data) = self.cb.peer_oob {
            let (_, peer_x) = self.public_key_xs()?;

            if toolbox::f4(peer_x, peer_x, data.random, 0) != data.confirm {
                log::error!("(SM) out of band confirm does not match the public key of the peer");

                return Err(StepError::Failed(PairingFailedReason::ConfirmValueFailed));
            }
        }

        if self.peer_features()?.get_oob_data_flag().is_present() && self.settings.local_oob.is_none() {
            log::error!("(SM) peer has out of band data but this device has none");

            return Err(StepError::Failed(PairingFailedReason::OobNotAvailable));
        }

        Ok(())
    }

    /// The `r` inputs of `f6` held by this device and the peer (in that order)
    ///
    /// For out of band pairing this device's `r` is only used when the peer received it.
    fn check_randoms(&self) -> Result<(u128, u128), StepError> {
        match self.cb.method {
            PairingMethod::PassKeyEntry(_) => {
                let passkey = self.cb.tk.ok_or(UNSPECIFIED)?;

                Ok((passkey, passkey))
            }
            PairingMethod::Oob => {
                let local_r = if self.peer_features()?.get_oob_data_flag().is_present() {
                    self.settings
                        .local_oob
                        .map(|oob| oob.get_random())
                        .ok_or(StepError::Failed(PairingFailedReason::OobNotAvailable))?
                } else {
                    0
                };

                let peer_r = self.cb.peer_oob.map_or(0, |data| data.random);

                Ok((local_r, peer_r))
            }
            PairingMethod::JustWorks | PairingMethod::NumbComp => Ok((0, 0)),
        }
    }

    pub(crate) fn generate_nonce(&mut self) -> Step {
        self.request_random(RandEncProcState::GenNonce { part: 0 })
    }

    pub(crate) fn on_nonce_octets(&mut self, part: u8, octets: [u8; 8]) -> Step {
        if part == 0 {
            self.cb.rand_octets[..8].copy_from_slice(&octets);

            return self.request_random(RandEncProcState::GenNonce { part: 1 });
        }

        self.cb.rand_octets[8..16].copy_from_slice(&octets);

        let mut nonce = [0u8; 16];

        nonce.copy_from_slice(&self.cb.rand_octets[..16]);

        self.cb.rand_octets = [0; 32];

        self.cb.nonce = Some(<u128>::from_le_bytes(nonce));

        self.nonce_ready()
    }

    fn send_confirm(&mut self) -> Step {
        let confirm = self.cb.confirm.ok_or(UNSPECIFIED)?;

        self.send(Pdu::PairingConfirm(PairingValue::new(confirm)));

        self.cb.confirm_sent = true;

        Ok(())
    }

    fn send_nonce(&mut self) -> Step {
        let nonce = self.cb.nonce.ok_or(UNSPECIFIED)?;

        self.send(Pdu::PairingRandom(PairingValue::new(nonce)));

        self.cb.nonce_sent = true;

        Ok(())
    }

    fn nonce_ready(&mut self) -> Step {
        let nonce = self.cb.nonce.ok_or(UNSPECIFIED)?;

        let (local_x, peer_x) = self.public_key_xs()?;

        match self.cb.method {
            PairingMethod::JustWorks | PairingMethod::NumbComp => {
                if self.cb.is_initiator() {
                    if self.cb.peer_confirm.is_some() {
                        self.send_nonce()?;
                    }

                    Ok(())
                } else {
                    let confirm = toolbox::f4(local_x, peer_x, nonce, 0);

                    self.cb.confirm = Some(confirm);

                    self.key_ready(KeyType::Confirm(confirm));

                    self.send_confirm()
                }
            }
            PairingMethod::PassKeyEntry(_) => {
                let passkey = self.cb.tk.ok_or(UNSPECIFIED)?;

                let z = passkey_round_bit(passkey, self.cb.passkey_round);

                let confirm = toolbox::f4(local_x, peer_x, nonce, z);

                self.cb.confirm = Some(confirm);

                self.key_ready(KeyType::Confirm(confirm));

                if self.cb.is_initiator() || self.cb.peer_confirm.is_some() {
                    self.send_confirm()?;
                }

                Ok(())
            }
            PairingMethod::Oob => {
                if self.cb.is_initiator() {
                    self.send_nonce()
                } else if self.cb.peer_nonce.is_some() {
                    self.send_nonce()?;

                    self.start_dh_key_check()
                } else {
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn on_sc_confirm(&mut self, confirm: u128) -> Step {
        let expected = match self.cb.method {
            PairingMethod::JustWorks | PairingMethod::NumbComp => {
                self.cb.is_initiator() && self.cb.peer_confirm.is_none()
            }
            PairingMethod::PassKeyEntry(_) => {
                self.cb.peer_confirm.is_none() && (!self.cb.is_initiator() || self.cb.confirm_sent)
            }
            PairingMethod::Oob => false,
        };

        if !expected {
            return Err(self.unexpected(CommandType::PairingConfirm, None));
        }

        log::trace!("(SM) peer confirm: {:x}", confirm);

        self.cb.peer_confirm = Some(confirm);

        match self.cb.method {
            PairingMethod::PassKeyEntry(_) if !self.cb.is_initiator() => {
                if self.cb.confirm.is_some() {
                    self.send_confirm()?;
                }

                Ok(())
            }
            _ => {
                if self.cb.nonce.is_some() {
                    self.send_nonce()?;
                }

                Ok(())
            }
        }
    }

    /// Check the confirm value of the peer
    fn check_peer_confirm(&mut self, compare: u128) -> Step {
        self.key_ready(KeyType::Compare(compare));

        if self.cb.peer_confirm != Some(compare) {
            log::error!("(SM) confirm value of the peer does not match its nonce");

            return Err(StepError::Failed(PairingFailedReason::ConfirmValueFailed));
        }

        Ok(())
    }

    pub(crate) fn on_sc_random(&mut self, random: u128) -> Step {
        let expected = self.cb.peer_nonce.is_none()
            && match self.cb.method {
                PairingMethod::Oob => !self.cb.is_initiator() || self.cb.nonce_sent,
                _ if self.cb.is_initiator() => self.cb.nonce_sent,
                _ => self.cb.confirm_sent,
            };

        if !expected {
            return Err(self.unexpected(CommandType::PairingRandom, None));
        }

        log::trace!("(SM) peer nonce: {:x}", random);

        self.cb.peer_nonce = Some(random);

        let (local_x, peer_x) = self.public_key_xs()?;

        match self.cb.method {
            PairingMethod::JustWorks | PairingMethod::NumbComp => {
                if self.cb.is_initiator() {
                    self.check_peer_confirm(toolbox::f4(peer_x, local_x, random, 0))?;
                } else {
                    self.send_nonce()?;
                }

                self.numeric_comparison()
            }
            PairingMethod::PassKeyEntry(_) => {
                let passkey = self.cb.tk.ok_or(UNSPECIFIED)?;

                let z = passkey_round_bit(passkey, self.cb.passkey_round);

                self.check_peer_confirm(toolbox::f4(peer_x, local_x, random, z))?;

                if !self.cb.is_initiator() {
                    self.send_nonce()?;
                }

                self.next_passkey_round()
            }
            PairingMethod::Oob => {
                if self.cb.is_initiator() {
                    self.start_dh_key_check()
                } else if self.cb.nonce.is_some() {
                    self.send_nonce()?;

                    self.start_dh_key_check()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Display the numeric comparison value, or continue for just works
    fn numeric_comparison(&mut self) -> Step {
        if self.cb.method != PairingMethod::NumbComp {
            self.cb.user_confirmed = true;

            return self.start_dh_key_check();
        }

        let (pka_x, pkb_x) = self.initiator_responder_xs()?;
        let (na, nb) = self.nonces()?;

        let value = toolbox::g2(pka_x, pkb_x, na, nb);

        if value > toolbox::MAX_PASSKEY {
            log::error!("(SM) numeric comparison value is out of range");

            return Err(UNSPECIFIED);
        }

        let handle = self.cb.handle;

        self.emit(SecurityManagerEvent::NumericComparison { handle, value });

        Ok(())
    }

    fn next_passkey_round(&mut self) -> Step {
        self.cb.passkey_round += 1;

        if self.cb.passkey_round == PASSKEY_ROUNDS {
            return self.start_dh_key_check();
        }

        self.cb.nonce = None;
        self.cb.peer_nonce = None;
        self.cb.confirm = None;
        self.cb.peer_confirm = None;
        self.cb.confirm_sent = false;
        self.cb.nonce_sent = false;

        self.generate_nonce()
    }

    /// Authentication stage 2
    ///
    /// The initiator sends Ea immediately. The responder checks Ea once it is received and then
    /// sends Eb.
    pub(crate) fn start_dh_key_check(&mut self) -> Step {
        self.set_phase(Phase::DhKeyCheck);

        let dh_key = self.cb.dh_key.ok_or(UNSPECIFIED)?;
        let (na, nb) = self.nonces()?;
        let (a, b) = self.cb.info.pairing_addresses();

        let (mac_key, ltk) = toolbox::f5(dh_key, na, nb, a, b);

        log::trace!("(SM) mac_key: {:x}", mac_key);
        log::trace!("(SM) ltk: {:x}", ltk);

        self.cb.mac_key = Some(mac_key);
        self.cb.session_key = Some(self.cb.mask_key(ltk));

        if self.cb.is_initiator() {
            let (_, peer_r) = self.check_randoms()?;
            let (io_cap_a, _) = self.cb.io_caps().ok_or(UNSPECIFIED)?;

            let ea = toolbox::f6(mac_key, na, nb, peer_r, io_cap_a, a, b);

            self.key_ready(KeyType::LocalDhKeyCheck(ea));

            self.send(Pdu::PairingDHKeyCheck(PairingValue::new(ea)));

            Ok(())
        } else if self.cb.peer_dh_key_check.is_some() {
            self.check_peer_dh_key()
        } else {
            Ok(())
        }
    }

    pub(crate) fn on_dh_key_check(&mut self, check: u128) -> Step {
        let awaiting_user = !self.cb.is_initiator()
            && self.cb.method == PairingMethod::NumbComp
            && self.cb.phase == Phase::Authentication
            && self.cb.peer_nonce.is_some()
            && !self.cb.user_confirmed;

        let expected =
            self.cb.peer_dh_key_check.is_none() && (self.cb.phase == Phase::DhKeyCheck || awaiting_user);

        if !expected {
            return Err(self.unexpected(CommandType::PairingDHKeyCheck, None));
        }

        self.cb.peer_dh_key_check = Some(check);

        if self.cb.phase == Phase::DhKeyCheck {
            self.check_peer_dh_key()
        } else {
            log::debug!("(SM) holding the DHKey check until the user confirms");

            Ok(())
        }
    }

    fn check_peer_dh_key(&mut self) -> Step {
        let received = self.cb.peer_dh_key_check.ok_or(UNSPECIFIED)?;
        let mac_key = self.cb.mac_key.ok_or(UNSPECIFIED)?;
        let (na, nb) = self.nonces()?;
        let (a, b) = self.cb.info.pairing_addresses();
        let (io_cap_a, io_cap_b) = self.cb.io_caps().ok_or(UNSPECIFIED)?;
        let (local_r, peer_r) = self.check_randoms()?;

        let expected = if self.cb.is_initiator() {
            toolbox::f6(mac_key, nb, na, local_r, io_cap_b, b, a)
        } else {
            toolbox::f6(mac_key, na, nb, local_r, io_cap_a, a, b)
        };

        self.key_ready(KeyType::PeerDhKeyCheck(expected));

        if received != expected {
            log::trace!("(SM) received check: {:x}", received);
            log::trace!("(SM) calculated check: {:x}", expected);

            return Err(StepError::Failed(PairingFailedReason::DhKeyCheckFailed));
        }

        if !self.cb.is_initiator() {
            let eb = toolbox::f6(mac_key, nb, na, peer_r, io_cap_b, b, a);

            self.key_ready(KeyType::LocalDhKeyCheck(eb));

            self.send(Pdu::PairingDHKeyCheck(PairingValue::new(eb)));
        }

        self.long_term_key_ready()
    }

    fn long_term_key_ready(&mut self) -> Step {
        let key = LongTermKey {
            ltk: self.cb.session_key.ok_or(UNSPECIFIED)?,
            ediv: 0,
            rand: 0,
        };

        self.cb.keys.ltk = Some(key);

        self.key_ready(KeyType::Ltk(key));

        self.set_phase(Phase::Encryption);

        if self.cb.is_initiator() {
            let handle = self.cb.handle;

            self.emit(SecurityManagerEvent::EncryptLink { handle, key });
        }

        Ok(())
    }
}
