//! LE legacy pairing
//!
//! The TK is determined by the pairing method, then both devices exchange the confirm values
//! created with `c1` before revealing their random. The STK is created with `s1` from the TK and
//! both randoms.

use crate::control_block::{EncryptStep, Phase, RandEncProcState};
use crate::manager::{KeyType, SecurityManagerEvent, Session, SmController, Step, StepError, UNSPECIFIED};
use crate::pairing::{PairingFailedReason, PairingMethod, PairingValue};
use crate::{toolbox, CommandType, LongTermKey, Pdu};

impl<C: SmController> Session<'_, C> {
    /// Determine the temporary key
    pub(crate) fn start_temporary_key(&mut self) -> Step {
        match self.cb.method {
            PairingMethod::JustWorks => {
                self.cb.tk = Some(0);

                self.temporary_key_ready()
            }
            PairingMethod::Oob => match self.settings.legacy_oob_tk {
                Some(tk) => {
                    self.cb.tk = Some(tk);

                    self.temporary_key_ready()
                }
                None => {
                    log::error!("(SM) no temporary key for out of band pairing");

                    Err(StepError::Failed(PairingFailedReason::OobNotAvailable))
                }
            },
            PairingMethod::PassKeyEntry(direction) => self.acquire_passkey(direction),
            PairingMethod::NumbComp => Err(UNSPECIFIED),
        }
    }

    /// Generate Mrand (initiator) or Srand (responder) once the TK is known
    pub(crate) fn temporary_key_ready(&mut self) -> Step {
        let tk = self.cb.tk.ok_or(UNSPECIFIED)?;

        self.key_ready(KeyType::Tk(tk));

        self.request_random(RandEncProcState::GenSrandMrand)
    }

    pub(crate) fn on_pairing_random_generated(&mut self, octets: [u8; 8]) -> Step {
        self.cb.rand_octets[8..16].copy_from_slice(&octets);

        let mut random = [0u8; 16];

        random.copy_from_slice(&self.cb.rand_octets[..16]);

        self.cb.rand_octets = [0; 32];

        let random = <u128>::from_le_bytes(random);

        self.cb.nonce = Some(random);

        self.confirm_first_step(EncryptStep::ConfirmP1, random)
    }

    /// `e(TK, r ^ p1)`, the first half of `c1`
    fn confirm_first_step(&mut self, step: EncryptStep, random: u128) -> Step {
        let tk = self.cb.tk.ok_or(UNSPECIFIED)?;

        let (preq, pres) = self.features()?;

        let (_, iat, _, rat) = self.cb.info.c1_addresses();

        let p1 = toolbox::c1_p1(
            pres.c1_value(CommandType::PairingResponse),
            preq.c1_value(CommandType::PairingRequest),
            iat,
            rat,
        );

        self.encrypt(step, tk, random ^ p1)
    }

    /// `e(TK, first ^ p2)`, the second half of `c1`
    fn confirm_second_step(&mut self, step: EncryptStep, first: u128) -> Step {
        let tk = self.cb.tk.ok_or(UNSPECIFIED)?;

        let (ia, _, ra, _) = self.cb.info.c1_addresses();

        self.encrypt(step, tk, first ^ toolbox::c1_p2(ia, ra))
    }

    pub(crate) fn on_legacy_encrypted(&mut self, step: EncryptStep, value: u128) -> Step {
        match step {
            EncryptStep::ConfirmP1 => self.confirm_second_step(EncryptStep::ConfirmP2, value),
            EncryptStep::CompareP1 => self.confirm_second_step(EncryptStep::CompareP2, value),
            EncryptStep::ConfirmP2 => {
                self.cb.confirm = Some(value);

                self.key_ready(KeyType::Confirm(value));

                self.send_legacy_confirm();

                Ok(())
            }
            EncryptStep::CompareP2 => self.check_legacy_compare(value),
            EncryptStep::Stk => self.short_term_key_ready(value),
            _ => Err(UNSPECIFIED),
        }
    }

    /// Send the confirm value
    ///
    /// The responder only sends its confirm after it received the confirm of the initiator.
    fn send_legacy_confirm(&mut self) {
        if self.cb.confirm_sent {
            return;
        }

        if let Some(confirm) = self.cb.confirm {
            if self.cb.is_initiator() || self.cb.peer_confirm.is_some() {
                self.send(Pdu::PairingConfirm(PairingValue::new(confirm)));

                self.cb.confirm_sent = true;
            }
        }
    }

    pub(crate) fn on_legacy_confirm(&mut self, confirm: u128) -> Step {
        if self.cb.peer_confirm.is_some() || (self.cb.is_initiator() && !self.cb.confirm_sent) {
            return Err(self.unexpected(CommandType::PairingConfirm, None));
        }

        log::trace!("(SM) peer confirm: {:x}", confirm);

        self.cb.peer_confirm = Some(confirm);

        if self.cb.is_initiator() {
            let random = self.cb.nonce.ok_or(UNSPECIFIED)?;

            self.send(Pdu::PairingRandom(PairingValue::new(random)));

            self.cb.nonce_sent = true;
        } else {
            self.send_legacy_confirm();
        }

        Ok(())
    }

    pub(crate) fn on_legacy_random(&mut self, random: u128) -> Step {
        let ready = if self.cb.is_initiator() {
            self.cb.nonce_sent
        } else {
            self.cb.confirm_sent
        };

        if !ready || self.cb.peer_nonce.is_some() {
            return Err(self.unexpected(CommandType::PairingRandom, None));
        }

        log::trace!("(SM) peer random: {:x}", random);

        self.cb.peer_nonce = Some(random);

        self.confirm_first_step(EncryptStep::CompareP1, random)
    }

    fn check_legacy_compare(&mut self, compare: u128) -> Step {
        self.key_ready(KeyType::Compare(compare));

        if self.cb.peer_confirm != Some(compare) {
            log::error!("(SM) confirm value of the peer does not match its random");

            return Err(StepError::Failed(PairingFailedReason::ConfirmValueFailed));
        }

        let nonce = self.cb.nonce.ok_or(UNSPECIFIED)?;
        let peer_nonce = self.cb.peer_nonce.ok_or(UNSPECIFIED)?;

        if !self.cb.is_initiator() {
            self.send(Pdu::PairingRandom(PairingValue::new(nonce)));

            self.cb.nonce_sent = true;
        }

        let (mrand, srand) = if self.cb.is_initiator() {
            (nonce, peer_nonce)
        } else {
            (peer_nonce, nonce)
        };

        let tk = self.cb.tk.ok_or(UNSPECIFIED)?;

        self.encrypt(EncryptStep::Stk, tk, toolbox::s1_r(srand, mrand))
    }

    fn short_term_key_ready(&mut self, value: u128) -> Step {
        let stk = self.cb.mask_key(value);

        self.cb.session_key = Some(stk);

        self.key_ready(KeyType::Stk(stk));

        self.set_phase(Phase::Encryption);

        if self.cb.is_initiator() {
            let handle = self.cb.handle;

            self.emit(SecurityManagerEvent::EncryptLink {
                handle,
                key: LongTermKey {
                    ltk: stk,
                    ediv: 0,
                    rand: 0,
                },
            });
        }

        Ok(())
    }
}
