//! The Security Manager of the local radio
//!
//! A [`SecurityManager`] owns the pairing control block of every connection. Inputs are fed to
//! it by the user (PDUs received on the Security Manager channel, completions of controller
//! requests, and user interaction) and outputs are queued as [`SecurityManagerEvent`]s.
//!
//! Anything that needs a random number (or AES when the controller is the [`AesSource`]) is
//! requested through the [`SmController`]. The pairing control block records which continuation
//! the completion resumes in its [`RandEncProcState`]. Only one request is ever outstanding for a
//! connection.

use crate::config::{AesSource, SecuritySettings};
use crate::control_block::{ConnectionInfo, EncryptStep, PairingControlBlock, Phase, RandEncProcState};
use crate::encrypt_info::{
    AuthRequirements, EncryptionInformation, IdentityAddressInformation, IdentityInformation, KeyDistributions,
    MasterIdentification, SecurityRequest, SigningInformation,
};
use crate::pairing::{
    KeyPressNotification, OobDataFlag, PairingFailed, PairingFailedReason, PairingFeatures, PairingMethod,
    PasskeyDirection,
};
use crate::{toolbox, CommandType, ConnectionHandle, Error, Keys, LongTermKey, Pdu, ScOobData};
use alloc::collections::{BTreeMap, VecDeque};

/// The requests the Security Manager makes to the controller
///
/// Every request is completed by calling either [`SecurityManager::on_rand_complete`] or
/// [`SecurityManager::on_encrypt_complete`] for the same connection. An error returned here means
/// the request was never issued (the pairing then fails).
pub trait SmController {
    /// Request eight random octets (the *LE Rand* command)
    fn request_random(&mut self, handle: ConnectionHandle) -> Result<(), le_host_core::errors::Error>;

    /// Request the AES-128 encryption of `plain_text` with `key` (the *LE Encrypt* command)
    ///
    /// This is only used when the [`AesSource`] is the controller.
    fn request_encrypt(
        &mut self,
        handle: ConnectionHandle,
        key: u128,
        plain_text: u128,
    ) -> Result<(), le_host_core::errors::Error>;
}

/// A key (or intermediate value) generated during pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Legacy temporary key
    Tk(u128),
    /// The confirm value of this device
    Confirm(u128),
    /// The value the confirm of the peer device is checked against
    Compare(u128),
    /// Legacy short term key
    Stk(u128),
    Ltk(LongTermKey),
    Csrk(u128),
    LocalDhKeyCheck(u128),
    PeerDhKeyCheck(u128),
    /// BR/EDR link key derived from the LTK
    LinkKey(u128),
}

/// An output of the Security Manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityManagerEvent {
    /// Send a PDU to the peer over the Security Manager channel
    SendPdu { handle: ConnectionHandle, pdu: Pdu },
    KeyReady { handle: ConnectionHandle, key: KeyType },
    /// Display the passkey to the user
    PasskeyDisplay { handle: ConnectionHandle, passkey: u32 },
    /// Request the user to enter the passkey, answered with [`SecurityManager::passkey_reply`]
    PasskeyRequest { handle: ConnectionHandle },
    /// Display the value for numeric comparison, answered with
    /// [`SecurityManager::numeric_comparison_reply`]
    NumericComparison { handle: ConnectionHandle, value: u32 },
    KeypressNotification {
        handle: ConnectionHandle,
        notification: KeyPressNotification,
    },
    /// The peripheral requested security
    SecurityRequested {
        handle: ConnectionHandle,
        auth_req: AuthRequirements,
    },
    /// Start encryption of the link (the initiator only)
    EncryptLink { handle: ConnectionHandle, key: LongTermKey },
    AuthComplete {
        handle: ConnectionHandle,
        result: Result<Keys, PairingFailedReason>,
    },
}

/// The ways a step of pairing may stop it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepError {
    /// Pairing failed, the reason is only reported through the authentication complete event
    Failed(PairingFailedReason),
    /// Pairing failed and the error is also returned to the caller
    Aborted(PairingFailedReason, Error),
}

pub(crate) type Step = Result<(), StepError>;

pub(crate) const UNSPECIFIED: StepError = StepError::Failed(PairingFailedReason::UnspecifiedReason);

/// Create a passkey from random octets
///
/// The upper bits are cleared and the value is halved until it is a valid passkey.
pub(crate) fn passkey_from_octets(octets: [u8; 8]) -> u32 {
    let mut passkey = <u32>::from_le_bytes([octets[0], octets[1], octets[2], octets[3]]) & 0x000F_FFFF;

    while passkey > toolbox::MAX_PASSKEY {
        passkey >>= 1;
    }

    passkey
}

/// The Security Manager
pub struct SecurityManager<C> {
    controller: C,
    settings: SecuritySettings,
    blocks: BTreeMap<ConnectionHandle, PairingControlBlock>,
    events: VecDeque<SecurityManagerEvent>,
}

impl<C: SmController> SecurityManager<C> {
    pub fn new(controller: C, settings: SecuritySettings) -> Self {
        SecurityManager {
            controller,
            settings,
            blocks: BTreeMap::new(),
            events: VecDeque::new(),
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    fn session(&mut self, handle: ConnectionHandle) -> Result<Session<'_, C>, Error> {
        let cb = self.blocks.get_mut(&handle).ok_or(Error::UnknownConnection)?;

        Ok(Session {
            controller: &mut self.controller,
            settings: &self.settings,
            events: &mut self.events,
            cb,
        })
    }

    /// Create the pairing control block for a new connection
    ///
    /// Any previous block for `handle` is replaced.
    pub fn on_connect(&mut self, handle: ConnectionHandle, info: ConnectionInfo) {
        log::debug!("(SM) new pairing control block for {}", handle);

        self.blocks.insert(handle, PairingControlBlock::new(handle, info));
    }

    /// Destroy the pairing control block of a connection
    pub fn on_disconnect(&mut self, handle: ConnectionHandle) {
        if let Some(cb) = self.blocks.remove(&handle) {
            if cb.phase.is_pairing() {
                log::info!("(SM) disconnected from {} while pairing", handle);
            }
        }
    }

    /// Get the pairing phase of a connection
    pub fn phase(&self, handle: ConnectionHandle) -> Option<Phase> {
        self.blocks.get(&handle).map(|cb| cb.phase)
    }

    /// Get the keys of a connection that completed pairing
    pub fn keys(&self, handle: ConnectionHandle) -> Option<Keys> {
        self.blocks
            .get(&handle)
            .filter(|cb| cb.phase == Phase::Complete)
            .map(|cb| cb.keys)
    }

    /// Use the keys from a previous pairing (bonding) with the peer of a connection
    pub fn restore_keys(&mut self, handle: ConnectionHandle, keys: Keys) -> Result<(), Error> {
        let cb = self.blocks.get_mut(&handle).ok_or(Error::UnknownConnection)?;

        if cb.phase.is_pairing() {
            return Err(Error::Busy);
        }

        cb.keys = keys;
        cb.phase = Phase::Complete;

        Ok(())
    }

    /// Get the next output of the Security Manager
    pub fn next_event(&mut self) -> Option<SecurityManagerEvent> {
        self.events.pop_front()
    }

    /// Get the out of band data to transfer to the peer device
    ///
    /// This is `None` unless local out of band data is part of the security settings.
    pub fn local_oob_data(&self) -> Option<ScOobData> {
        self.settings.local_oob.and_then(|oob| oob.to_sc_oob_data())
    }

    /// Set the out of band data received from the peer device
    ///
    /// This must be set before pairing starts.
    pub fn set_peer_oob_data(&mut self, handle: ConnectionHandle, data: ScOobData) -> Result<(), Error> {
        let cb = self.blocks.get_mut(&handle).ok_or(Error::UnknownConnection)?;

        cb.peer_oob = Some(data);

        Ok(())
    }

    /// Start pairing by sending a pairing request
    ///
    /// This can only be called when this device is the initiator.
    pub fn start_pairing(&mut self, handle: ConnectionHandle) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        if !session.cb.is_initiator() {
            log::error!("(SM) only the initiator can send a pairing request");

            return Err(Error::Invalid);
        }

        if session.cb.phase.is_pairing() {
            return Err(Error::Busy);
        }

        session.send_pairing_request();

        Ok(())
    }

    /// Send a security request to the initiator
    pub fn send_security_request(&mut self, handle: ConnectionHandle) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        if session.cb.is_initiator() {
            return Err(Error::Invalid);
        }

        if session.cb.phase.is_pairing() {
            return Err(Error::Busy);
        }

        let auth_req = session.settings.auth_req;

        session.send(Pdu::SecurityRequest(SecurityRequest::new(auth_req)));

        Ok(())
    }

    /// Process a PDU received on the Security Manager channel
    ///
    /// PDUs that fail pairing are answered with a *pairing failed*. An error is returned when the
    /// PDU is malformed or not expected.
    pub fn on_pdu(&mut self, handle: ConnectionHandle, data: &[u8]) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        let result = match Pdu::try_from_bytes(data) {
            Ok(pdu) => session.process_pdu(pdu),
            Err(e) => return session.reject(data, e),
        };

        session.conclude(result)
    }

    /// Input the completion of a random request
    pub fn on_rand_complete(
        &mut self,
        handle: ConnectionHandle,
        random: [u8; 8],
        status: le_host_core::errors::Error,
    ) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        let result = match session.cb.rand_enc_proc_state.take() {
            None => return session.unsolicited_completion(),
            Some(_) if !status.is_ok() => {
                log::error!("(SM) random request failed: {}", status);

                Err(StepError::Aborted(
                    PairingFailedReason::UnspecifiedReason,
                    Error::Controller(status),
                ))
            }
            Some(RandEncProcState::Encrypt(_)) => Err(StepError::Aborted(
                PairingFailedReason::UnspecifiedReason,
                Error::Invalid,
            )),
            Some(state) => session.on_random(state, random),
        };

        session.conclude(result)
    }

    /// Input the completion of an encryption request
    pub fn on_encrypt_complete(
        &mut self,
        handle: ConnectionHandle,
        cypher_text: u128,
        status: le_host_core::errors::Error,
    ) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        let result = match session.cb.rand_enc_proc_state.take() {
            None => return session.unsolicited_completion(),
            Some(_) if !status.is_ok() => {
                log::error!("(SM) encrypt request failed: {}", status);

                Err(StepError::Aborted(
                    PairingFailedReason::UnspecifiedReason,
                    Error::Controller(status),
                ))
            }
            Some(RandEncProcState::Encrypt(step)) => session.on_encrypted(step, cypher_text),
            Some(_) => Err(StepError::Aborted(
                PairingFailedReason::UnspecifiedReason,
                Error::Invalid,
            )),
        };

        session.conclude(result)
    }

    /// Reply to a [`PasskeyRequest`](SecurityManagerEvent::PasskeyRequest)
    ///
    /// `None` (or a passkey larger than 999999) fails pairing.
    pub fn passkey_reply(&mut self, handle: ConnectionHandle, passkey: Option<u32>) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        if !session.awaiting_passkey() {
            return Err(Error::Invalid);
        }

        let result = match passkey {
            Some(passkey) if passkey <= toolbox::MAX_PASSKEY => {
                session.cb.tk = Some(passkey.into());

                session.passkey_ready()
            }
            _ => Err(StepError::Failed(PairingFailedReason::PasskeyEntryFailed)),
        };

        session.conclude(result)
    }

    /// Send a keypress notification while the user enters the passkey
    pub fn send_keypress_notification(
        &mut self,
        handle: ConnectionHandle,
        notification: KeyPressNotification,
    ) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        if !session.awaiting_passkey() {
            return Err(Error::Invalid);
        }

        session.send(Pdu::PairingKeyPressNotification(notification));

        Ok(())
    }

    /// Reply to a [`NumericComparison`](SecurityManagerEvent::NumericComparison)
    pub fn numeric_comparison_reply(&mut self, handle: ConnectionHandle, accept: bool) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        if !session.awaiting_numeric_comparison() {
            return Err(Error::Invalid);
        }

        let result = if accept {
            session.cb.user_confirmed = true;

            session.start_dh_key_check()
        } else {
            Err(StepError::Failed(PairingFailedReason::NumericComparisonFailed))
        };

        session.conclude(result)
    }

    /// Get the key for an *LE Long Term Key Request* event
    ///
    /// While pairing a request with a zero `rand` and `ediv` is for the STK (or the LTK of LE
    /// Secure Connections). Otherwise the LTK this device distributed is returned if `rand` and
    /// `ediv` match it.
    pub fn on_ltk_request(&self, handle: ConnectionHandle, rand: u64, ediv: u16) -> Option<u128> {
        let cb = self.blocks.get(&handle)?;

        let key = match cb.phase {
            Phase::Encryption if rand == 0 && ediv == 0 => cb.session_key,
            _ => cb
                .keys
                .ltk
                .filter(|ltk| ltk.rand == rand && ltk.ediv == ediv)
                .map(|ltk| ltk.ltk),
        };

        if key.is_none() {
            log::info!("(SM) no long term key for {}", handle);
        }

        key
    }

    /// Input an encryption change (or encryption key refresh) of a connection
    pub fn on_encryption_change(&mut self, handle: ConnectionHandle, encrypted: bool) -> Result<(), Error> {
        let mut session = self.session(handle)?;

        if session.cb.phase != Phase::Encryption {
            log::debug!("(SM) encryption change of {} outside of pairing", handle);

            return Ok(());
        }

        let result = if encrypted {
            session.start_key_distribution()
        } else {
            log::error!("(SM) failed to encrypt {} with the pairing key", handle);

            Err(UNSPECIFIED)
        };

        session.conclude(result)
    }
}

/// The borrowed state for processing an input of one connection
pub(crate) struct Session<'a, C> {
    pub(crate) controller: &'a mut C,
    pub(crate) settings: &'a SecuritySettings,
    pub(crate) events: &'a mut VecDeque<SecurityManagerEvent>,
    pub(crate) cb: &'a mut PairingControlBlock,
}

impl<C: SmController> Session<'_, C> {
    pub(crate) fn set_phase(&mut self, phase: Phase) {
        log::debug!("(SM) {} pairing phase {:?} -> {:?}", self.cb.handle, self.cb.phase, phase);

        self.cb.phase = phase;
    }

    pub(crate) fn emit(&mut self, event: SecurityManagerEvent) {
        self.events.push_back(event)
    }

    pub(crate) fn send(&mut self, pdu: Pdu) {
        log::trace!("(SM) sending {}", pdu.command_type());

        let handle = self.cb.handle;

        self.emit(SecurityManagerEvent::SendPdu { handle, pdu })
    }

    pub(crate) fn key_ready(&mut self, key: KeyType) {
        log::trace!("(SM) key ready: {:x?}", key);

        let handle = self.cb.handle;

        self.emit(SecurityManagerEvent::KeyReady { handle, key })
    }

    /// Fail pairing and send a *pairing failed* to the peer
    fn fail(&mut self, reason: PairingFailedReason) {
        log::error!("(SM) pairing with {} failed: {}", self.cb.handle, reason);

        self.send(Pdu::PairingFailed(PairingFailed::new(reason)));

        self.abort(reason)
    }

    /// Fail pairing without sending anything to the peer
    fn abort(&mut self, reason: PairingFailedReason) {
        self.cb.rand_enc_proc_state = None;

        self.set_phase(Phase::Failed);

        let handle = self.cb.handle;

        self.emit(SecurityManagerEvent::AuthComplete {
            handle,
            result: Err(reason),
        })
    }

    fn conclude(mut self, result: Step) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(StepError::Failed(reason)) => {
                self.fail(reason);
                Ok(())
            }
            Err(StepError::Aborted(reason, e)) => {
                self.fail(reason);
                Err(e)
            }
        }
    }

    /// Handle a PDU that could not be decoded
    fn reject(self, data: &[u8], e: Error) -> Result<(), Error> {
        if self.cb.phase == Phase::Failed {
            return Err(e);
        }

        let known_command = data
            .first()
            .map_or(false, |code| CommandType::try_from_val(*code).is_ok());

        let reason = if known_command {
            PairingFailedReason::InvalidParameters
        } else {
            log::error!("(SM) received an unsupported command: {:x?}", data.first());

            PairingFailedReason::CommandNotSupported
        };

        self.conclude(Err(StepError::Aborted(reason, e)))
    }

    /// Handle a completion when no request is outstanding
    fn unsolicited_completion(&self) -> Result<(), Error> {
        if self.cb.phase == Phase::Failed {
            log::debug!("(SM) ignoring completion for failed pairing of {}", self.cb.handle);

            Ok(())
        } else {
            log::warn!("(SM) completion without a request for {}", self.cb.handle);

            Err(Error::Invalid)
        }
    }

    pub(crate) fn unexpected(&self, received: CommandType, expected: Option<CommandType>) -> StepError {
        log::error!(
            "(SM) unexpected {} from {} in phase {:?}",
            received,
            self.cb.handle,
            self.cb.phase
        );

        StepError::Aborted(
            PairingFailedReason::UnspecifiedReason,
            Error::IncorrectCommand { expected, received },
        )
    }

    fn check_no_outstanding_request(&self) -> Step {
        debug_assert!(
            self.cb.rand_enc_proc_state.is_none(),
            "a random or encrypt request is already outstanding"
        );

        if let Some(state) = self.cb.rand_enc_proc_state {
            log::error!("(SM) request issued while {:?} is outstanding", state);

            return Err(StepError::Aborted(PairingFailedReason::UnspecifiedReason, Error::Busy));
        }

        Ok(())
    }

    /// Request eight random octets, `state` is the continuation
    pub(crate) fn request_random(&mut self, state: RandEncProcState) -> Step {
        self.check_no_outstanding_request()?;

        self.cb.rand_enc_proc_state = Some(state);

        if let Err(e) = self.controller.request_random(self.cb.handle) {
            log::error!("(SM) controller rejected the random request: {}", e);

            self.cb.rand_enc_proc_state = None;

            return Err(StepError::Aborted(
                PairingFailedReason::UnspecifiedReason,
                Error::Controller(e),
            ));
        }

        Ok(())
    }

    /// Encrypt `plain_text` with `key`, `step` is the continuation
    ///
    /// When the host is the AES source the continuation is called before this returns.
    pub(crate) fn encrypt(&mut self, step: EncryptStep, key: u128, plain_text: u128) -> Step {
        self.check_no_outstanding_request()?;

        match self.settings.aes_source {
            AesSource::Host => self.on_encrypted(step, toolbox::e(key, plain_text)),
            AesSource::Controller => {
                self.cb.rand_enc_proc_state = Some(RandEncProcState::Encrypt(step));

                if let Err(e) = self.controller.request_encrypt(self.cb.handle, key, plain_text) {
                    log::error!("(SM) controller rejected the encrypt request: {}", e);

                    self.cb.rand_enc_proc_state = None;

                    return Err(StepError::Aborted(
                        PairingFailedReason::UnspecifiedReason,
                        Error::Controller(e),
                    ));
                }

                Ok(())
            }
        }
    }

    fn on_random(&mut self, state: RandEncProcState, octets: [u8; 8]) -> Step {
        log::trace!("(SM) random for {:?}: {:x?}", state, octets);

        match state {
            RandEncProcState::GenTk => self.on_passkey_octets(octets),
            RandEncProcState::GenSrandMrand => {
                self.cb.rand_octets[..8].copy_from_slice(&octets);

                self.request_random(RandEncProcState::GenSrandMrandCont)
            }
            RandEncProcState::GenSrandMrandCont => self.on_pairing_random_generated(octets),
            RandEncProcState::GenDivLtk => self.on_ltk_div(octets),
            RandEncProcState::GenRandV => self.on_ltk_rand(octets),
            RandEncProcState::GenDivCsrk => self.on_csrk_div(octets),
            RandEncProcState::GenPrivateKey { part } => self.on_private_key_octets(part, octets),
            RandEncProcState::GenNonce { part } => self.on_nonce_octets(part, octets),
            RandEncProcState::Encrypt(_) => Err(UNSPECIFIED),
        }
    }

    pub(crate) fn on_encrypted(&mut self, step: EncryptStep, value: u128) -> Step {
        match step {
            EncryptStep::ConfirmP1
            | EncryptStep::ConfirmP2
            | EncryptStep::CompareP1
            | EncryptStep::CompareP2
            | EncryptStep::Stk => self.on_legacy_encrypted(step, value),
            EncryptStep::Ltk => self.on_ltk_generated(value),
            EncryptStep::Ediv => self.on_ediv_generated(value),
            EncryptStep::Csrk => self.on_csrk_generated(value),
        }
    }

    /// The pairing request (initiator) or pairing response (responder) of this device
    fn local_features(&self, request: Option<&PairingFeatures>) -> PairingFeatures {
        let settings = self.settings;

        let oob_data_flag = if settings.legacy_oob_tk.is_some() || self.cb.peer_oob.is_some() {
            OobDataFlag::AuthenticationDataFromRemoteDevicePresent
        } else {
            OobDataFlag::AuthenticationDataNotPresent
        };

        let bonding = settings.auth_req.is_bonding() && request.map_or(true, |r| r.get_auth_req().is_bonding());

        let (initiator_keys, responder_keys) = match request {
            _ if !bonding => (KeyDistributions::NONE, KeyDistributions::NONE),
            None => (
                settings.distributable(settings.initiator_key_distribution),
                settings.responder_key_distribution,
            ),
            Some(request) => (
                request
                    .get_initiator_key_distribution()
                    .intersect(settings.initiator_key_distribution),
                settings.distributable(
                    request
                        .get_responder_key_distribution()
                        .intersect(settings.responder_key_distribution),
                ),
            ),
        };

        PairingFeatures::new(
            settings.io_capability,
            oob_data_flag,
            settings.auth_req,
            settings.max_encryption_key_size,
            initiator_keys,
            responder_keys,
        )
    }

    /// Get the pairing request and the pairing response
    pub(crate) fn features(&self) -> Result<(PairingFeatures, PairingFeatures), StepError> {
        match (self.cb.preq, self.cb.pres) {
            (Some(preq), Some(pres)) => Ok((preq, pres)),
            _ => Err(UNSPECIFIED),
        }
    }

    pub(crate) fn peer_features(&self) -> Result<PairingFeatures, StepError> {
        let (preq, pres) = self.features()?;

        Ok(if self.cb.is_initiator() { pres } else { preq })
    }

    pub(crate) fn send_pairing_request(&mut self) {
        self.cb.reset();

        let request = self.local_features(None);

        self.cb.preq = Some(request);

        self.send(Pdu::PairingRequest(request));

        self.set_phase(Phase::FeatureExchange);
    }

    /// Determine the pairing parameters from the exchanged features
    fn negotiate(&mut self) -> Step {
        let (preq, pres) = self.features()?;

        let is_secure_connection =
            preq.get_auth_req().contains(AuthRequirements::SC) && pres.get_auth_req().contains(AuthRequirements::SC);

        if self.settings.secure_connections_only && !is_secure_connection {
            log::error!("(SM) peer does not support LE Secure Connections");

            return Err(StepError::Failed(PairingFailedReason::AuthenticationRequirements));
        }

        let key_size = core::cmp::min(preq.get_max_encryption_size(), pres.get_max_encryption_size());

        if key_size < self.settings.min_encryption_key_size {
            log::error!("(SM) encryption key size of {} is too small", key_size);

            return Err(StepError::Failed(PairingFailedReason::EncryptionKeySize));
        }

        let method = PairingMethod::determine_method(&preq, &pres, !is_secure_connection);

        if self.settings.auth_req.contains(AuthRequirements::MITM) && !method.is_authenticated() {
            log::error!("(SM) man in the middle protection required but pairing method is {:?}", method);

            return Err(StepError::Failed(PairingFailedReason::AuthenticationRequirements));
        }

        log::info!("(SM) pairing method: {:?}", method);

        self.cb.is_secure_connection = is_secure_connection;
        self.cb.key_size = key_size;
        self.cb.method = method;
        self.cb.initiator_keys = preq
            .get_initiator_key_distribution()
            .intersect(pres.get_initiator_key_distribution());
        self.cb.responder_keys = preq
            .get_responder_key_distribution()
            .intersect(pres.get_responder_key_distribution());

        Ok(())
    }

    fn begin_authentication(&mut self) -> Step {
        if self.cb.is_secure_connection {
            self.set_phase(Phase::PublicKeyExchange);

            self.generate_key_pair()
        } else {
            self.set_phase(Phase::Authentication);

            self.start_temporary_key()
        }
    }

    fn process_pdu(&mut self, pdu: Pdu) -> Step {
        log::info!("(SM) processing {}", pdu.command_type());

        match pdu {
            Pdu::PairingFailed(failed) => {
                if self.cb.phase.is_pairing() {
                    log::error!("(SM) peer failed pairing: {}", failed.get_reason());

                    self.abort(failed.get_reason());
                }

                Ok(())
            }
            Pdu::PairingRequest(request) => self.on_pairing_request(request),
            Pdu::SecurityRequest(request) => self.on_security_request(request),
            pdu if self.cb.phase == Phase::Failed => {
                log::debug!("(SM) ignoring {} as pairing failed", pdu.command_type());

                Ok(())
            }
            Pdu::PairingResponse(response) => self.on_pairing_response(response),
            Pdu::PairingPublicKey(key) => self.on_public_key(key),
            Pdu::PairingConfirm(confirm) => match (self.cb.phase, self.cb.is_secure_connection) {
                (Phase::Authentication, false) => self.on_legacy_confirm(confirm.get_value()),
                (Phase::Authentication, true) => self.on_sc_confirm(confirm.get_value()),
                _ => Err(self.unexpected(CommandType::PairingConfirm, None)),
            },
            Pdu::PairingRandom(random) => match (self.cb.phase, self.cb.is_secure_connection) {
                (Phase::Authentication, false) => self.on_legacy_random(random.get_value()),
                (Phase::Authentication, true) => self.on_sc_random(random.get_value()),
                _ => Err(self.unexpected(CommandType::PairingRandom, None)),
            },
            Pdu::PairingDHKeyCheck(check) if self.cb.is_secure_connection => self.on_dh_key_check(check.get_value()),
            Pdu::PairingDHKeyCheck(_) => Err(self.unexpected(CommandType::PairingDHKeyCheck, None)),
            Pdu::PairingKeyPressNotification(notification) => {
                if self.cb.phase == Phase::Authentication && matches!(self.cb.method, PairingMethod::PassKeyEntry(_)) {
                    let handle = self.cb.handle;

                    self.emit(SecurityManagerEvent::KeypressNotification { handle, notification });

                    Ok(())
                } else {
                    Err(self.unexpected(CommandType::PairingKeyPressNotification, None))
                }
            }
            Pdu::EncryptionInformation(_)
            | Pdu::MasterIdentification(_)
            | Pdu::IdentityInformation(_)
            | Pdu::IdentityAddressInformation(_)
            | Pdu::SigningInformation(_) => self.on_key_pdu(pdu),
        }
    }

    fn on_pairing_request(&mut self, request: PairingFeatures) -> Step {
        if self.cb.is_initiator() || self.cb.phase.is_pairing() {
            return Err(self.unexpected(CommandType::PairingRequest, None));
        }

        self.cb.reset();

        let response = self.local_features(Some(&request));

        self.cb.preq = Some(request);
        self.cb.pres = Some(response);

        self.negotiate()?;

        self.send(Pdu::PairingResponse(response));

        self.begin_authentication()
    }

    fn on_pairing_response(&mut self, response: PairingFeatures) -> Step {
        if !self.cb.is_initiator() || self.cb.phase != Phase::FeatureExchange {
            return Err(self.unexpected(CommandType::PairingResponse, None));
        }

        self.cb.pres = Some(response);

        self.negotiate()?;

        self.begin_authentication()
    }

    fn on_security_request(&mut self, request: SecurityRequest) -> Step {
        if !self.cb.is_initiator() {
            return Err(self.unexpected(CommandType::SecurityRequest, None));
        }

        if self.cb.phase.is_pairing() {
            log::debug!("(SM) ignoring security request as pairing is in progress");

            return Ok(());
        }

        let handle = self.cb.handle;

        self.emit(SecurityManagerEvent::SecurityRequested {
            handle,
            auth_req: request.get_auth_req(),
        });

        Ok(())
    }

    /// Check if this device displays the passkey
    pub(crate) fn displays_passkey(&self, direction: PasskeyDirection) -> bool {
        match direction {
            PasskeyDirection::ResponderDisplaysInitiatorInputs => !self.cb.is_initiator(),
            PasskeyDirection::InitiatorDisplaysResponderInputs => self.cb.is_initiator(),
            PasskeyDirection::InitiatorAndResponderInput => false,
        }
    }

    /// Generate the passkey or request it from the user
    pub(crate) fn acquire_passkey(&mut self, direction: PasskeyDirection) -> Step {
        if self.displays_passkey(direction) {
            self.request_random(RandEncProcState::GenTk)
        } else {
            let handle = self.cb.handle;

            self.emit(SecurityManagerEvent::PasskeyRequest { handle });

            Ok(())
        }
    }

    fn awaiting_passkey(&self) -> bool {
        match self.cb.method {
            PairingMethod::PassKeyEntry(direction) => {
                self.cb.phase == Phase::Authentication && self.cb.tk.is_none() && !self.displays_passkey(direction)
            }
            _ => false,
        }
    }

    fn awaiting_numeric_comparison(&self) -> bool {
        self.cb.is_secure_connection
            && self.cb.method == PairingMethod::NumbComp
            && self.cb.phase == Phase::Authentication
            && self.cb.peer_nonce.is_some()
            && !self.cb.user_confirmed
    }

    fn on_passkey_octets(&mut self, octets: [u8; 8]) -> Step {
        let passkey = passkey_from_octets(octets);

        self.cb.tk = Some(passkey.into());

        let handle = self.cb.handle;

        self.emit(SecurityManagerEvent::PasskeyDisplay { handle, passkey });

        self.passkey_ready()
    }

    fn passkey_ready(&mut self) -> Step {
        if self.cb.is_secure_connection {
            self.generate_nonce()
        } else {
            self.temporary_key_ready()
        }
    }

    pub(crate) fn start_key_distribution(&mut self) -> Step {
        let is_sc = self.cb.is_secure_connection;

        self.set_phase(Phase::KeyDistribution);

        self.cb.keys.is_authenticated = self.cb.method.is_authenticated();
        self.cb.keys.is_secure_connection = is_sc;
        self.cb.keys.key_size = self.cb.key_size;

        self.cb.local_pending = self.cb.local_keys().distributed(is_sc);
        self.cb.peer_pending = self.cb.peer_keys().distributed(is_sc);

        log::debug!(
            "(SM) sending keys {:?}, receiving keys {:?}",
            self.cb.local_pending,
            self.cb.peer_pending
        );

        self.progress_key_distribution()
    }

    /// Continue key distribution
    ///
    /// The responder distributes its keys first, the initiator distributes after it has received
    /// every key from the responder.
    fn progress_key_distribution(&mut self) -> Step {
        if self.cb.rand_enc_proc_state.is_some() {
            return Ok(());
        }

        let may_send = !self.cb.is_initiator() || self.cb.peer_pending.is_empty();

        if may_send && !self.cb.local_pending.is_empty() {
            self.distribute_next()
        } else if self.cb.local_pending.is_empty() && self.cb.peer_pending.is_empty() {
            self.complete()
        } else {
            Ok(())
        }
    }

    fn distribute_next(&mut self) -> Step {
        let pending = self.cb.local_pending;

        if pending.contains(KeyDistributions::ENC_KEY) {
            self.request_random(RandEncProcState::GenDivLtk)
        } else if pending.contains(KeyDistributions::ID_KEY) {
            let identity = self.settings.identity.ok_or(UNSPECIFIED)?;

            self.send(Pdu::IdentityInformation(IdentityInformation::new(identity.irk)));
            self.send(Pdu::IdentityAddressInformation(IdentityAddressInformation::new(
                identity.address,
            )));

            self.cb.keys.irk = Some(identity.irk);
            self.cb.keys.identity = Some(identity.address);

            self.cb.local_pending.remove(KeyDistributions::ID_KEY);

            self.progress_key_distribution()
        } else if pending.contains(KeyDistributions::SIGN_KEY) {
            self.request_random(RandEncProcState::GenDivCsrk)
        } else {
            Ok(())
        }
    }

    fn on_ltk_div(&mut self, octets: [u8; 8]) -> Step {
        self.cb.div = <u16>::from_le_bytes([octets[0], octets[1]]);

        let er = self.settings.root_keys.er;
        let div = <u128>::from(self.cb.div);

        self.encrypt(EncryptStep::Ltk, er, div)
    }

    fn on_ltk_generated(&mut self, value: u128) -> Step {
        self.cb.keys.ltk = Some(LongTermKey {
            ltk: self.cb.mask_key(value),
            ediv: 0,
            rand: 0,
        });

        self.request_random(RandEncProcState::GenRandV)
    }

    fn on_ltk_rand(&mut self, octets: [u8; 8]) -> Step {
        let rand = <u64>::from_le_bytes(octets);

        let ltk = self.cb.keys.ltk.as_mut().ok_or(UNSPECIFIED)?;

        ltk.rand = rand;

        let dhk = self.settings.root_keys.dhk;

        self.encrypt(EncryptStep::Ediv, dhk, rand.into())
    }

    fn on_ediv_generated(&mut self, y: u128) -> Step {
        let ediv = self.cb.div ^ (y as u16);

        let ltk = self.cb.keys.ltk.as_mut().ok_or(UNSPECIFIED)?;

        ltk.ediv = ediv;

        let ltk = *ltk;

        self.key_ready(KeyType::Ltk(ltk));

        self.send(Pdu::EncryptionInformation(EncryptionInformation::new(ltk.ltk)));
        self.send(Pdu::MasterIdentification(MasterIdentification::new(ltk.ediv, ltk.rand)));

        self.cb.local_pending.remove(KeyDistributions::ENC_KEY);

        self.progress_key_distribution()
    }

    fn on_csrk_div(&mut self, octets: [u8; 8]) -> Step {
        let div = <u128>::from(<u16>::from_le_bytes([octets[0], octets[1]]));

        let er = self.settings.root_keys.er;

        self.encrypt(EncryptStep::Csrk, er, div | 1 << 16)
    }

    fn on_csrk_generated(&mut self, csrk: u128) -> Step {
        self.cb.keys.csrk = Some(csrk);

        self.key_ready(KeyType::Csrk(csrk));

        self.send(Pdu::SigningInformation(SigningInformation::new(csrk)));

        self.cb.local_pending.remove(KeyDistributions::SIGN_KEY);

        self.progress_key_distribution()
    }

    /// The key PDU expected next from the peer
    fn expected_key_pdu(&self) -> Option<CommandType> {
        let pending = self.cb.peer_pending;

        if pending.contains(KeyDistributions::ENC_KEY) {
            if self.cb.keys.peer_ltk.is_none() {
                Some(CommandType::EncryptionInformation)
            } else {
                Some(CommandType::MasterIdentification)
            }
        } else if pending.contains(KeyDistributions::ID_KEY) {
            if self.cb.keys.peer_irk.is_none() {
                Some(CommandType::IdentityInformation)
            } else {
                Some(CommandType::IdentityAddressInformation)
            }
        } else if pending.contains(KeyDistributions::SIGN_KEY) {
            Some(CommandType::SigningInformation)
        } else {
            None
        }
    }

    fn on_key_pdu(&mut self, pdu: Pdu) -> Step {
        let expected = self.expected_key_pdu();

        if self.cb.phase != Phase::KeyDistribution || expected != Some(pdu.command_type()) {
            return Err(self.unexpected(pdu.command_type(), expected));
        }

        match pdu {
            Pdu::EncryptionInformation(info) => {
                log::trace!("(SM) peer LTK: {:x}", info.get_long_term_key());

                self.cb.keys.peer_ltk = Some(LongTermKey {
                    ltk: info.get_long_term_key(),
                    ediv: 0,
                    rand: 0,
                });
            }
            Pdu::MasterIdentification(id) => {
                if let Some(ltk) = self.cb.keys.peer_ltk.as_mut() {
                    ltk.ediv = id.get_ediv();
                    ltk.rand = id.get_rand();
                }

                self.cb.peer_pending.remove(KeyDistributions::ENC_KEY);
            }
            Pdu::IdentityInformation(info) => {
                log::trace!("(SM) peer IRK: {:x}", info.get_irk());

                self.cb.keys.peer_irk = Some(info.get_irk());
            }
            Pdu::IdentityAddressInformation(info) => {
                self.cb.keys.peer_identity = Some(info.get_address());

                self.cb.peer_pending.remove(KeyDistributions::ID_KEY);
            }
            Pdu::SigningInformation(info) => {
                log::trace!("(SM) peer CSRK: {:x}", info.get_csrk());

                self.cb.keys.peer_csrk = Some(info.get_csrk());

                self.cb.peer_pending.remove(KeyDistributions::SIGN_KEY);
            }
            _ => return Err(self.unexpected(pdu.command_type(), expected)),
        }

        self.progress_key_distribution()
    }

    fn complete(&mut self) -> Step {
        if self.cb.is_secure_connection
            && self.cb.initiator_keys.contains(KeyDistributions::LINK_KEY)
            && self.cb.responder_keys.contains(KeyDistributions::LINK_KEY)
        {
            self.derive_link_key();
        }

        self.set_phase(Phase::Complete);

        log::info!("(SM) pairing with {} complete", self.cb.handle);

        let handle = self.cb.handle;
        let keys = self.cb.keys;

        self.emit(SecurityManagerEvent::AuthComplete {
            handle,
            result: Ok(keys),
        });

        Ok(())
    }

    fn derive_link_key(&mut self) {
        let peer_is_public = match self.cb.keys.peer_identity {
            Some(identity) => identity.is_public(),
            None => !self.cb.info.peer_is_random,
        };

        match self.cb.keys.ltk {
            Some(ltk) if peer_is_public => {
                let link_key = toolbox::link_key_from_ltk(ltk.ltk);

                self.cb.keys.link_key = Some(link_key);

                self.key_ready(KeyType::LinkKey(link_key));
            }
            _ => log::warn!("(SM) not deriving a link key as the peer has no public identity address"),
        }
    }
}
