//! Two Security Managers connected back to back
//!
//! PDUs sent by one Security Manager are delivered straight to the other. The controller
//! requests of each are completed by a [`LoopbackController`] that uses a seeded random number
//! generator so every test run pairs with the same values.

use le_host_core::errors::Error as HciError;
use le_host_core::{BluetoothDeviceAddress, ConnectionHandle};
use le_host_sm::pairing::PairingFailedReason;
use le_host_sm::{
    toolbox, CommandType, ConnectionInfo, Error, KeyType, Keys, Pdu, Role, SecurityManager, SecurityManagerEvent,
    SecuritySettings, SmController,
};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::VecDeque;

/// The address of the initiator
pub const INITIATOR_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1]);

/// The address of the responder
pub const RESPONDER_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0xB6, 0xB5, 0xB4, 0xB3, 0xB2, 0xC1]);

/// A request made by the Security Manager to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Random,
    Encrypt { key: u128, plain_text: u128 },
}

/// A controller that completes requests from a seeded random number generator and a software AES
pub struct LoopbackController {
    rng: ChaCha20Rng,
    pub pending: VecDeque<Request>,
    /// Reject every request with this error
    pub reject: Option<HciError>,
    /// Complete every request with this status
    pub status: HciError,
    pub requests: usize,
}

impl LoopbackController {
    pub fn new(seed: u64) -> Self {
        LoopbackController {
            rng: ChaCha20Rng::seed_from_u64(seed),
            pending: VecDeque::new(),
            reject: None,
            status: HciError::NoError,
            requests: 0,
        }
    }

    fn push(&mut self, request: Request) -> Result<(), HciError> {
        if let Some(e) = self.reject {
            return Err(e);
        }

        self.requests += 1;

        self.pending.push_back(request);

        Ok(())
    }

    fn random(&mut self) -> [u8; 8] {
        let mut octets = [0u8; 8];

        self.rng.fill_bytes(&mut octets);

        octets
    }
}

impl SmController for LoopbackController {
    fn request_random(&mut self, _: ConnectionHandle) -> Result<(), HciError> {
        self.push(Request::Random)
    }

    fn request_encrypt(&mut self, _: ConnectionHandle, key: u128, plain_text: u128) -> Result<(), HciError> {
        self.push(Request::Encrypt { key, plain_text })
    }
}

/// One end of the pairing
pub struct Device {
    pub sm: SecurityManager<LoopbackController>,
    /// Every event except for the PDUs sent
    pub events: Vec<SecurityManagerEvent>,
    pub sent: Vec<Pdu>,
    /// Errors returned by the Security Manager
    pub errors: Vec<Error>,
    /// The passkey the user enters when asked for one
    ///
    /// When this is `None` the passkey displayed by the peer is entered.
    pub passkey_input: Option<u32>,
    pub accept_numeric_comparison: bool,
    awaiting_passkey: bool,
    displayed_passkey: Option<u32>,
}

impl Device {
    fn new(settings: SecuritySettings, seed: u64) -> Self {
        Device {
            sm: SecurityManager::new(LoopbackController::new(seed), settings),
            events: Vec::new(),
            sent: Vec::new(),
            errors: Vec::new(),
            passkey_input: None,
            accept_numeric_comparison: true,
            awaiting_passkey: false,
            displayed_passkey: None,
        }
    }

    /// Get the result of pairing
    pub fn auth_complete(&self) -> Option<Result<Keys, PairingFailedReason>> {
        self.events.iter().find_map(|event| match event {
            SecurityManagerEvent::AuthComplete { result, .. } => Some(*result),
            _ => None,
        })
    }

    /// Get the keys of a successful pairing
    ///
    /// # Panic
    /// This panics if pairing did not complete successfully
    pub fn keys(&self) -> Keys {
        match self.auth_complete() {
            Some(Ok(keys)) => keys,
            result => panic!("pairing did not succeed: {:?}", result),
        }
    }

    pub fn keys_ready(&self) -> Vec<KeyType> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SecurityManagerEvent::KeyReady { key, .. } => Some(*key),
                _ => None,
            })
            .collect()
    }

    pub fn sent_count(&self, command: CommandType) -> usize {
        self.sent.iter().filter(|pdu| pdu.command_type() == command).count()
    }

    pub fn numeric_comparison_value(&self) -> Option<u32> {
        self.events.iter().find_map(|event| match event {
            SecurityManagerEvent::NumericComparison { value, .. } => Some(*value),
            _ => None,
        })
    }

    pub fn displayed_passkey(&self) -> Option<u32> {
        self.displayed_passkey
    }
}

type Intercept = Box<dyn FnMut(Role, &mut Vec<u8>)>;

/// Pair two Security Managers
pub struct PairingHarness {
    pub handle: ConnectionHandle,
    pub initiator: Device,
    pub responder: Device,
    intercept: Option<Intercept>,
}

impl PairingHarness {
    /// Create the harness, both devices use public addresses
    pub fn new(initiator: SecuritySettings, responder: SecuritySettings) -> Self {
        crate::init_logging();

        let mut harness = PairingHarness {
            handle: ConnectionHandle::try_new(0x40).unwrap(),
            initiator: Device::new(initiator, 1),
            responder: Device::new(responder, 2),
            intercept: None,
        };

        harness.connect(false, false);

        harness
    }

    /// Recreate the connection with the given address types
    pub fn connect(&mut self, initiator_is_random: bool, responder_is_random: bool) {
        self.initiator.sm.on_connect(
            self.handle,
            ConnectionInfo {
                role: Role::Initiator,
                local_address: INITIATOR_ADDRESS,
                local_is_random: initiator_is_random,
                peer_address: RESPONDER_ADDRESS,
                peer_is_random: responder_is_random,
            },
        );

        self.responder.sm.on_connect(
            self.handle,
            ConnectionInfo {
                role: Role::Responder,
                local_address: RESPONDER_ADDRESS,
                local_is_random: responder_is_random,
                peer_address: INITIATOR_ADDRESS,
                peer_is_random: initiator_is_random,
            },
        );
    }

    /// Modify the bytes of PDUs before they are delivered
    ///
    /// The role is the role of the sender.
    pub fn set_intercept<F>(&mut self, intercept: F)
    where
        F: FnMut(Role, &mut Vec<u8>) + 'static,
    {
        self.intercept = Some(Box::new(intercept))
    }

    /// Start pairing from the initiator and run it until neither device has anything left to do
    pub fn pair(&mut self) {
        self.initiator
            .sm
            .start_pairing(self.handle)
            .expect("failed to start pairing");

        self.run()
    }

    /// Run until neither device has anything left to do
    pub fn run(&mut self) {
        for _ in 0..10_000 {
            let initiator = Self::step(
                self.handle,
                Role::Initiator,
                &mut self.initiator,
                &mut self.responder,
                &mut self.intercept,
            );

            let responder = Self::step(
                self.handle,
                Role::Responder,
                &mut self.responder,
                &mut self.initiator,
                &mut self.intercept,
            );

            if !initiator && !responder {
                return;
            }
        }

        panic!("pairing never settled");
    }

    fn step(
        handle: ConnectionHandle,
        role: Role,
        this: &mut Device,
        peer: &mut Device,
        intercept: &mut Option<Intercept>,
    ) -> bool {
        let mut progress = false;

        while let Some(event) = this.sm.next_event() {
            progress = true;

            match event {
                SecurityManagerEvent::SendPdu { pdu, .. } => {
                    this.sent.push(pdu);

                    let mut bytes = pdu.into_bytes().expect("invalid PDU").to_vec();

                    if let Some(intercept) = intercept.as_mut() {
                        intercept(role, &mut bytes)
                    }

                    if let Err(e) = peer.sm.on_pdu(handle, &bytes) {
                        peer.errors.push(e)
                    }
                }
                event => {
                    Self::user_and_link(handle, &event, this, peer);

                    this.events.push(event)
                }
            }
        }

        if this.awaiting_passkey {
            if let Some(passkey) = this.passkey_input.or(peer.displayed_passkey) {
                this.awaiting_passkey = false;

                progress = true;

                if let Err(e) = this.sm.passkey_reply(handle, Some(passkey)) {
                    this.errors.push(e)
                }
            }
        }

        let request = this.sm.controller_mut().pending.pop_front();

        if let Some(request) = request {
            progress = true;

            let status = this.sm.controller().status;

            let result = match request {
                Request::Random => {
                    let octets = this.sm.controller_mut().random();

                    this.sm.on_rand_complete(handle, octets, status)
                }
                Request::Encrypt { key, plain_text } => {
                    this.sm.on_encrypt_complete(handle, toolbox::e(key, plain_text), status)
                }
            };

            if let Err(e) = result {
                this.errors.push(e)
            }
        }

        progress
    }

    /// Act as the user and the link layer for an event
    fn user_and_link(handle: ConnectionHandle, event: &SecurityManagerEvent, this: &mut Device, peer: &mut Device) {
        let result = match *event {
            SecurityManagerEvent::PasskeyDisplay { passkey, .. } => {
                this.displayed_passkey = Some(passkey);

                Ok(())
            }
            SecurityManagerEvent::PasskeyRequest { .. } => {
                this.awaiting_passkey = true;

                Ok(())
            }
            SecurityManagerEvent::NumericComparison { .. } => {
                this.sm.numeric_comparison_reply(handle, this.accept_numeric_comparison)
            }
            SecurityManagerEvent::EncryptLink { key, .. } => {
                let encrypted = peer.sm.on_ltk_request(handle, key.rand, key.ediv) == Some(key.ltk);

                this.sm
                    .on_encryption_change(handle, encrypted)
                    .and_then(|_| peer.sm.on_encryption_change(handle, encrypted))
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            this.errors.push(e)
        }
    }
}
