//! Per connection pairing state

use crate::config::ScOobData;
use crate::encrypt_info::KeyDistributions;
use crate::pairing::{PairingFeatures, PairingMethod};
use crate::toolbox::{DHSharedSecret, PairingAddress, PriKey, PubKey};
use crate::{BluetoothDeviceAddress, ConnectionHandle, Keys};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The role of this device in pairing
///
/// The initiator is the central (master) of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    Initiator,
    Responder,
}

/// Information about a connection needed for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionInfo {
    pub role: Role,
    /// The address this device used to create the connection
    pub local_address: BluetoothDeviceAddress,
    pub local_is_random: bool,
    /// The address the peer device used to create the connection
    pub peer_address: BluetoothDeviceAddress,
    pub peer_is_random: bool,
}

impl ConnectionInfo {
    fn initiator(&self) -> (BluetoothDeviceAddress, bool) {
        match self.role {
            Role::Initiator => (self.local_address, self.local_is_random),
            Role::Responder => (self.peer_address, self.peer_is_random),
        }
    }

    fn responder(&self) -> (BluetoothDeviceAddress, bool) {
        match self.role {
            Role::Initiator => (self.peer_address, self.peer_is_random),
            Role::Responder => (self.local_address, self.local_is_random),
        }
    }

    /// The `ia`, `iat`, `ra`, and `rat` inputs of `c1`
    pub(crate) fn c1_addresses(&self) -> (u128, bool, u128, bool) {
        let to_u128 = |address: BluetoothDeviceAddress| {
            let mut bytes = [0u8; 16];

            bytes[..6].copy_from_slice(&address.0);

            <u128>::from_le_bytes(bytes)
        };

        let (ia, iat) = self.initiator();
        let (ra, rat) = self.responder();

        (to_u128(ia), iat, to_u128(ra), rat)
    }

    /// The `A` and `B` inputs of `f5` and `f6`
    pub(crate) fn pairing_addresses(&self) -> (PairingAddress, PairingAddress) {
        let (a, a_is_random) = self.initiator();
        let (b, b_is_random) = self.responder();

        (PairingAddress::new(&a, a_is_random), PairingAddress::new(&b, b_is_random))
    }
}

/// The phases of pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// The pairing request was sent and the response has not been received
    FeatureExchange,
    /// LE Secure Connections public key exchange
    PublicKeyExchange,
    /// Authentication (stage 1 for LE Secure Connections). For legacy pairing this is the TK,
    /// confirm, random, and STK generation.
    Authentication,
    /// LE Secure Connections DHKey check (authentication stage 2)
    DhKeyCheck,
    /// Waiting for the link to be encrypted with the STK or LTK
    Encryption,
    KeyDistribution,
    Complete,
    Failed,
}

impl Phase {
    /// Check if pairing is in progress
    pub fn is_pairing(self) -> bool {
        !matches!(self, Phase::Idle | Phase::Complete | Phase::Failed)
    }
}

/// The step of an AES-128 encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptStep {
    /// First encryption of `c1` for the local confirm value
    ConfirmP1,
    /// Second encryption of `c1` for the local confirm value
    ConfirmP2,
    /// First encryption of `c1` for checking the confirm value of the peer
    CompareP1,
    /// Second encryption of `c1` for checking the confirm value of the peer
    CompareP2,
    Stk,
    /// `LTK = e(ER, DIV)`
    Ltk,
    /// `Y = e(DHK, Rand)` for creating the EDIV
    Ediv,
    /// `CSRK = e(ER, DIV | 1 << 16)`
    Csrk,
}

/// The asynchronous request that a pairing control block is waiting on
///
/// Only one request is outstanding at a time. When the controller completes the request the
/// state selects the continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandEncProcState {
    /// Random for a passkey (or the TK of legacy passkey entry)
    GenTk,
    /// First half of the legacy pairing random
    GenSrandMrand,
    /// Second half of the legacy pairing random
    GenSrandMrandCont,
    /// DIV for the distributed LTK
    GenDivLtk,
    /// Rand for the distributed LTK
    GenRandV,
    /// DIV for the distributed CSRK
    GenDivCsrk,
    /// Eight octets of the private key, `part` is from zero to three
    GenPrivateKey { part: u8 },
    /// Eight octets of a nonce, `part` is either zero or one
    GenNonce { part: u8 },
    Encrypt(EncryptStep),
}

/// The pairing control block of a connection
pub(crate) struct PairingControlBlock {
    pub(crate) handle: ConnectionHandle,
    pub(crate) info: ConnectionInfo,
    pub(crate) phase: Phase,
    pub(crate) rand_enc_proc_state: Option<RandEncProcState>,
    /// Octets received from random requests that are not yet complete values
    pub(crate) rand_octets: [u8; 32],
    pub(crate) preq: Option<PairingFeatures>,
    pub(crate) pres: Option<PairingFeatures>,
    pub(crate) method: PairingMethod,
    pub(crate) is_secure_connection: bool,
    pub(crate) key_size: usize,
    pub(crate) initiator_keys: KeyDistributions,
    pub(crate) responder_keys: KeyDistributions,
    /// The TK (legacy) or the passkey (secure connections) as a 128 bit value
    pub(crate) tk: Option<u128>,
    /// Mrand or Srand (legacy), the current nonce (secure connections)
    pub(crate) nonce: Option<u128>,
    pub(crate) peer_nonce: Option<u128>,
    pub(crate) confirm: Option<u128>,
    pub(crate) peer_confirm: Option<u128>,
    pub(crate) confirm_sent: bool,
    pub(crate) nonce_sent: bool,
    /// The STK or the secure connections LTK
    pub(crate) session_key: Option<u128>,
    pub(crate) private_key: Option<PriKey>,
    pub(crate) public_key: Option<PubKey>,
    pub(crate) peer_public_key: Option<PubKey>,
    pub(crate) public_key_sent: bool,
    pub(crate) dh_key: Option<DHSharedSecret>,
    pub(crate) passkey_round: u8,
    pub(crate) peer_oob: Option<ScOobData>,
    pub(crate) mac_key: Option<u128>,
    pub(crate) user_confirmed: bool,
    pub(crate) peer_dh_key_check: Option<u128>,
    /// Keys this device has yet to send
    pub(crate) local_pending: KeyDistributions,
    /// Keys expected from the peer
    pub(crate) peer_pending: KeyDistributions,
    pub(crate) div: u16,
    pub(crate) keys: Keys,
}

impl PairingControlBlock {
    pub(crate) fn new(handle: ConnectionHandle, info: ConnectionInfo) -> Self {
        PairingControlBlock {
            handle,
            info,
            phase: Phase::Idle,
            rand_enc_proc_state: None,
            rand_octets: [0; 32],
            preq: None,
            pres: None,
            method: PairingMethod::JustWorks,
            is_secure_connection: false,
            key_size: 16,
            initiator_keys: KeyDistributions::NONE,
            responder_keys: KeyDistributions::NONE,
            tk: None,
            nonce: None,
            peer_nonce: None,
            confirm: None,
            peer_confirm: None,
            confirm_sent: false,
            nonce_sent: false,
            session_key: None,
            private_key: None,
            public_key: None,
            peer_public_key: None,
            public_key_sent: false,
            dh_key: None,
            passkey_round: 0,
            peer_oob: None,
            mac_key: None,
            user_confirmed: false,
            peer_dh_key_check: None,
            local_pending: KeyDistributions::NONE,
            peer_pending: KeyDistributions::NONE,
            div: 0,
            keys: Keys::default(),
        }
    }

    /// Clear the data of a previous pairing attempt
    ///
    /// The connection information and the out of band data of the peer are kept.
    pub(crate) fn reset(&mut self) {
        let peer_oob = self.peer_oob;

        *self = PairingControlBlock::new(self.handle, self.info);

        self.peer_oob = peer_oob;
    }

    pub(crate) fn is_initiator(&self) -> bool {
        self.info.role == Role::Initiator
    }

    /// Keys this device distributes
    pub(crate) fn local_keys(&self) -> KeyDistributions {
        match self.info.role {
            Role::Initiator => self.initiator_keys,
            Role::Responder => self.responder_keys,
        }
    }

    /// Keys the peer distributes
    pub(crate) fn peer_keys(&self) -> KeyDistributions {
        match self.info.role {
            Role::Initiator => self.responder_keys,
            Role::Responder => self.initiator_keys,
        }
    }

    /// Mask a key to the negotiated encryption key size
    pub(crate) fn mask_key(&self, key: u128) -> u128 {
        if self.key_size >= 16 {
            key
        } else {
            key & (u128::MAX >> (8 * (16 - self.key_size)))
        }
    }

    /// The IOcap of the initiator and responder (in that order)
    pub(crate) fn io_caps(&self) -> Option<([u8; 3], [u8; 3])> {
        Some((self.preq?.get_io_cap(), self.pres?.get_io_cap()))
    }
}
