//! Security Manager configuration
//!
//! A [`SecuritySettings`] is given to the [`SecurityManager`](crate::SecurityManager) when it is
//! created. It is the same for every connection of the local radio.

use crate::encrypt_info::{AuthRequirements, KeyDistributions};
use crate::pairing::IoCapability;
use crate::{toolbox, IdentityAddress};
use rand_core::{CryptoRng, RngCore};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where the AES-128 block cipher of legacy pairing is computed
///
/// The AES-CMAC based functions of LE Secure Connections are always computed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AesSource {
    #[default]
    Host,
    /// Use the *LE Encrypt* command of the controller
    Controller,
}

/// The root keys used for generating the keys distributed by legacy pairing
///
/// These are the Encryption Root (ER) and Diversifier Hash Key (DHK). They are secrets of the
/// local device and must be the same every time the host starts, otherwise previously distributed
/// LTKs and CSRKs cannot be regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RootKeys {
    pub er: u128,
    pub dhk: u128,
}

/// The identity of this device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalIdentity {
    pub irk: u128,
    pub address: IdentityAddress,
}

/// LE Secure Connections out of band data
///
/// This is the random value `r` and the confirm value `C` that is transferred between the two
/// devices over the out of band channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScOobData {
    pub random: u128,
    pub confirm: u128,
}

/// The local key pair and random used for LE Secure Connections out of band pairing
///
/// When this is part of the settings the key pair is used for every secure connections pairing
/// instead of generating a new key pair.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalOobData {
    private_key: [u8; 32],
    random: u128,
}

impl LocalOobData {
    /// Generate the local out of band data
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut private_key = [0u8; 32];

        loop {
            rng.fill_bytes(&mut private_key);

            if toolbox::private_key_from_bytes(&private_key).is_some() {
                break;
            }
        }

        let mut random = [0u8; 16];

        rng.fill_bytes(&mut random);

        LocalOobData {
            private_key,
            random: <u128>::from_le_bytes(random),
        }
    }

    /// Create from a big-endian private key and a random
    ///
    /// `None` is returned if `private_key` is not a valid P-256 private key.
    pub fn new(private_key: [u8; 32], random: u128) -> Option<Self> {
        toolbox::private_key_from_bytes(&private_key).map(|_| LocalOobData { private_key, random })
    }

    pub(crate) fn key_pair(&self) -> Option<(toolbox::PriKey, toolbox::PubKey)> {
        let private_key = toolbox::private_key_from_bytes(&self.private_key)?;

        let public_key = toolbox::public_key(&private_key);

        Some((private_key, public_key))
    }

    pub fn get_random(&self) -> u128 {
        self.random
    }

    /// Get the data that is sent to the peer device over the out of band channel
    pub fn to_sc_oob_data(&self) -> Option<ScOobData> {
        let (_, public_key) = self.key_pair()?;

        let x = toolbox::public_key_x(&public_key);

        Some(ScOobData {
            random: self.random,
            confirm: toolbox::f4(x, x, self.random, 0),
        })
    }
}

impl core::fmt::Debug for LocalOobData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalOobData").finish_non_exhaustive()
    }
}

/// Security settings of the local device
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SecuritySettings {
    pub io_capability: IoCapability,
    pub auth_req: AuthRequirements,
    /// The largest encryption key size (in octets) this device supports
    pub max_encryption_key_size: usize,
    /// The smallest negotiated encryption key size this device accepts
    pub min_encryption_key_size: usize,
    /// Keys the initiator distributes
    ///
    /// When this device responds this is intersected with what the initiator requested.
    pub initiator_key_distribution: KeyDistributions,
    /// Keys the responder distributes
    pub responder_key_distribution: KeyDistributions,
    /// Refuse to pair with a device that does not support LE Secure Connections
    pub secure_connections_only: bool,
    pub aes_source: AesSource,
    pub root_keys: RootKeys,
    /// The identity distributed in the key distribution phase
    ///
    /// The identity key is removed from the key distributions of this device when this is `None`.
    pub identity: Option<LocalIdentity>,
    /// The temporary key of legacy out of band pairing
    pub legacy_oob_tk: Option<u128>,
    /// The out of band data of this device for LE Secure Connections
    pub local_oob: Option<LocalOobData>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        SecuritySettings {
            io_capability: IoCapability::NoInputNoOutput,
            auth_req: AuthRequirements::BONDING | AuthRequirements::SC,
            max_encryption_key_size: 16,
            min_encryption_key_size: 7,
            initiator_key_distribution: KeyDistributions::ENC_KEY | KeyDistributions::ID_KEY,
            responder_key_distribution: KeyDistributions::ENC_KEY | KeyDistributions::ID_KEY,
            secure_connections_only: false,
            aes_source: AesSource::Host,
            root_keys: RootKeys::default(),
            identity: None,
            legacy_oob_tk: None,
            local_oob: None,
        }
    }
}

impl SecuritySettings {
    /// Get the keys this device is able to distribute from `requested`
    pub(crate) fn distributable(&self, requested: KeyDistributions) -> KeyDistributions {
        let mut keys = requested;

        if self.identity.is_none() {
            keys.remove(KeyDistributions::ID_KEY);
        }

        keys
    }
}
