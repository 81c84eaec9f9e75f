//! Cryptographic primitives
//!
//! These are the host side implementations of the security function `e` (AES-128), AES-CMAC, the
//! random address hash function `ah`, and the P-256 elliptic curve operations used by LE Secure
//! Connections. Every 128 bit value in this module is big-endian, so the most significant octet
//! of a `u128` is the first octet fed to the cipher.

use rand_core::{CryptoRng, RngCore};

pub type PubKey = p256::PublicKey;

pub type PriKey = p256::SecretKey;

/// The x-coordinate of the shared point
pub type DHSharedSecret = [u8; 32];

/// The random address hash function `ah`
///
/// This creates and checks the hash part of a resolvable private address. The random part `r` is
/// zero padded to 128 bits and encrypted with the identity resolving key `k`, the hash is the
/// lowest 24 bits of the result.
///
/// Octets within `r` and the returned hash are in the order they appear within a resolvable
/// private address (least significant first).
pub fn ah(k: u128, r: [u8; 3]) -> [u8; 3] {
    let r_padded = <u128>::from(r[0]) | <u128>::from(r[1]) << 8 | <u128>::from(r[2]) << 16;

    let cypher_text = e(k, r_padded);

    [cypher_text as u8, (cypher_text >> 8) as u8, (cypher_text >> 16) as u8]
}

/// The security function `e`
///
/// Encrypts a single 128 bit block of `plain_text` with `key` using AES-128
/// ([FIPS-197](https://en.wikipedia.org/wiki/FIPS_197)). The encryption is done by the host,
/// the controller's *LE Encrypt* command is not used.
///
/// # Note
/// A new cipher is initialized on every call. This is fine for the handful of blocks encrypted
/// by pairing and address resolution, it is not meant for encrypting a data stream.
pub fn e(key: u128, plain_text: u128) -> u128 {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    let key_bytes = key.to_be_bytes();

    let cipher = aes::Aes128::new(GenericArray::from_slice(&key_bytes));

    let mut block = plain_text.to_be_bytes();

    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    <u128>::from_be_bytes(block)
}

/// Generate the AES-CMAC subkeys `K1` and `K2` from `k`
///
/// See section 2.3 of [RFC 4493](https://datatracker.ietf.org/doc/rfc4493).
fn aes_cmac_subkey_gen(k: u128) -> (u128, u128) {
    const RB: u128 = 0x87;

    let l = e(k, 0);

    let k1 = if (l & (1 << 127)) == 0 { l << 1 } else { (l << 1) ^ RB };

    let k2 = if (k1 & (1 << 127)) == 0 {
        k1 << 1
    } else {
        (k1 << 1) ^ RB
    };

    (k1, k2)
}

fn aes_cmac_padding(r: &[u8]) -> u128 {
    let unpad = r
        .iter()
        .enumerate()
        .fold(0u128, |p, (i, v)| p | (<u128>::from(*v) << (8 * (15 - i))));

    unpad | (1 << (127 - (8 * r.len())))
}

fn to_u128_be(chunk: &[u8]) -> u128 {
    let mut c = [0u8; 16];

    c.copy_from_slice(chunk);

    <u128>::from_be_bytes(c)
}

/// Generate an AES-CMAC
///
/// This is the AES-CMAC algorithm from RFC 4493 with a 128 bit tag.
pub fn aes_cmac_generate(key: u128, msg: &[u8]) -> u128 {
    const CHUNK_SIZE: usize = 16;

    let (k1, k2) = aes_cmac_subkey_gen(key);

    // the last block is always processed separately, even when it is complete
    let last_start = match msg.len() {
        0 => 0,
        len if len % CHUNK_SIZE == 0 => len - CHUNK_SIZE,
        len => len - len % CHUNK_SIZE,
    };

    let x = msg[..last_start]
        .chunks_exact(CHUNK_SIZE)
        .fold(0u128, |x, chunk| e(key, x ^ to_u128_be(chunk)));

    let last = &msg[last_start..];

    let y = if last.len() == CHUNK_SIZE {
        to_u128_be(last) ^ k1 ^ x
    } else {
        aes_cmac_padding(last) ^ k2 ^ x
    };

    e(key, y)
}

pub fn aes_cmac_verify(key: u128, msg: &[u8], auth_code: u128) -> bool {
    auth_code == aes_cmac_generate(key, msg)
}

/// Create a private key from 32 random octets
///
/// The octets are interpreted as a big-endian scalar. `None` is returned when the scalar is zero
/// or not less than the order of the curve.
pub fn private_key_from_bytes(bytes: &[u8; 32]) -> Option<PriKey> {
    PriKey::from_be_bytes(bytes).ok()
}

/// Get the public key of a private key
pub fn public_key(private_key: &PriKey) -> PubKey {
    private_key.public_key()
}

/// Get the big-endian x and y coordinates of a public key
pub fn public_key_coordinates(public_key: &PubKey) -> ([u8; 32], [u8; 32]) {
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    let encoded = public_key.to_encoded_point(false);

    // an uncompressed point is 0x04 || x || y
    let bytes = encoded.as_bytes();

    let mut x = [0u8; 32];
    let mut y = [0u8; 32];

    x.copy_from_slice(&bytes[1..33]);
    y.copy_from_slice(&bytes[33..65]);

    (x, y)
}

/// Create a public key from its big-endian coordinates
///
/// `None` is returned if the point is not on the curve.
pub fn public_key_from_coordinates(x: &[u8; 32], y: &[u8; 32]) -> Option<PubKey> {
    let mut sec1 = [0u8; 65];

    sec1[0] = 0x04;
    sec1[1..33].copy_from_slice(x);
    sec1[33..].copy_from_slice(y);

    PubKey::from_sec1_bytes(&sec1).ok()
}

#[cfg(feature = "sys-rand")]
pub fn ecc_gen() -> (PriKey, PubKey) {
    ecc_gen_with(rand_core::OsRng)
}

pub fn ecc_gen_with(mut rand: impl CryptoRng + RngCore) -> (PriKey, PubKey) {
    let secret = PriKey::random(&mut rand);

    let public_key = secret.public_key();

    (secret, public_key)
}

/// Calculate the Diffie-Hellman shared secret
pub fn ecdh(this_private_key: &PriKey, peer_public_key: &PubKey) -> DHSharedSecret {
    let shared_secret = p256::ecdh::diffie_hellman(this_private_key.to_nonzero_scalar(), peer_public_key.as_affine());

    let mut raw_secret_bytes = DHSharedSecret::default();

    raw_secret_bytes.copy_from_slice(shared_secret.raw_secret_bytes().as_slice());

    raw_secret_bytes
}

#[cfg(feature = "sys-rand")]
pub fn rand_u128() -> u128 {
    use rand_core::OsRng;

    let mut bytes = [0u8; 16];

    OsRng.fill_bytes(&mut bytes);

    <u128>::from_ne_bytes(bytes)
}
