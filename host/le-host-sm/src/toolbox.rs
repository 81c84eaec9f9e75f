//! The Cryptographic Toolbox
//!
//! These are the functions of the Security Manager's cryptographic toolbox (Bluetooth
//! Specification v5.0 | Vol 3, Part H, section 2.2). The names match the names used within the
//! specification.
//!
//! It is generally not needed to use these functions directly as they are tailor made for the
//! pairing process of the [`SecurityManager`](crate::SecurityManager).
//!
//! # Byte Order
//! Array inputs are in big-endian order (the order the values are written within the
//! specification). Values that are transferred over the air in little-endian order are given as
//! `u128`.

pub use le_host_core::cryptography::{
    aes_cmac_generate, aes_cmac_verify, ah, e, ecdh, private_key_from_bytes, public_key, public_key_coordinates,
    public_key_from_coordinates, DHSharedSecret, PriKey, PubKey,
};

/// The largest passkey value (six decimal digits)
pub const MAX_PASSKEY: u32 = 999_999;

/// The key ID `tmp1` used by [`h6`] to convert a LTK into an intermediate key
pub const KEY_ID_TMP1: u32 = 0x746D_7031;

/// The key ID `lebr` used by [`h6`] to convert an intermediate key into a link key
pub const KEY_ID_LEBR: u32 = 0x6C65_6272;

/// The key ID `tmp2` used by [`h6`] to convert a link key into an intermediate key
pub const KEY_ID_TMP2: u32 = 0x746D_7032;

/// The key ID `brle` used by [`h6`] to convert an intermediate key into a LTK
pub const KEY_ID_BRLE: u32 = 0x6272_6C65;

/// Phase 2 (LE legacy) confirm value function
///
/// # Inputs
/// - K: AES key
/// - r: plain text
/// - pres: 7 bytes
/// - preq: 7 bytes
/// - iat: 1 bit, mapped to a boolean
/// - ia: 6 bytes
/// - rat: 1 bit, mapped to a boolean
/// - ra: 6 bytes
///
/// ## Note
/// All inputs are masked down to the size stated above
pub fn c1(k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u128, rat: bool, ra: u128) -> u128 {
    let p1 = c1_p1(pres, preq, iat, rat);

    let p2 = c1_p2(ia, ra);

    e(k, e(k, r ^ p1) ^ p2)
}

/// The `p1` input of [`c1`]
pub(crate) fn c1_p1(pres: u128, preq: u128, iat: bool, rat: bool) -> u128 {
    let iat_p = iat as u128;
    let rat_p = (rat as u128) << 8;

    let pres_m = (0xFF_FFFF_FFFF_FFFF & pres) << (9 * 8);
    let preq_m = (0xFF_FFFF_FFFF_FFFF & preq) << (2 * 8);

    pres_m | preq_m | rat_p | iat_p
}

/// The `p2` input of [`c1`]
pub(crate) fn c1_p2(ia: u128, ra: u128) -> u128 {
    let ia_p = (0xFFFF_FFFF_FFFF & ia) << (6 * 8);
    let ra_p = 0xFFFF_FFFF_FFFF & ra;

    ia_p | ra_p
}

/// Phase 2 (LE legacy) short term key (STK) function
pub fn s1(k: u128, r1: u128, r2: u128) -> u128 {
    e(k, s1_r(r1, r2))
}

/// The plain text input to the encryption function within [`s1`]
pub(crate) fn s1_r(r1: u128, r2: u128) -> u128 {
    let r1_p = (0xFFFF_FFFF_FFFF_FFFF & r1) << 64;
    let r2_p = 0xFFFF_FFFF_FFFF_FFFF & r2;

    r1_p | r2_p
}

/// Phase 2 (LE Secure) confirm value function
///
/// The inputs depend on the association model.
///
/// | Model | u | v | x | z |
/// |-------|---|---|---|---|
/// | Just Works or Numeric Comparison | PKax (PKbx) | PKbx (PKax) | Na (Nb) | 0 |
/// | Out of Band | PKax (PKbx) | PKax (PKbx) | ra (rb) | 0 |
/// | Passkey Entry | PKax (PKbx) | PKbx (PKax) | Nai (Nbi) | rai (rbi) |
///
/// Values in parentheses are for the confirm value of the responding device. `rai` is `0x80`
/// with the least significant bit set to bit *i* of the passkey.
pub fn f4(u: [u8; 32], v: [u8; 32], x: u128, z: u8) -> u128 {
    let mut m = [0u8; 65];

    m[..32].copy_from_slice(&u);

    m[32..64].copy_from_slice(&v);

    m[64] = z;

    aes_cmac_generate(x, &m)
}

/// Phase 2 (LE Secure) long term key (LTK) and MacKey function
///
/// * w:  The shared secret Diffie-Hellman key
/// * n1: The nonce of the initiating device
/// * n2: The nonce of the responding device
/// * a1: The address of the initiating device
/// * a2: The address of the responding device
///
/// The returned value is ( MacKey , LTK )
pub fn f5(w: [u8; 32], n1: u128, n2: u128, a1: PairingAddress, a2: PairingAddress) -> (u128, u128) {
    const SALT: u128 = 0x6C888391_AAF5A538_60370BDB_5A6083BE;

    let key_t = aes_cmac_generate(SALT, &w);

    // 'btle'
    let key_id = [0x62, 0x74, 0x6c, 0x65];

    // 256 bits
    let length = [0x01, 0x00];

    let n1_bytes_be = n1.to_be_bytes();

    let n2_bytes_be = n2.to_be_bytes();

    let calculate = |counter: u8| {
        let mut m = [0u8; 53];

        m[0] = counter;

        m[1..5].copy_from_slice(&key_id);

        m[5..21].copy_from_slice(&n1_bytes_be);

        m[21..37].copy_from_slice(&n2_bytes_be);

        m[37..44].copy_from_slice(&a1.0);

        m[44..51].copy_from_slice(&a2.0);

        m[51..53].copy_from_slice(&length);

        aes_cmac_generate(key_t, &m)
    };

    (calculate(0), calculate(1))
}

/// Phase 2 (LE Secure) check value generator function
///
/// For the check value of the initiating device (*Ea*) the inputs are MacKey, Na, Nb, rb, IOcapA,
/// A, and B. For the check value of the responding device (*Eb*) the inputs are MacKey, Nb, Na, ra,
/// IOcapB, B, and A.
///
/// `r` is zero for Just Works and Numeric Comparison, the passkey for Passkey Entry, and the out
/// of band random value of the peer for Out of Band.
pub fn f6(w: u128, n1: u128, n2: u128, r: u128, io_cap: [u8; 3], a1: PairingAddress, a2: PairingAddress) -> u128 {
    let mut m = [0u8; 65];

    m[0..16].copy_from_slice(&n1.to_be_bytes());
    m[16..32].copy_from_slice(&n2.to_be_bytes());
    m[32..48].copy_from_slice(&r.to_be_bytes());
    m[48..51].copy_from_slice(&io_cap);
    m[51..58].copy_from_slice(&a1.0);
    m[58..65].copy_from_slice(&a2.0);

    aes_cmac_generate(w, &m)
}

/// Phase 2 (LE Secure) numeric comparison value generator function
///
/// * u : PKax - the x-coordinate of the public key of the initiating device
/// * v : PKbx - the x-coordinate of the public key of the responding device
/// * x : Na - the nonce of the initiating device
/// * y : Nb - the nonce of the responding device
///
/// The returned value is the six digit number displayed to the user, it is never larger than
/// [`MAX_PASSKEY`].
pub fn g2(u: [u8; 32], v: [u8; 32], x: u128, y: u128) -> u32 {
    let mut m = [0u8; 80];

    m[0..32].copy_from_slice(&u);
    m[32..64].copy_from_slice(&v);
    m[64..80].copy_from_slice(&y.to_be_bytes());

    (aes_cmac_generate(x, &m) as u32) % (MAX_PASSKEY + 1)
}

/// Link key conversion function
pub fn h6(w: u128, key_id: u32) -> u128 {
    aes_cmac_generate(w, &key_id.to_be_bytes())
}

/// Derive the BR/EDR link key from a LE Secure Connections LTK
pub fn link_key_from_ltk(ltk: u128) -> u128 {
    h6(h6(ltk, KEY_ID_TMP1), KEY_ID_LEBR)
}

/// Derive a LE Secure Connections LTK from a BR/EDR link key
pub fn ltk_from_link_key(link_key: u128) -> u128 {
    h6(h6(link_key, KEY_ID_TMP2), KEY_ID_BRLE)
}

/// Create the 64 byte public key field of a *pairing public key* PDU
///
/// The x and y coordinates are each in little-endian order.
pub fn public_key_into_wire(key: &PubKey) -> [u8; 64] {
    let (x, y) = public_key_coordinates(key);

    let mut ret = [0u8; 64];

    ret[..32].copy_from_slice(&x);
    ret[32..].copy_from_slice(&y);

    ret[..32].reverse();
    ret[32..].reverse();

    ret
}

/// Create a public key from the 64 byte field of a *pairing public key* PDU
///
/// `None` is returned if the coordinates are not a point on the P-256 curve.
pub fn public_key_from_wire(wire: &[u8; 64]) -> Option<PubKey> {
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];

    x.copy_from_slice(&wire[..32]);
    y.copy_from_slice(&wire[32..]);

    x.reverse();
    y.reverse();

    public_key_from_coordinates(&x, &y)
}

/// Get the big-endian x coordinate of a public key
pub fn public_key_x(key: &PubKey) -> [u8; 32] {
    public_key_coordinates(key).0
}

/// A structure used to create the address structures used in pairing function [`f5`] and [`f6`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairingAddress([u8; 7]);

impl PairingAddress {
    pub fn new(addr: &crate::BluetoothDeviceAddress, is_random_address: bool) -> Self {
        let init_byte: u8 = if is_random_address { 1 } else { 0 };

        let mut p_addr = [0, 0, 0, 0, 0, 0, init_byte];

        p_addr[..6].copy_from_slice(&addr.0);

        // the address type octet is the most significant
        p_addr.reverse();

        PairingAddress(p_addr)
    }
}
