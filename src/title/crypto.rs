// title/crypto.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements the common crypto functions required to handle CTR content
// encryption and signature verification.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use byteorder::{BigEndian, ByteOrder};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

pub type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
pub type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

// KeyX for slot 0x2C (retail, from boot9) and the fixed key used by
// fixed-crypto system titles, shared across the CTR ecosystem like the
// common keys.
pub(crate) const NCCH_KEY_X: u128 = 0xB98E95CECA3E4D171F76A94DE934C053;
pub(crate) const FIXED_SYSTEM_KEY: u128 = 0x527CE630A9CA305F3696F3CDE954194B;
const KEY_SCRAMBLER_C: u128 = 0x1FF9E9AAC5FE0408024591DC5D52768A;

/// The CTR key scrambler: normal_key = ror128((rol128(KeyX, 2) ^ KeyY) + C, 41).
pub(crate) fn scramble(key_x: u128, key_y: u128) -> [u8; 16] {
    (key_x.rotate_left(2) ^ key_y)
        .wrapping_add(KEY_SCRAMBLER_C)
        .rotate_right(41)
        .to_be_bytes()
}

/// Decrypts a title key with the given common key. The IV is the 8-byte
/// big-endian title ID followed by zeroes.
pub fn decrypt_title_key(title_key_enc: [u8; 16], common_key: [u8; 16], title_id: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    BigEndian::write_u64(&mut iv, title_id);
    let mut title_key = title_key_enc;
    Aes128CbcDec::new(&common_key.into(), &iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut title_key)
        .unwrap();
    title_key
}

/// Builds the IV used for a CIA content section: the big-endian content index
/// in the first two bytes, zeroes elsewhere.
pub fn content_iv(index: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    BigEndian::write_u16(&mut iv, index);
    iv
}

/// Computes the SHA-256 digest of the given data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Verifies an RSA-PKCS#1-v1.5 signature over the SHA-256 digest of the
/// signed data. Verification failure is not an error; it feeds the `legit`
/// flag of the owning record.
pub fn verify_signature(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> bool {
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &sha256(data), signature)
        .is_ok()
}
