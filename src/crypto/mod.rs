//! Cryptographic primitives contract (spec §4.3).
//!
//! Every operation the protocol core needs — hashing, HMAC, AES in three
//! modes, PKCS#7 padding, X25519 ECDH, and a CSPRNG — lives here behind a
//! small set of free functions so the rest of the crate never reaches for a
//! RustCrypto type directly.

pub mod ecdh;
pub mod hash;
pub mod pkcs7;
pub mod random;
pub mod symmetric;

use core::fmt;

/// A cryptographic primitive failed. Per spec §7 this is always fatal to
/// the current message or transaction — never silently recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoError;

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cryptographic operation failed")
    }
}

pub use ecdh::{ClientContext, ServerContext};
pub use hash::{sha1, sha224, sha256, sha384, sha512, HashAlg};
pub use pkcs7::{pkcs7_pad, pkcs7_unpad};
pub use random::{random_array, random_bytes};
pub use symmetric::{aes_cbc_decrypt, aes_cbc_encrypt, aes_ctr, aes_gcm_decrypt, aes_gcm_encrypt};

/// `hmac(alg, key, msg)` — keyed MAC (spec §4.3). Only SHA-256 HMAC is used
/// by the protocol itself (auth tags, status-check proofs); the `alg`
/// parameter is retained for parity with the primitives contract and to let
/// callers assert at compile time which hash they mean.
pub fn hmac(alg: HashAlg, key: &[u8], msg: &[u8]) -> Result<[u8; 32], CryptoError> {
    match alg {
        HashAlg::Sha256 => Ok(hmac_sha256(key, msg)),
        _ => Err(CryptoError),
    }
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_is_deterministic() {
        let key = [0x11u8; 32];
        let msg = b"frame prefix + payload";
        let a = hmac(HashAlg::Sha256, &key, msg).unwrap();
        let b = hmac(HashAlg::Sha256, &key, msg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hmac_sha256_is_sensitive_to_key() {
        let msg = b"same message";
        let a = hmac(HashAlg::Sha256, &[0x11u8; 32], msg).unwrap();
        let b = hmac(HashAlg::Sha256, &[0x22u8; 32], msg).unwrap();
        assert_ne!(a, b);
    }
}
