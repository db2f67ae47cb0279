//! AES-256 in CBC, CTR and GCM modes (spec §4.3).

use aes::Aes256;
use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace},
    Aes256Gcm, KeyInit as GcmKeyInit, Nonce as GcmNonce,
};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ctr::cipher::{KeyIvInit as CtrKeyIvInit, StreamCipher, StreamCipherSeek};

use super::CryptoError;

type CbcEnc = cbc::Encryptor<Aes256>;
type CbcDec = cbc::Decryptor<Aes256>;
type Ctr128 = ctr::Ctr128BE<Aes256>;

/// AES-256-CBC encrypt. `data` must already be a multiple of 16 bytes
/// (callers pad with [`super::pkcs7_pad`] first); this mirrors the
/// primitives contract, which keeps padding a separate operation from the
/// cipher itself.
pub fn aes_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % 16 != 0 {
        return Err(CryptoError);
    }
    let mut buf = data.to_vec();
    let enc = CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    enc.encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
        .map_err(|_| CryptoError)?;
    Ok(buf)
}

/// AES-256-CBC decrypt. Returns the still-padded plaintext; callers strip
/// padding with [`super::pkcs7_unpad`].
pub fn aes_cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(CryptoError);
    }
    let mut buf = data.to_vec();
    let dec = CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    dec.decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError)?;
    Ok(buf)
}

/// AES-256-CTR, streaming: `nonce_counter` is the 16-byte initial counter
/// block, `offset` is the keystream position to seek to before processing
/// `data` (spec: "offset and stream block carried between calls"). Returns
/// the transformed bytes; the caller tracks `offset += data.len()` for the
/// next call.
pub fn aes_ctr(
    key: &[u8; 32],
    nonce_counter: &[u8; 16],
    offset: u64,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut cipher = Ctr128::new(GenericArray::from_slice(key), GenericArray::from_slice(nonce_counter));
    cipher.try_seek(offset).map_err(|_| CryptoError)?;
    let mut buf = data.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

/// AES-256-GCM encrypt. Returns `(ciphertext, tag)`.
pub fn aes_gcm_encrypt(
    key: &[u8; 32],
    iv: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; 16]), CryptoError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GcmNonce::from_slice(iv), aad, &mut buf)
        .map_err(|_| CryptoError)?;
    Ok((buf, tag.into()))
}

/// AES-256-GCM authenticated decrypt. Any single-bit tamper in ciphertext,
/// tag, or AAD causes this to fail.
pub fn aes_gcm_decrypt(
    key: &[u8; 32],
    iv: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; 16],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(GcmNonce::from_slice(iv), aad, &mut buf, GenericArray::from_slice(tag))
        .map_err(|_| CryptoError)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{pkcs7_pad, pkcs7_unpad};

    #[test]
    fn cbc_round_trip() {
        let key = [0x42u8; 32];
        let iv = [0x24u8; 16];
        let plaintext = b"a message that is not block aligned";
        let padded = pkcs7_pad(plaintext, 16);
        let ciphertext = aes_cbc_encrypt(&key, &iv, &padded).unwrap();
        let decrypted = aes_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        let unpadded = pkcs7_unpad(&decrypted, 16).unwrap();
        assert_eq!(unpadded, plaintext);
    }

    #[test]
    fn ctr_round_trip() {
        let key = [0x11u8; 32];
        let nonce = [0x22u8; 16];
        let data = b"streaming ciphertext across multiple calls";
        let ciphertext = aes_ctr(&key, &nonce, 0, data).unwrap();
        let plaintext = aes_ctr(&key, &nonce, 0, &ciphertext).unwrap();
        assert_eq!(plaintext, data);
    }

    #[test]
    fn ctr_offset_matches_streaming() {
        let key = [0x11u8; 32];
        let nonce = [0x22u8; 16];
        let data = b"0123456789abcdef0123456789abcdef";
        let whole = aes_ctr(&key, &nonce, 0, data).unwrap();
        let first = aes_ctr(&key, &nonce, 0, &data[..16]).unwrap();
        let second = aes_ctr(&key, &nonce, 16, &data[16..]).unwrap();
        assert_eq!(whole[..16], first[..]);
        assert_eq!(whole[16..], second[..]);
    }

    #[test]
    fn gcm_round_trip() {
        let key = [0x55u8; 32];
        let iv = [0x66u8; 12];
        let aad = b"header";
        let plaintext = b"secret payload";
        let (ciphertext, tag) = aes_gcm_encrypt(&key, &iv, aad, plaintext).unwrap();
        let decrypted = aes_gcm_decrypt(&key, &iv, aad, &ciphertext, &tag).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn gcm_tamper_detected() {
        let key = [0x55u8; 32];
        let iv = [0x66u8; 12];
        let aad = b"header";
        let plaintext = b"secret payload";
        let (mut ciphertext, tag) = aes_gcm_encrypt(&key, &iv, aad, plaintext).unwrap();
        ciphertext[0] ^= 0x01;
        assert!(aes_gcm_decrypt(&key, &iv, aad, &ciphertext, &tag).is_err());
    }
}
