//! PKCS#7 padding (spec §4.3).

use super::CryptoError;

/// Pad `data` to a multiple of `block` bytes (1..=255). Always appends at
/// least one byte of padding, even when `data.len()` is already aligned —
/// standard PKCS#7 behavior, required so `pkcs7_unpad` can always find and
/// strip a padding run unambiguously.
pub fn pkcs7_pad(data: &[u8], block: usize) -> Vec<u8> {
    debug_assert!((1..=255).contains(&block));
    let pad_len = block - (data.len() % block);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(data.len() + pad_len, pad_len as u8);
    out
}

/// Strip PKCS#7 padding, validating every padding byte equals the padding
/// length (spec §4.4 `DECRYPT_FAIL` on unpad failure).
pub fn pkcs7_unpad(data: &[u8], block: usize) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % block != 0 {
        return Err(CryptoError);
    }
    let pad_len = *data.last().ok_or(CryptoError)? as usize;
    if pad_len == 0 || pad_len > block || pad_len > data.len() {
        return Err(CryptoError);
    }
    let boundary = data.len() - pad_len;
    if !data[boundary..].iter().all(|&b| b as usize == pad_len) {
        return Err(CryptoError);
    }
    Ok(data[..boundary].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_then_unpad_is_identity_for_empty() {
        let data: &[u8] = b"";
        let padded = pkcs7_pad(data, 16);
        assert_eq!(pkcs7_unpad(&padded, 16).unwrap(), data);
    }

    #[test]
    fn pad_then_unpad_is_identity_for_exact_block() {
        let data = [0xABu8; 16];
        let padded = pkcs7_pad(&data, 16);
        assert_eq!(padded.len(), 32);
        assert_eq!(pkcs7_unpad(&padded, 16).unwrap(), data);
    }

    #[test]
    fn unpad_rejects_corrupted_padding() {
        let mut padded = pkcs7_pad(b"hello", 16);
        let last = padded.len() - 1;
        padded[last] ^= 0xFF;
        assert!(pkcs7_unpad(&padded, 16).is_err());
    }

    #[test]
    fn unpad_rejects_wrong_block_length() {
        assert!(pkcs7_unpad(&[1, 2, 3], 16).is_err());
    }
}
