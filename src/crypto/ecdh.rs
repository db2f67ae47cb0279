//! X25519 ECDH contexts (spec §4.3).
//!
//! `x25519_client_context()` / `x25519_server_context(client_public)` /
//! `x25519_client_secret(ctx, server_public)`. Wire sizes match
//! SPEC_FULL §9.y: the client public-key field is 36 bytes (32-byte
//! Montgomery point + 4-byte fixed tag), the server's is 33 bytes (32-byte
//! point + 1-byte fixed tag). The tag bytes carry no protocol meaning; they
//! reproduce the original fixed-size framing without attempting to
//! replicate the source's mbedTLS ECP point encoding.

use x25519_dalek::{EphemeralSecret, PublicKey};

use super::CryptoError;
use crate::config::{SIZE_X25519_CLIENT_PUBLIC, SIZE_X25519_SERVER_PUBLIC, X25519_CLIENT_TAG, X25519_SERVER_TAG};

/// The client side of a pairing exchange: generates an ephemeral keypair,
/// exposes its 36-byte public-key wire encoding, and consumes the server's
/// 33-byte public key to derive the shared secret.
pub struct ClientContext {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl ClientContext {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand_core::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// 36-byte wire encoding of the client's public key.
    pub fn public_bytes(&self) -> [u8; SIZE_X25519_CLIENT_PUBLIC] {
        let mut out = [0u8; SIZE_X25519_CLIENT_PUBLIC];
        out[..32].copy_from_slice(self.public.as_bytes());
        out[32..].copy_from_slice(&X25519_CLIENT_TAG);
        out
    }

    /// Consume `self` and the server's 33-byte public key to derive the
    /// 32-byte shared secret.
    pub fn derive_secret(self, server_public: &[u8]) -> Result<[u8; 32], CryptoError> {
        let point = parse_server_public(server_public)?;
        Ok(*self.secret.diffie_hellman(&point).as_bytes())
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The server side of a pairing exchange: built directly from the client's
/// 36-byte public key, generates its own ephemeral keypair and derives the
/// shared secret in one step (the server never needs a second round trip
/// to finish its half of the exchange).
pub struct ServerContext {
    public: PublicKey,
    shared_secret: [u8; 32],
}

impl ServerContext {
    pub fn new(client_public: &[u8]) -> Result<Self, CryptoError> {
        let point = parse_client_public(client_public)?;
        let secret = EphemeralSecret::random_from_rng(rand_core::OsRng);
        let public = PublicKey::from(&secret);
        let shared_secret = *secret.diffie_hellman(&point).as_bytes();
        Ok(Self {
            public,
            shared_secret,
        })
    }

    /// 33-byte wire encoding of the server's public key.
    pub fn public_bytes(&self) -> [u8; SIZE_X25519_SERVER_PUBLIC] {
        let mut out = [0u8; SIZE_X25519_SERVER_PUBLIC];
        out[..32].copy_from_slice(self.public.as_bytes());
        out[32..].copy_from_slice(&X25519_SERVER_TAG);
        out
    }

    /// The 32-byte shared secret, already derived at construction.
    pub fn shared_secret(&self) -> [u8; 32] {
        self.shared_secret
    }
}

fn parse_client_public(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != SIZE_X25519_CLIENT_PUBLIC {
        return Err(CryptoError);
    }
    let mut point = [0u8; 32];
    point.copy_from_slice(&bytes[..32]);
    Ok(PublicKey::from(point))
}

fn parse_server_public(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != SIZE_X25519_SERVER_PUBLIC {
        return Err(CryptoError);
    }
    let mut point = [0u8; 32];
    point.copy_from_slice(&bytes[..32]);
    Ok(PublicKey::from(point))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_derive_the_same_secret() {
        let client = ClientContext::new();
        let client_public = client.public_bytes();

        let server = ServerContext::new(&client_public).unwrap();
        let server_public = server.public_bytes();

        let client_secret = client.derive_secret(&server_public).unwrap();
        assert_eq!(client_secret, server.shared_secret());
    }

    #[test]
    fn rejects_wrong_length_public_keys() {
        assert!(ServerContext::new(&[0u8; 10]).is_err());
        let client = ClientContext::new();
        assert!(client.derive_secret(&[0u8; 10]).is_err());
    }
}
