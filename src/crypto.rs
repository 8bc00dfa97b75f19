//! Key loading and frame crypto
//!
//! All three paths in and out of the worker are authenticated with the same
//! curve25519 key pair: the worker's own key and the server's public half,
//! both read from `keys_path`. The first 32 bytes of each secret file are the
//! key material.
//!
//! The pure-Rust ZeroMQ implementation carries no channel-level CURVE layer,
//! so channel authentication is applied per frame with NaCl `crypto_box`
//! (x25519 + XSalsa20-Poly1305): control and results frames are sealed
//! envelopes carrying the sender identity; request frames on the shared queue
//! are a bare `nonce ‖ ciphertext` box between the worker key and the sender
//! key, independent of the queue transport's own security.

use std::fs;
use std::path::Path;

use crypto_box::aead::{Aead, AeadCore};
use crypto_box::{Nonce, SalsaBox};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

pub use crypto_box::{PublicKey, SecretKey};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

pub const CLIENT_KEY_FILE: &str = "client.key_secret";
pub const SERVER_KEY_FILE: &str = "server.key_secret";

/// The worker's key pair plus the server's public key, as loaded from disk.
pub struct TransportKeys {
    pub secret: SecretKey,
    pub public: PublicKey,
    pub server_public: PublicKey,
}

/// Load `client.key_secret` and `server.key_secret` from the key directory.
/// The server file holds the server's secret half on disk; only its derived
/// public key is kept in memory.
pub fn load_keys(keys_path: &Path) -> Result<TransportKeys, CryptoError> {
    let secret = SecretKey::from(read_key_material(&keys_path.join(CLIENT_KEY_FILE))?);
    let server_secret = SecretKey::from(read_key_material(&keys_path.join(SERVER_KEY_FILE))?);
    let public = secret.public_key();
    Ok(TransportKeys {
        public,
        server_public: server_secret.public_key(),
        secret,
    })
}

fn read_key_material(path: &Path) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = fs::read(path).map_err(|source| CryptoError::KeyFile {
        path: path.display().to_string(),
        source,
    })?;
    if bytes.len() < KEY_LEN {
        return Err(CryptoError::ShortKey {
            path: path.display().to_string(),
            len: bytes.len(),
            expected: KEY_LEN,
        });
    }
    let mut material = [0u8; KEY_LEN];
    material.copy_from_slice(&bytes[..KEY_LEN]);
    Ok(material)
}

/// Public-key authenticated encryption over one peer pair. Frame layout is
/// the NaCl convention: 24-byte nonce followed by the ciphertext.
pub struct FrameCrypto {
    sealer: SalsaBox,
}

impl FrameCrypto {
    pub fn new(secret: &SecretKey, peer_public: &PublicKey) -> Self {
        Self {
            sealer: SalsaBox::new(peer_public, secret),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = self
            .sealer
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Seal)?;
        let mut frame = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        frame.extend_from_slice(nonce.as_slice());
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    pub fn open(&self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if frame.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let nonce = Nonce::from_slice(&frame[..NONCE_LEN]);
        self.sealer
            .decrypt(nonce, &frame[NONCE_LEN..])
            .map_err(|_| CryptoError::Open)
    }
}

/// One sealed frame on the control or results channel.
#[derive(Serialize, Deserialize)]
struct SealedEnvelope {
    identity: String,
    frame: Vec<u8>,
}

/// An authenticated channel to one peer, tagged with a stable sender
/// identity (`"Worker-<id>"` on the worker side).
pub struct Channel {
    crypto: FrameCrypto,
    identity: String,
}

impl Channel {
    pub fn new(secret: &SecretKey, peer_public: &PublicKey, identity: impl Into<String>) -> Self {
        Self {
            crypto: FrameCrypto::new(secret, peer_public),
            identity: identity.into(),
        }
    }

    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let envelope = SealedEnvelope {
            identity: self.identity.clone(),
            frame: self.crypto.seal(payload)?,
        };
        bincode::serialize(&envelope).map_err(CryptoError::Envelope)
    }

    /// Open a sealed frame, returning the sender identity and the payload.
    pub fn open(&self, bytes: &[u8]) -> Result<(String, Vec<u8>), CryptoError> {
        let envelope: SealedEnvelope = bincode::deserialize(bytes)?;
        let payload = self.crypto.open(&envelope.frame)?;
        Ok((envelope.identity, payload))
    }
}
