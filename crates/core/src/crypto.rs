//! Passphrase envelope: PBKDF2-HMAC-SHA256 key derivation and AES-256-GCM.
//!
//! Every call draws a fresh 16-byte salt and 12-byte IV, so the same input
//! never encrypts to the same bytes twice. The envelope is
//! `{"salt", "iv", "ciphertext"}`, each standard base64.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Error, Result};

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const KDF_ITERATIONS: u32 = 600_000;
pub const KDF_MIN_ITERATIONS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: KDF_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Cheapest cost accepted; only for tests.
    pub fn for_test() -> Self {
        Self {
            iterations: KDF_MIN_ITERATIONS,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.iterations < KDF_MIN_ITERATIONS {
            return Err(Error::InvalidConfig {
                message: format!("KDF iterations too small: {}", self.iterations),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encryption {
            message: format!("encode envelope: {e}"),
        })
    }

    /// Parse the outer envelope. A malformed envelope is a damaged backup,
    /// not a wrong passphrase.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::validation(format!("envelope: {e}")))
    }
}

fn derive_key(passphrase: &str, salt: &[u8], kdf: KdfParams) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, kdf.iterations, &mut out);
    out
}

pub fn encrypt_with(kdf: KdfParams, plaintext: &[u8], passphrase: &str) -> Result<EncryptedPayload> {
    kdf.validate()?;
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|e| Error::Encryption {
        message: format!("salt: {e}"),
    })?;

    let key = derive_key(passphrase, &salt, kdf);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let iv = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&iv, plaintext).map_err(|_| Error::Encryption {
        message: "aead seal failed".to_string(),
    })?;

    Ok(EncryptedPayload {
        salt: salt.to_vec(),
        iv: iv.to_vec(),
        ciphertext,
    })
}

/// Open an envelope. Wrong passphrase, tampering and bad parameter lengths
/// all surface as the same [`Error::Decryption`].
pub fn decrypt_with(kdf: KdfParams, payload: &EncryptedPayload, passphrase: &str) -> Result<Vec<u8>> {
    kdf.validate()?;
    if payload.salt.len() != SALT_LEN || payload.iv.len() != IV_LEN {
        return Err(Error::Decryption);
    }

    let key = derive_key(passphrase, &payload.salt, kdf);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let iv = Nonce::from_slice(&payload.iv);
    cipher
        .decrypt(iv, payload.ciphertext.as_slice())
        .map_err(|_| Error::Decryption)
}

/// [`encrypt_with`] on the blocking pool.
pub async fn encrypt(kdf: KdfParams, plaintext: Vec<u8>, passphrase: String) -> Result<EncryptedPayload> {
    tokio::task::spawn_blocking(move || encrypt_with(kdf, &plaintext, &passphrase))
        .await
        .map_err(|e| Error::Encryption {
            message: format!("crypto worker: {e}"),
        })?
}

pub async fn decrypt(kdf: KdfParams, payload: EncryptedPayload, passphrase: String) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || decrypt_with(kdf, &payload, &passphrase))
        .await
        .map_err(|e| Error::Encryption {
            message: format!("crypto worker: {e}"),
        })?
}

mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let kdf = KdfParams::for_test();
        let env = encrypt_with(kdf, b"hello", "pw").unwrap();
        assert_eq!(env.salt.len(), SALT_LEN);
        assert_eq!(env.iv.len(), IV_LEN);
        assert_eq!(decrypt_with(kdf, &env, "pw").unwrap(), b"hello");
    }

    #[test]
    fn round_trip_empty_binary_and_large_payloads() {
        let kdf = KdfParams::for_test();
        let binary: Vec<u8> = (0..=255u8).rev().chain(0..=255u8).collect();
        assert!(std::str::from_utf8(&binary).is_err());
        let large: Vec<u8> = (0..64 * 1024).map(|i| (i * 31 % 251) as u8).collect();

        for plaintext in [Vec::new(), binary, large] {
            let env = encrypt_with(kdf, &plaintext, "pw").unwrap();
            // AES-GCM appends a 16-byte tag.
            assert_eq!(env.ciphertext.len(), plaintext.len() + 16);
            let bytes = env.to_json_bytes().unwrap();
            let parsed = EncryptedPayload::from_json_bytes(&bytes).unwrap();
            assert_eq!(decrypt_with(kdf, &parsed, "pw").unwrap(), plaintext);
        }
    }

    #[test]
    fn same_input_encrypts_differently() {
        let kdf = KdfParams::for_test();
        let a = encrypt_with(kdf, b"same plaintext", "pw").unwrap();
        let b = encrypt_with(kdf, b"same plaintext", "pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(decrypt_with(kdf, &a, "pw").unwrap(), decrypt_with(kdf, &b, "pw").unwrap());
    }

    #[test]
    fn envelope_is_plain_base64_json() {
        let env = encrypt_with(KdfParams::for_test(), b"x", "pw").unwrap();
        let v: serde_json::Value = serde_json::from_slice(&env.to_json_bytes().unwrap()).unwrap();
        let salt = v["salt"].as_str().unwrap();
        assert_eq!(salt.len(), 24);
        assert_eq!(v["iv"].as_str().unwrap().len(), 16);
        assert_eq!(EncryptedPayload::from_json_bytes(&env.to_json_bytes().unwrap()).unwrap(), env);
    }

    #[test]
    fn tampered_ciphertext_fails_opaquely() {
        let kdf = KdfParams::for_test();
        let mut env = encrypt_with(kdf, b"hello", "pw").unwrap();
        env.ciphertext[0] ^= 0x01;
        assert!(matches!(decrypt_with(kdf, &env, "pw"), Err(Error::Decryption)));

        env.iv.truncate(8);
        assert!(matches!(decrypt_with(kdf, &env, "pw"), Err(Error::Decryption)));
    }

    #[test]
    fn bad_base64_is_a_validation_error() {
        let err = EncryptedPayload::from_json_bytes(br#"{"salt":"***","iv":"","ciphertext":""}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn too_few_iterations_rejected() {
        let err = encrypt_with(KdfParams { iterations: 1 }, b"x", "pw").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
