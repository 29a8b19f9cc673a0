//! One-shot hybrid encryption.
//!
//! A random 256-bit session key encrypts the payload with AES-256 in CFB mode
//! (random 16-byte IV per message); the session key itself is sealed for the
//! recipient with RSA-OAEP over SHA-512.
//!
//! There is no authentication tag: flipping ciphertext bits yields garbage
//! plaintext, not an error. Only a wrong private key is detected, because the
//! OAEP unseal of the session key fails.

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use rsa::Oaep;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::key::{PrivateKey, PublicKey};

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

pub const SESSION_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Session key sealed with the recipient's public key.
    #[serde(rename = "key", with = "base64_bytes")]
    pub session_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Stream ciphertext, same length as the plaintext.
    #[serde(rename = "message", with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Encrypt `plaintext` so that only the holder of `recipient`'s private
    /// key can read it.
    pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Self> {
        let mut session_key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        OsRng.fill_bytes(&mut session_key[..]);
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut ciphertext = plaintext.to_vec();
        Aes256CfbEnc::new_from_slices(&session_key[..], &iv)
            .map_err(|e| Error::Crypto(format!("cfb init: {e}")))?
            .encrypt(&mut ciphertext);

        // A fresh OAEP instance, and so a fresh hasher, for every seal.
        let sealed_key = recipient
            .rsa()
            .encrypt(&mut OsRng, Oaep::new::<Sha512>(), &session_key[..])
            .map_err(|e| Error::Crypto(format!("oaep seal: {e}")))?;

        Ok(Self {
            session_key: sealed_key,
            iv: iv.to_vec(),
            ciphertext,
        })
    }

    /// Decrypt with the recipient's private key.
    pub fn open(&self, recipient: &PrivateKey) -> Result<Vec<u8>> {
        let session_key = Zeroizing::new(
            recipient
                .rsa()
                .decrypt(Oaep::new::<Sha512>(), &self.session_key)
                .map_err(|e| Error::Decryption(format!("oaep unseal: {e}")))?,
        );
        if session_key.len() != SESSION_KEY_LEN {
            return Err(Error::Decryption(format!(
                "session key must be {SESSION_KEY_LEN} bytes, got {}",
                session_key.len()
            )));
        }
        if self.iv.len() != IV_LEN {
            return Err(Error::Decryption(format!(
                "iv must be {IV_LEN} bytes, got {}",
                self.iv.len()
            )));
        }

        let mut plaintext = self.ciphertext.clone();
        Aes256CfbDec::new_from_slices(&session_key, &self.iv)
            .map_err(|e| Error::Decryption(format!("cfb init: {e}")))?
            .decrypt(&mut plaintext);
        Ok(plaintext)
    }
}

/// Serde adapter: byte fields travel as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
