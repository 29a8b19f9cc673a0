//! RSA key material and its textual form.
//!
//! Textual form: PEM, base64-wrapped as a whole so it survives being embedded
//! in JSON, flags or config files. Private keys may carry a passphrase, in
//! which case the PEM payload is sealed with an Argon2id-derived key under
//! XChaCha20-Poly1305 and labelled `ENCRYPTED RSA PRIVATE KEY`:
//!
//!   [ salt (16 bytes) | nonce (24 bytes) | ciphertext + tag ]
//!
//! The public key's textual form is deterministic and doubles as the
//! canonical identity string of that key.

use std::fmt;
use std::sync::OnceLock;

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305, XNonce,
};
use pem_rfc7468::LineEnding;
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{spki, DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

const LABEL_PRIVATE: &str = "RSA PRIVATE KEY";
const LABEL_ENCRYPTED_PRIVATE: &str = "ENCRYPTED RSA PRIVATE KEY";
const LABEL_PUBLIC: &str = "PUBLIC KEY";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;

// ── Private key ──────────────────────────────────────────────────────────────

/// RSA private key with an optional passphrase and a cached textual form.
#[derive(Clone)]
pub struct PrivateKey {
    key: RsaPrivateKey,
    passphrase: Option<Zeroizing<String>>,
    text: OnceLock<String>,
}

impl PrivateKey {
    /// Generate a fresh key of `bits` modulus size.
    pub fn generate(bits: usize, passphrase: Option<&str>) -> Result<Self> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        Ok(Self {
            key,
            passphrase: normalize(passphrase),
            text: OnceLock::new(),
        })
    }

    /// Replace the passphrase used by the next `marshal`.
    pub fn set_passphrase(&mut self, passphrase: Option<&str>) {
        self.passphrase = normalize(passphrase);
        self.text = OnceLock::new();
    }

    pub fn rsa(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// Size of the modulus in bytes, which is also the sealed session key length.
    pub fn size(&self) -> usize {
        rsa::traits::PublicKeyParts::size(&self.key)
    }

    /// Textual form. Computed once, then served from cache: a passphrase-sealed
    /// key is not re-encrypted with a new salt on every call.
    pub fn marshal(&self) -> Result<String> {
        if let Some(text) = self.text.get() {
            return Ok(text.clone());
        }
        let der = self
            .key
            .to_pkcs1_der()
            .map_err(|e| Error::Crypto(format!("pkcs1 encode: {e}")))?;
        let pem = match &self.passphrase {
            Some(passphrase) => {
                let sealed = seal_with_passphrase(passphrase, der.as_bytes())?;
                encode_pem(LABEL_ENCRYPTED_PRIVATE, &sealed)?
            }
            None => encode_pem(LABEL_PRIVATE, der.as_bytes())?,
        };
        let text = STANDARD.encode(pem.as_bytes());
        Ok(self.text.get_or_init(|| text).clone())
    }

    /// Parse a textual private key, unsealing it with `passphrase` when needed.
    pub fn unmarshal(text: &str, passphrase: Option<&str>) -> Result<Self> {
        let text = text.trim();
        let pem = STANDARD
            .decode(text)
            .map_err(|e| Error::InvalidPem(format!("base64: {e}")))?;
        let (label, contents) =
            pem_rfc7468::decode_vec(&pem).map_err(|e| Error::InvalidPem(e.to_string()))?;
        let passphrase = normalize(passphrase);

        let der = match (label, &passphrase) {
            (LABEL_ENCRYPTED_PRIVATE, Some(p)) => open_with_passphrase(p, &contents)?,
            (LABEL_ENCRYPTED_PRIVATE, None) => {
                return Err(Error::InvalidPassphrase(
                    "key is encrypted but no passphrase was supplied".into(),
                ))
            }
            (LABEL_PRIVATE, Some(_)) => {
                return Err(Error::InvalidPassphrase("key is not encrypted".into()))
            }
            (LABEL_PRIVATE, None) => Zeroizing::new(contents),
            (other, _) => {
                return Err(Error::KeyType(format!(
                    "expected a private key PEM block, got {other}"
                )))
            }
        };

        let key = RsaPrivateKey::from_pkcs1_der(&der).map_err(|e| Error::KeyParse(e.to_string()))?;
        let cache = OnceLock::new();
        let _ = cache.set(text.to_string());
        Ok(Self {
            key,
            passphrase,
            text: cache,
        })
    }

    /// Derive the public half.
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_rsa(self.key.to_public_key())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &(self.size() * 8))
            .field("passphrase", &self.passphrase.is_some())
            .finish_non_exhaustive()
    }
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.marshal().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PrivateKey::unmarshal(&text, None).map_err(serde::de::Error::custom)
    }
}

// ── Public key ───────────────────────────────────────────────────────────────

/// RSA public key together with its canonical textual form.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: RsaPublicKey,
    text: String,
}

impl PublicKey {
    pub fn from_rsa(key: RsaPublicKey) -> Result<Self> {
        let der = key
            .to_public_key_der()
            .map_err(|e| Error::KeyType(format!("public key is not encodable as SPKI: {e}")))?;
        let pem = encode_pem(LABEL_PUBLIC, der.as_bytes())?;
        Ok(Self {
            key,
            text: STANDARD.encode(pem.as_bytes()),
        })
    }

    pub fn rsa(&self) -> &RsaPublicKey {
        &self.key
    }

    pub fn marshal(&self) -> String {
        self.text.clone()
    }

    pub fn unmarshal(text: &str) -> Result<Self> {
        let text = text.trim();
        let pem = STANDARD
            .decode(text)
            .map_err(|e| Error::InvalidPem(format!("base64: {e}")))?;
        let (label, der) =
            pem_rfc7468::decode_vec(&pem).map_err(|e| Error::InvalidPem(e.to_string()))?;
        if label != LABEL_PUBLIC {
            return Err(Error::KeyType(format!(
                "expected a public key PEM block, got {label}"
            )));
        }
        let key = RsaPublicKey::from_public_key_der(&der).map_err(|e| match e {
            spki::Error::OidUnknown { oid } => {
                Error::KeyType(format!("public key algorithm {oid} is not RSA"))
            }
            other => Error::KeyParse(other.to_string()),
        })?;
        Ok(Self {
            key,
            text: text.to_string(),
        })
    }

    /// Canonical identity string: the textual form.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = &self.text[self.text.len().saturating_sub(16)..];
        write!(f, "PublicKey(..{tail})")
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PublicKey::unmarshal(&text).map_err(serde::de::Error::custom)
    }
}

// ── Key pair ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize, passphrase: Option<&str>) -> Result<Self> {
        let private = PrivateKey::generate(bits, passphrase)?;
        let public = private.public_key()?;
        Ok(Self { private, public })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn normalize(passphrase: Option<&str>) -> Option<Zeroizing<String>> {
    passphrase
        .filter(|p| !p.is_empty())
        .map(|p| Zeroizing::new(p.to_string()))
}

fn encode_pem(label: &str, der: &[u8]) -> Result<String> {
    pem_rfc7468::encode_string(label, LineEnding::LF, der)
        .map_err(|e| Error::Crypto(format!("pem encode: {e}")))
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::Crypto(format!("argon2 derive: {e}")))?;
    Ok(key)
}

fn seal_with_passphrase(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(passphrase, &salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| Error::Crypto(format!("cipher init: {e}")))?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Crypto("sealing private key failed".into()))?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_with_passphrase(passphrase: &str, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidPassphrase("sealed key is truncated".into()));
    }
    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let key = derive_key(passphrase, salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| Error::Crypto(format!("cipher init: {e}")))?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::InvalidPassphrase("decryption failed".into()))?;
    Ok(Zeroizing::new(plaintext))
}
