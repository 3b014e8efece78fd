//! Compact JWE with A256GCM content encryption.
//!
//! Two key management modes are used by the protocol:
//!
//! - `ECDH-ES` (direct key agreement) for everything the client sends to the
//!   IDP, keyed to the discovery document's encryption key
//! - `dir` for the token bundle the IDP returns, keyed to the session
//!   [`AesKey`] the client handed over in the key verifier
//!
//! The content encryption key for `ECDH-ES` is derived with the Concat KDF of
//! RFC 7518 §4.6.2. The raw ECDH step is delegated to
//! [`CryptoPrimitives::agree`].

use super::{AesKey, EcPublicKey, Jwk, base64url_decode, base64url_encode};
use crate::error::{IdpError, Result};
use crate::providers::CryptoPrimitives;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Content encryption algorithm.
pub const ENC_A256GCM: &str = "A256GCM";
/// Direct key agreement.
pub const ALG_ECDH_ES: &str = "ECDH-ES";
/// Direct use of a shared symmetric key.
pub const ALG_DIR: &str = "dir";

const IV_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// JOSE header of an encrypted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Key management algorithm.
    pub alg: String,

    /// Content encryption algorithm.
    pub enc: String,

    /// Content type of the plaintext (`NJWT`, `JSON`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,

    /// Ephemeral public key for `ECDH-ES`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,

    /// Expiry of the enclosed token (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// A compact serialized JWE: `header.encrypted_key.iv.ciphertext.tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jwe {
    header: String,
    encrypted_key: String,
    iv: String,
    ciphertext: String,
    tag: String,
}

impl Jwe {
    /// Parse a compact JWE.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] unless there are exactly five parts.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        let [header, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
            return Err(IdpError::Decoding(format!(
                "JWE must have five parts, got {}",
                parts.len()
            )));
        };
        Ok(Self {
            header: (*header).to_string(),
            encrypted_key: (*encrypted_key).to_string(),
            iv: (*iv).to_string(),
            ciphertext: (*ciphertext).to_string(),
            tag: (*tag).to_string(),
        })
    }

    /// Decode the protected header.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for malformed base64 or JSON.
    pub fn header(&self) -> Result<JweHeader> {
        Ok(serde_json::from_slice(&base64url_decode(&self.header)?)?)
    }

    /// Encrypt `plaintext` for the holder of `recipient` (`ECDH-ES`/`A256GCM`).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if key agreement or encryption fails.
    pub fn encrypt_for<C: CryptoPrimitives + ?Sized>(
        plaintext: &[u8],
        recipient: &EcPublicKey,
        content_type: &str,
        exp: Option<i64>,
        crypto: &C,
    ) -> Result<Self> {
        let agreement = crypto
            .agree(recipient)
            .map_err(|e| IdpError::Encryption(format!("key agreement failed: {e}")))?;
        let mut cek = concat_kdf(&agreement.shared_secret, ENC_A256GCM, 256);
        let header = JweHeader {
            alg: ALG_ECDH_ES.to_string(),
            enc: ENC_A256GCM.to_string(),
            cty: Some(content_type.to_string()),
            epk: Some(agreement.ephemeral_public_key.to_jwk()),
            exp,
        };
        let result = Self::seal(&header, &cek, plaintext);
        cek.zeroize();
        result
    }

    /// Encrypt `plaintext` directly with `key` (`dir`/`A256GCM`).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if encryption fails.
    pub fn encrypt_direct(plaintext: &[u8], key: &AesKey, content_type: &str) -> Result<Self> {
        let header = JweHeader {
            alg: ALG_DIR.to_string(),
            enc: ENC_A256GCM.to_string(),
            cty: Some(content_type.to_string()),
            epk: None,
            exp: None,
        };
        Self::seal(&header, key.as_bytes(), plaintext)
    }

    /// Decrypt a `dir`/`A256GCM` token with the session key.
    ///
    /// Any failure, including a tampered header, ciphertext or tag, is a
    /// [`IdpError::Decryption`]; no partially decrypted data is returned.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decryption`] on any failure.
    pub fn decrypt_direct(&self, key: &AesKey) -> Result<Vec<u8>> {
        let header = self
            .header()
            .map_err(|e| IdpError::Decryption(format!("unreadable header: {e}")))?;
        if header.alg != ALG_DIR || header.enc != ENC_A256GCM {
            return Err(IdpError::Decryption(format!(
                "unsupported algorithms {}/{}",
                header.alg, header.enc
            )));
        }
        self.open(key.as_bytes())
    }

    /// Decrypt an `ECDH-ES` token given the agreed shared secret.
    ///
    /// This is the recipient side of [`Jwe::encrypt_for`]; the client never
    /// needs it, IDP implementations and test doubles do.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decryption`] on any failure.
    pub fn decrypt_with_shared_secret(&self, shared_secret: &[u8]) -> Result<Vec<u8>> {
        let header = self
            .header()
            .map_err(|e| IdpError::Decryption(format!("unreadable header: {e}")))?;
        if header.alg != ALG_ECDH_ES || header.enc != ENC_A256GCM {
            return Err(IdpError::Decryption(format!(
                "unsupported algorithms {}/{}",
                header.alg, header.enc
            )));
        }
        let mut cek = concat_kdf(shared_secret, ENC_A256GCM, 256);
        let result = self.open(&cek);
        cek.zeroize();
        result
    }

    fn seal(header: &JweHeader, cek: &[u8; 32], plaintext: &[u8]) -> Result<Self> {
        let header_json =
            serde_json::to_vec(header).map_err(|e| IdpError::Encryption(e.to_string()))?;
        let header_b64 = base64url_encode(&header_json);

        let iv: [u8; IV_LENGTH] = rand::random();
        let cipher = Aes256Gcm::new_from_slice(cek)
            .map_err(|e| IdpError::Encryption(format!("AES-GCM init: {e}")))?;

        // AAD is the protected header base64url string (RFC 7516 §5.1 step 14)
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: header_b64.as_bytes(),
                },
            )
            .map_err(|e| IdpError::Encryption(format!("AES-GCM encrypt: {e}")))?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);

        Ok(Self {
            header: header_b64,
            encrypted_key: String::new(),
            iv: base64url_encode(&iv),
            ciphertext: base64url_encode(ciphertext),
            tag: base64url_encode(tag),
        })
    }

    fn open(&self, cek: &[u8; 32]) -> Result<Vec<u8>> {
        if !self.encrypted_key.is_empty() {
            return Err(IdpError::Decryption(
                "direct encryption must not carry an encrypted key".to_string(),
            ));
        }
        let decode = |part: &str| {
            base64url_decode(part).map_err(|e| IdpError::Decryption(e.to_string()))
        };
        let iv = decode(&self.iv)?;
        if iv.len() != IV_LENGTH {
            return Err(IdpError::Decryption(format!(
                "IV must be {IV_LENGTH} bytes, got {}",
                iv.len()
            )));
        }
        let tag = decode(&self.tag)?;
        if tag.len() != TAG_LENGTH {
            return Err(IdpError::Decryption("truncated authentication tag".to_string()));
        }
        let mut sealed = decode(&self.ciphertext)?;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new_from_slice(cek)
            .map_err(|e| IdpError::Decryption(format!("AES-GCM init: {e}")))?;
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: self.header.as_bytes(),
                },
            )
            .map_err(|_| IdpError::Decryption("authentication tag mismatch".to_string()))
    }

    /// Compact serialization.
    #[must_use]
    pub fn serialize(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.header, self.encrypted_key, self.iv, self.ciphertext, self.tag
        )
    }
}

impl std::fmt::Display for Jwe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl TryFrom<String> for Jwe {
    type Error = IdpError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Jwe> for String {
    fn from(jwe: Jwe) -> Self {
        jwe.serialize()
    }
}

/// Concat KDF (NIST SP 800-56A, single round for 256 bits).
///
/// `SHA-256(00000001 || Z || algID || partyUInfo || partyVInfo || suppPubInfo)`
/// with empty party infos. For direct `ECDH-ES` the algorithm ID is the
/// `enc` value.
fn concat_kdf(z: &[u8], alg: &str, key_data_len_bits: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    let alg_len = u32::try_from(alg.len()).unwrap_or(u32::MAX);
    hasher.update(alg_len.to_be_bytes());
    hasher.update(alg.as_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(key_data_len_bits.to_be_bytes());
    hasher.finalize().into()
}
