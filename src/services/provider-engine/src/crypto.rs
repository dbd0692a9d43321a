//! Credential decryption
//!
//! Provider credentials and webhook secrets are stored as
//! `iv:tag:ciphertext`, each part hex encoded, sealed with AES-256-GCM
//! (12-byte IV, 16-byte tag).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// Opens stored secrets; called once per request that needs one
pub trait CredentialCipher: Send + Sync {
    fn decrypt(&self, sealed: &str) -> EngineResult<String>;
}

/// AES-256-GCM cipher over the `iv:tag:ciphertext` format
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher { .. }")
    }
}

impl AesGcmCipher {
    /// 64 hex characters are used as the key itself; anything else is hashed
    /// with SHA-256
    pub fn from_secret(secret: &str) -> EngineResult<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(EngineError::configuration("Encryption key is empty"));
        }

        let key: Vec<u8> = match hex::decode(secret) {
            Ok(bytes) if bytes.len() == KEY_SIZE => bytes,
            _ => Sha256::digest(secret.as_bytes()).to_vec(),
        };
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));
        Ok(Self { cipher })
    }

    /// Seal `plaintext` with a random IV
    pub fn encrypt(&self, plaintext: &str) -> EngineResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::decryption(format!("Encryption failed: {}", e)))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }
}

impl CredentialCipher for AesGcmCipher {
    fn decrypt(&self, sealed: &str) -> EngineResult<String> {
        let mut parts = sealed.trim().split(':');
        let (Some(iv), Some(tag), Some(ciphertext), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(EngineError::decryption("Expected iv:tag:ciphertext"));
        };

        let iv = decode_part(iv, "IV")?;
        let tag = decode_part(tag, "tag")?;
        let mut payload = decode_part(ciphertext, "ciphertext")?;
        if iv.len() != IV_SIZE {
            return Err(EngineError::decryption(format!(
                "IV must be {} bytes, got {}",
                IV_SIZE,
                iv.len()
            )));
        }
        if tag.len() != TAG_SIZE {
            return Err(EngineError::decryption(format!(
                "Tag must be {} bytes, got {}",
                TAG_SIZE,
                tag.len()
            )));
        }

        payload.extend_from_slice(&tag);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), payload.as_slice())
            .map_err(|_| EngineError::decryption("Authentication failed"))?;

        String::from_utf8(plaintext)
            .map_err(|_| EngineError::decryption("Plaintext is not valid UTF-8"))
    }
}

fn decode_part(part: &str, name: &str) -> EngineResult<Vec<u8>> {
    hex::decode(part).map_err(|_| EngineError::decryption(format!("Invalid hex in {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_seal_and_open() {
        let cipher = AesGcmCipher::from_secret(HEX_KEY).unwrap();
        let sealed = cipher.encrypt("provider-api-key").unwrap();
        assert_eq!(sealed.split(':').count(), 3);
        assert_eq!(sealed.split(':').next().unwrap().len(), IV_SIZE * 2);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "provider-api-key");
    }

    #[test]
    fn test_passphrase_keys_are_hashed() {
        let a = AesGcmCipher::from_secret("correct horse").unwrap();
        let b = AesGcmCipher::from_secret("correct horse").unwrap();
        let sealed = a.encrypt("x").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), "x");

        let other = AesGcmCipher::from_secret(HEX_KEY).unwrap();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(EngineError::Decryption { .. })
        ));
    }

    #[test]
    fn test_tampered_or_malformed_input() {
        let cipher = AesGcmCipher::from_secret(HEX_KEY).unwrap();
        let sealed = cipher.encrypt("secret").unwrap();
        let parts: Vec<&str> = sealed.split(':').collect();
        let tampered = format!("{}:{}:{}", parts[0], "00".repeat(TAG_SIZE), parts[2]);

        assert!(cipher.decrypt(&tampered).is_err());
        assert!(cipher.decrypt("abc").is_err());
        assert!(cipher.decrypt("zz:zz:zz").is_err());
        assert!(cipher.decrypt(&format!("00:{}", sealed)).is_err());
        assert!(AesGcmCipher::from_secret("  ").is_err());
    }
}
