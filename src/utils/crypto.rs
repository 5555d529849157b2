use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rng, Rng};
use thiserror::Error;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("encryption key must be 64 hex characters")]
    InvalidKey,
    #[error("invalid ciphertext")]
    InvalidCiphertext,
}

/// AES-256-GCM envelope around stored credentials and OAuth tokens.
///
/// Sealed blobs are `base64(iv || tag || ciphertext)` with a 12-byte random
/// IV and a 16-byte tag. The key is supplied as 64 hex characters.
pub struct CryptoBox {
    cipher: Aes256Gcm,
}

impl CryptoBox {
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        let key_bytes = decode_hex(hex_key).ok_or(CryptoError::InvalidKey)?;
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        rng().fill(&mut iv[..]);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        // aes-gcm appends the tag to the ciphertext; reorder to iv || tag || ct.
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(tag);
        out.extend_from_slice(body);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, CryptoError> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        if raw.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::InvalidCiphertext);
        }
        let iv = &raw[..IV_LEN];
        let tag = &raw[IV_LEN..IV_LEN + TAG_LEN];
        let body = &raw[IV_LEN + TAG_LEN..];
        let mut ct = Vec::with_capacity(body.len() + TAG_LEN);
        ct.extend_from_slice(body);
        ct.extend_from_slice(tag);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(iv), ct.as_slice())
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        String::from_utf8(plain).map_err(|_| CryptoError::InvalidCiphertext)
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    fn test_box() -> CryptoBox {
        CryptoBox::from_hex_key(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let cb = test_box();
        for plain in ["", "sk-X", "refresh-token|project-123", "héllo 🚀"] {
            let sealed = cb.encrypt(plain).unwrap();
            assert_eq!(cb.decrypt(&sealed).unwrap(), plain);
        }
    }

    #[test]
    fn test_encrypt_never_reuses_iv() {
        let cb = test_box();
        let a = cb.encrypt("same input").unwrap();
        let b = cb.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampering_any_byte_fails() {
        let cb = test_box();
        let sealed = cb.encrypt("secret credential").unwrap();
        let raw = BASE64.decode(&sealed).unwrap();
        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let tampered_b64 = BASE64.encode(&tampered);
            assert_eq!(
                cb.decrypt(&tampered_b64),
                Err(CryptoError::InvalidCiphertext),
                "tampering byte {} must fail",
                i
            );
        }
    }

    #[test]
    fn test_short_and_malformed_input() {
        let cb = test_box();
        assert_eq!(cb.decrypt("not base64 !!!"), Err(CryptoError::InvalidCiphertext));
        let short = BASE64.encode([0u8; 27]);
        assert_eq!(cb.decrypt(&short), Err(CryptoError::InvalidCiphertext));
    }

    #[test]
    fn test_key_validation() {
        assert!(CryptoBox::from_hex_key("deadbeef").is_err());
        assert!(CryptoBox::from_hex_key(&"zz".repeat(32)).is_err());
        assert!(CryptoBox::from_hex_key(&"0f".repeat(32)).is_ok());
    }
}
