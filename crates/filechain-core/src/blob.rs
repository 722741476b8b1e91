//! On-disk layout of an encrypted file: `salt[16] || iv[16] || ciphertext`.

use crate::crypto::{IV_LEN, SALT_LEN};
use crate::error::CryptoError;

pub const HEADER_SIZE: usize = SALT_LEN + IV_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.iv);
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CryptoError> {
        if buf.len() < HEADER_SIZE {
            return Err(CryptoError::BlobTooShort(buf.len()));
        }
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        salt.copy_from_slice(&buf[..SALT_LEN]);
        iv.copy_from_slice(&buf[SALT_LEN..HEADER_SIZE]);
        Ok(Self {
            salt,
            iv,
            ciphertext: buf[HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    #[test]
    fn layout_places_salt_then_iv() {
        let blob = EncryptedBlob {
            salt: [1u8; SALT_LEN],
            iv: [2u8; IV_LEN],
            ciphertext: vec![3u8; 16],
        };
        let bytes = blob.to_bytes();
        assert_eq!(bytes.len(), 48);
        assert!(bytes[..16].iter().all(|b| *b == 1));
        assert!(bytes[16..32].iter().all(|b| *b == 2));
        assert_eq!(EncryptedBlob::from_bytes(&bytes).unwrap(), blob);
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(matches!(
            EncryptedBlob::from_bytes(&[0u8; 31]),
            Err(CryptoError::BlobTooShort(31))
        ));
    }

    #[test]
    fn decrypts_through_parsed_header() {
        let blob = crypto::encrypt(b"12345", b"Secr3t!923").unwrap();
        let parsed = EncryptedBlob::from_bytes(&blob.to_bytes()).unwrap();
        let plain = crypto::decrypt(&parsed.salt, &parsed.iv, &parsed.ciphertext, b"Secr3t!923");
        assert_eq!(plain.unwrap(), b"12345");
    }
}
