use crate::blob::EncryptedBlob;
use crate::error::CryptoError;
use aes::Aes256;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const DERIVED_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// PBKDF2-HMAC-SHA256 over `password` and `salt`. Deterministic for a given
/// pair; the returned key is wiped on drop.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, CryptoError> {
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, PBKDF2_ITERATIONS, &mut key[..])
        .map_err(|e| CryptoError::InvalidKeyMaterial(format!("pbkdf2: {e}")))?;
    Ok(key)
}

/// Encrypt under a fresh random salt and IV.
pub fn encrypt(plaintext: &[u8], password: &[u8]) -> Result<EncryptedBlob, CryptoError> {
    encrypt_with(plaintext, password, generate_salt(), generate_iv())
}

/// AES-256-CBC with PKCS#7 padding under a key derived from `password` and
/// `salt`. An already aligned plaintext still gains a full padding block.
pub fn encrypt_with(
    plaintext: &[u8],
    password: &[u8],
    salt: [u8; SALT_LEN],
    iv: [u8; IV_LEN],
) -> Result<EncryptedBlob, CryptoError> {
    let key = derive_key(password, &salt)?;
    let cipher = Aes256CbcEnc::new_from_slices(&key[..], &iv)
        .map_err(|e| CryptoError::InvalidKeyMaterial(format!("aes-cbc init: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    Ok(EncryptedBlob {
        salt,
        iv,
        ciphertext,
    })
}

/// Decrypt and strip padding using only the trailing pad-length byte.
///
/// CBC carries no authentication tag: a wrong password usually fails with
/// [`CryptoError::PaddingInvalid`], but roughly one attempt in sixteen
/// decrypts "successfully" to garbage. Callers must rely on the ledger
/// digest to tell the two apart.
pub fn decrypt(
    salt: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    password: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::CiphertextLength(ciphertext.len()));
    }
    let key = derive_key(password, salt)?;
    let cipher = Aes256CbcDec::new_from_slices(&key[..], iv)
        .map_err(|e| CryptoError::InvalidKeyMaterial(format!("aes-cbc init: {e}")))?;
    let mut padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| CryptoError::CiphertextLength(ciphertext.len()))?;
    let pad_len = padding_len(&padded)?;
    padded.truncate(padded.len() - pad_len);
    Ok(padded)
}

fn padding_len(padded: &[u8]) -> Result<usize, CryptoError> {
    let pad_len = *padded.last().ok_or(CryptoError::PaddingInvalid)? as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > padded.len() {
        return Err(CryptoError::PaddingInvalid);
    }
    Ok(pad_len)
}

/// Lowercase hex SHA-256 digest.
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; SALT_LEN] = [7u8; SALT_LEN];
    const IV: [u8; IV_LEN] = [9u8; IV_LEN];

    #[test]
    fn roundtrip_across_block_boundaries() {
        for len in [0usize, 1, 5, 15, 16, 17, 31, 32, 100] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let blob = encrypt(&data, b"Secr3t!923").unwrap();
            let out = decrypt(&blob.salt, &blob.iv, &blob.ciphertext, b"Secr3t!923").unwrap();
            assert_eq!(out, data, "len {len}");
        }
    }

    #[test]
    fn aligned_plaintext_gets_full_padding_block() {
        let blob = encrypt_with(&[0xAB; 16], b"pw", SALT, IV).unwrap();
        assert_eq!(blob.ciphertext.len(), 32);
        let blob = encrypt_with(&[0xAB; 5], b"pw", SALT, IV).unwrap();
        assert_eq!(blob.ciphertext.len(), 16);
    }

    #[test]
    fn deterministic_for_fixed_salt_and_iv() {
        let a = encrypt_with(b"hello", b"pw", SALT, IV).unwrap();
        let b = encrypt_with(b"hello", b"pw", SALT, IV).unwrap();
        assert_eq!(a.ciphertext, b.ciphertext);
        let c = encrypt_with(b"hello", b"pw", SALT, [1u8; IV_LEN]).unwrap();
        assert_ne!(a.ciphertext, c.ciphertext);
    }

    #[test]
    fn random_salt_and_iv_differ_per_call() {
        let a = encrypt(b"hello", b"pw").unwrap();
        let b = encrypt(b"hello", b"pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn derive_key_is_deterministic_and_salt_sensitive() {
        let k1 = derive_key(b"pw", &SALT).unwrap();
        let k2 = derive_key(b"pw", &SALT).unwrap();
        let k3 = derive_key(b"pw", &[8u8; SALT_LEN]).unwrap();
        assert_eq!(*k1, *k2);
        assert_ne!(*k1, *k3);
    }

    #[test]
    fn wrong_password_never_returns_original() {
        let blob = encrypt_with(b"hello", b"Secr3t!923", SALT, IV).unwrap();
        match decrypt(&blob.salt, &blob.iv, &blob.ciphertext, b"wrong-pass") {
            Err(CryptoError::PaddingInvalid) => {}
            Ok(garbage) => assert_ne!(garbage, b"hello"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_unaligned_ciphertext() {
        assert!(matches!(
            decrypt(&SALT, &IV, &[0u8; 15], b"pw"),
            Err(CryptoError::CiphertextLength(15))
        ));
        assert!(matches!(
            decrypt(&SALT, &IV, &[], b"pw"),
            Err(CryptoError::CiphertextLength(0))
        ));
    }

    #[test]
    fn padding_len_bounds() {
        let mut block = [0u8; BLOCK_SIZE];
        assert!(matches!(padding_len(&block), Err(CryptoError::PaddingInvalid)));
        block[BLOCK_SIZE - 1] = 17;
        assert!(matches!(padding_len(&block), Err(CryptoError::PaddingInvalid)));
        block[BLOCK_SIZE - 1] = 16;
        assert_eq!(padding_len(&block).unwrap(), 16);
        block[BLOCK_SIZE - 1] = 3;
        assert_eq!(padding_len(&block).unwrap(), 3);
    }

    #[test]
    fn sha256_hex_digest() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash(b"abc").len(), 64);
    }
}
