//! Login password encryption
//!
//! The gateway expects the password Blowfish-encrypted in ECB mode with the
//! key handed out by `InitialApp_v2.php`, PKCS#5 padded and base64 encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockEncrypt, KeyInit};
use blowfish::Blowfish;

use crate::telemetry::AccountError;

const BLOCK_SIZE: usize = 8;

pub fn encrypt_password(password: &str, key: &str) -> Result<String, AccountError> {
    let mut data = pkcs5_pad(password.as_bytes());
    encrypt_blocks(key.as_bytes(), &mut data)?;
    Ok(STANDARD.encode(data))
}

/// Encrypts `data` in place, block by block
fn encrypt_blocks(key: &[u8], data: &mut [u8]) -> Result<(), AccountError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(AccountError::Encryption(format!(
            "data length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let cipher: Blowfish = Blowfish::new_from_slice(key)
        .map_err(|_| AccountError::Encryption(format!("invalid key length {}", key.len())))?;

    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn pkcs5_pad(data: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding, padding as u8);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_vector() {
        let mut block = [0u8; 8];
        encrypt_blocks(&[0u8; 8], &mut block).expect("encrypt");
        assert_eq!(block, [0x4e, 0xf9, 0x97, 0x45, 0x61, 0x98, 0xdd, 0x78]);
    }

    #[test]
    fn padding_always_adds_a_block_fraction() {
        assert_eq!(pkcs5_pad(b"abc"), b"abc\x05\x05\x05\x05\x05".to_vec());
        assert_eq!(pkcs5_pad(b"12345678").len(), 16);
        assert_eq!(pkcs5_pad(b"12345678")[8..], [8u8; 8]);
        assert_eq!(pkcs5_pad(b""), vec![8u8; 8]);
    }

    #[test]
    fn password_encryption_is_deterministic_per_key() {
        let key = "88dSp7wWnV3bvv9Z88zEwg";
        let first = encrypt_password("hunter22", key).expect("encrypt");
        let second = encrypt_password("hunter22", key).expect("encrypt");
        let other_key = encrypt_password("hunter22", "another-key").expect("encrypt");

        assert_eq!(first, second);
        assert_ne!(first, other_key);
        assert_eq!(STANDARD.decode(&first).expect("base64").len(), 16);
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            encrypt_password("pw", "abc"),
            Err(AccountError::Encryption(_))
        ));
    }
}
