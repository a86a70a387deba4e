use crate::Error;
use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Number of bytes of the HMAC-SHA256 tag kept on the wire.
pub(crate) const MAC_LENGTH: usize = 8;

pub(crate) type MessageMac = [u8; MAC_LENGTH];

/// Per-message cipher material expanded from a single secret.
///
/// The AES key, MAC key and IV are all derived from the input key material
/// via HKDF, so encryption never needs a fresh random draw.
pub(crate) struct MessageKeys {
    aes_key: Box<[u8; 32]>,
    mac_key: Box<[u8; 32]>,
    iv: Box<[u8; 16]>,
}

impl MessageKeys {
    /// Expands `key_material` into AES-256 key, MAC key and IV. The `info`
    /// label separates the session, group and pickle domains.
    pub(crate) fn derive(key_material: &[u8], info: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, key_material);

        let mut okm = Box::new([0u8; 80]);
        hkdf.expand(info, okm.as_mut_slice())
            .expect("HKDF expansion failed");

        let mut aes_key = Box::new([0u8; 32]);
        let mut mac_key = Box::new([0u8; 32]);
        let mut iv = Box::new([0u8; 16]);
        aes_key.copy_from_slice(&okm[0..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..80]);
        okm.zeroize();

        Self {
            aes_key,
            mac_key,
            iv,
        }
    }

    /// AES-256-CBC with PKCS#7 padding. Infallible; empty plaintext encrypts
    /// to one padding block.
    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256CbcEnc::new((&*self.aes_key).into(), (&*self.iv).into());
        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypts and unpads. A padding failure is reported as a MAC failure
    /// so that callers never expose a padding oracle.
    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = Aes256CbcDec::new((&*self.aes_key).into(), (&*self.iv).into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::BadMessageMac)
    }

    /// Truncated HMAC-SHA256 tag over `message`.
    pub(crate) fn mac(&self, message: &[u8]) -> MessageMac {
        let mut hmac = <HmacSha256 as Mac>::new_from_slice(self.mac_key.as_slice())
            .expect("HMAC initialization failed");
        hmac.update(message);
        let digest = hmac.finalize().into_bytes();

        let mut tag = [0u8; MAC_LENGTH];
        tag.copy_from_slice(&digest[..MAC_LENGTH]);
        tag
    }

    /// Constant-time verification of a truncated tag.
    pub(crate) fn verify_mac(&self, message: &[u8], tag: &[u8]) -> Result<(), Error> {
        let mut hmac = <HmacSha256 as Mac>::new_from_slice(self.mac_key.as_slice())
            .expect("HMAC initialization failed");
        hmac.update(message);
        hmac.verify_truncated_left(tag)
            .map_err(|_| Error::BadMessageMac)
    }
}

impl Zeroize for MessageKeys {
    fn zeroize(&mut self) {
        self.aes_key.zeroize();
        self.mac_key.zeroize();
        self.iv.zeroize();
    }
}

impl ZeroizeOnDrop for MessageKeys {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let keys = MessageKeys::derive(&[7u8; 32], b"TEST_KEYS");

        let plaintext = b"an olm-shaped payload";
        let ciphertext = keys.encrypt(plaintext);
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());

        let decrypted = keys.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn test_empty_plaintext_produces_nonempty_ciphertext() {
        let keys = MessageKeys::derive(&[7u8; 32], b"TEST_KEYS");

        let ciphertext = keys.encrypt(b"");
        assert_eq!(ciphertext.len(), 16);
        assert_eq!(keys.decrypt(&ciphertext).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_mac_verification() {
        let keys = MessageKeys::derive(&[7u8; 32], b"TEST_KEYS");

        let tag = keys.mac(b"message");
        assert!(keys.verify_mac(b"message", &tag).is_ok());
        assert_eq!(
            keys.verify_mac(b"other message", &tag),
            Err(Error::BadMessageMac)
        );
    }

    #[test]
    fn test_different_infos_derive_different_keys() {
        let a = MessageKeys::derive(&[7u8; 32], b"DOMAIN_A");
        let b = MessageKeys::derive(&[7u8; 32], b"DOMAIN_B");

        let ciphertext = a.encrypt(b"payload");
        assert!(b.decrypt(&ciphertext).is_err() || b.decrypt(&ciphertext).unwrap() != b"payload");
    }
}
