use crate::Error;
use crate::types::{base64_decode, base64_encode};
use rand::TryRngCore;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

/// A Curve25519 public key used for Diffie-Hellman key agreement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Curve25519PublicKey(PublicKey);

impl Curve25519PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_base64(self) -> String {
        base64_encode(self.as_bytes())
    }

    /// Parses a key from its unpadded base64 form.
    pub fn from_base64(input: &str) -> Result<Self, Error> {
        let bytes = base64_decode(input).map_err(|_| Error::InvalidKey)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidKey)?;

        Ok(Self(PublicKey::from(bytes)))
    }
}

impl From<[u8; 32]> for Curve25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }
}

impl From<PublicKey> for Curve25519PublicKey {
    fn from(value: PublicKey) -> Self {
        Self(value)
    }
}

#[derive(Clone)]
pub(crate) struct Curve25519SecretKey(StaticSecret);

impl Curve25519SecretKey {
    /// Draws 32 bytes from the supplied random source. A short or failed
    /// draw aborts without constructing a key.
    pub(crate) fn generate<R: TryRngCore>(rng: &mut R) -> Result<Self, Error> {
        let mut seed = Box::new([0u8; 32]);
        rng.try_fill_bytes(seed.as_mut_slice())
            .map_err(|_| Error::RandomSourceExhausted)?;

        let key = Self(StaticSecret::from(*seed));
        seed.zeroize();

        Ok(key)
    }

    pub(crate) fn dh(&self, public_key: &Curve25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(&PublicKey::from(public_key.to_bytes()))
    }

    pub(crate) fn public_key(&self) -> Curve25519PublicKey {
        Curve25519PublicKey::from(PublicKey::from(&self.0))
    }

    pub(crate) fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<[u8; 32]> for Curve25519SecretKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }
}

impl Zeroize for Curve25519SecretKey {
    fn zeroize(&mut self) {
        self.0.zeroize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_base64_round_trip() {
        let key = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let public = key.public_key();

        let encoded = public.to_base64();
        let decoded = Curve25519PublicKey::from_base64(&encoded).unwrap();

        assert_eq!(public, decoded);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert_eq!(
            Curve25519PublicKey::from_base64("not base64!!"),
            Err(Error::InvalidKey)
        );
        // Valid base64, wrong length
        assert_eq!(
            Curve25519PublicKey::from_base64("AAAA"),
            Err(Error::InvalidKey)
        );
    }

    #[test]
    fn test_dh_agreement() {
        let a = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let b = Curve25519SecretKey::generate(&mut OsRng).unwrap();

        let ab = a.dh(&b.public_key());
        let ba = b.dh(&a.public_key());

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }
}
