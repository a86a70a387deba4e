use crate::Error;
use crate::types::{Curve25519PublicKey, Curve25519SecretKey};
use rand::TryRngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed capacity of the one-time key pool.
pub(crate) const MAX_ONE_TIME_KEYS: usize = 100;

pub(crate) struct OneTimeKey {
    pub(crate) id: u32,
    pub(crate) key: Curve25519SecretKey,
    pub(crate) published: bool,
}

impl OneTimeKey {
    pub(crate) fn public_key(&self) -> Curve25519PublicKey {
        self.key.public_key()
    }
}

impl Zeroize for OneTimeKey {
    fn zeroize(&mut self) {
        self.key.zeroize();
    }
}

impl ZeroizeOnDrop for OneTimeKey {}

/// Pool of unconsumed one-time keys, oldest first. Ids are assigned once
/// and never reused for the life of the account.
pub(crate) struct OneTimeKeyStore {
    pub(crate) keys: Vec<OneTimeKey>,
    pub(crate) next_id: u32,
}

impl OneTimeKeyStore {
    pub(crate) fn new() -> Self {
        Self {
            keys: Vec::new(),
            next_id: 0,
        }
    }

    /// Generates `count` fresh keys. The draw is atomic: a random source
    /// failure part way through adds nothing to the pool. When the pool
    /// would overflow, the oldest keys are discarded first.
    pub(crate) fn generate<R: TryRngCore>(&mut self, count: usize, rng: &mut R) -> Result<(), Error> {
        let mut fresh = Vec::with_capacity(count);
        for offset in 0..count {
            fresh.push(OneTimeKey {
                id: self.next_id.wrapping_add(offset as u32),
                key: Curve25519SecretKey::generate(rng)?,
                published: false,
            });
        }

        self.next_id = self.next_id.wrapping_add(count as u32);
        self.keys.append(&mut fresh);

        if self.keys.len() > MAX_ONE_TIME_KEYS {
            let excess = self.keys.len() - MAX_ONE_TIME_KEYS;
            self.keys.drain(0..excess);
        }

        Ok(())
    }

    pub(crate) fn unpublished(&self) -> impl Iterator<Item = &OneTimeKey> {
        self.keys.iter().filter(|key| !key.published)
    }

    pub(crate) fn mark_as_published(&mut self) {
        for key in &mut self.keys {
            key.published = true;
        }
    }

    pub(crate) fn find(&self, public_key: &Curve25519PublicKey) -> Option<&Curve25519SecretKey> {
        self.keys
            .iter()
            .find(|key| key.public_key() == *public_key)
            .map(|key| &key.key)
    }

    /// Removes the key with the given public half from the pool.
    pub(crate) fn remove(&mut self, public_key: &Curve25519PublicKey) -> Result<(), Error> {
        let position = self
            .keys
            .iter()
            .position(|key| key.public_key() == *public_key)
            .ok_or(Error::KeyNotFound)?;

        self.keys.remove(position);
        Ok(())
    }
}

impl Zeroize for OneTimeKeyStore {
    fn zeroize(&mut self) {
        for key in &mut self.keys {
            key.zeroize();
        }
        self.keys.clear();
    }
}

impl ZeroizeOnDrop for OneTimeKeyStore {}
