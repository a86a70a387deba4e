//! Long-lived device identity: the Curve25519 identity key, the Ed25519
//! signing key and the pool of one-time keys offered for session setup.

mod one_time_keys;

pub(crate) use one_time_keys::MAX_ONE_TIME_KEYS;
use one_time_keys::{OneTimeKey, OneTimeKeyStore};

use crate::Error;
use crate::pickle::{pickle, unpickle};
use crate::session::{PreKeyMessage, Session};
use crate::types::{
    Curve25519PublicKey, Curve25519SecretKey, base64_decode, base64_encode, signing_key_from_bytes,
};
use ed25519_dalek::{Signer, SigningKey};
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The long-term public keys of an [`Account`], in the shape they are
/// published to a key server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdentityKeys {
    pub curve25519: String,
    pub ed25519: String,
}

/// The unpublished one-time keys of an [`Account`], keyed by their id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OneTimeKeys {
    pub curve25519: BTreeMap<String, String>,
}

/// A one-time key wrapped with the signatures a key server expects.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedOneTimeKey {
    pub key: String,
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,
}

fn key_id_to_base64(id: u32) -> String {
    base64_encode(id.to_be_bytes())
}

/// A device's cryptographic identity.
///
/// Holds the identity key pair, the signing key pair and a bounded pool of
/// one-time keys, and is the entry point for establishing [`Session`]s.
///
/// An account is not safe for concurrent mutation; callers serialize access.
pub struct Account {
    identity_key: Curve25519SecretKey,
    signing_key: SigningKey,
    one_time_keys: OneTimeKeyStore,
}

impl Account {
    /// Creates an account with fresh identity and signing keys, drawing
    /// randomness from the operating system.
    pub fn new() -> Result<Self, Error> {
        Self::new_with_rng(&mut OsRng)
    }

    /// Like [`Account::new`] with a caller-supplied random source. A failed
    /// or short draw aborts without constructing anything.
    pub fn new_with_rng<R: TryRngCore>(rng: &mut R) -> Result<Self, Error> {
        let identity_key = Curve25519SecretKey::generate(rng)?;

        let mut seed = Box::new([0u8; 32]);
        rng.try_fill_bytes(seed.as_mut_slice())
            .map_err(|_| Error::RandomSourceExhausted)?;
        let signing_key = signing_key_from_bytes(&seed);
        seed.zeroize();

        Ok(Self {
            identity_key,
            signing_key,
            one_time_keys: OneTimeKeyStore::new(),
        })
    }

    /// The public identity keys, as base64 strings.
    pub fn identity_keys(&self) -> IdentityKeys {
        IdentityKeys {
            curve25519: self.identity_key.public_key().to_base64(),
            ed25519: base64_encode(self.signing_key.verifying_key().as_bytes()),
        }
    }

    /// Signs `message` with the account's Ed25519 key, returning the
    /// signature as base64.
    pub fn sign(&self, message: &[u8]) -> String {
        base64_encode(self.signing_key.sign(message).to_bytes())
    }

    /// Generates `count` one-time keys using the operating system's random
    /// source. See [`Account::generate_one_time_keys_with_rng`].
    pub fn generate_one_time_keys(&mut self, count: usize) -> Result<(), Error> {
        self.generate_one_time_keys_with_rng(count, &mut OsRng)
    }

    /// Generates `count` one-time keys. If the pool would exceed
    /// [`Account::max_number_of_one_time_keys`], the oldest keys are
    /// discarded first. A random source failure leaves the pool unchanged.
    pub fn generate_one_time_keys_with_rng<R: TryRngCore>(
        &mut self,
        count: usize,
        rng: &mut R,
    ) -> Result<(), Error> {
        self.one_time_keys.generate(count, rng)
    }

    /// The one-time keys that have not been published yet, keyed by id.
    pub fn one_time_keys(&self) -> OneTimeKeys {
        OneTimeKeys {
            curve25519: self
                .one_time_keys
                .unpublished()
                .map(|key| (key_id_to_base64(key.id), key.public_key().to_base64()))
                .collect(),
        }
    }

    /// The unpublished one-time keys in the signed upload format: each key
    /// is wrapped in a JSON object and signed with the account's Ed25519
    /// key under `user_id`/`device_id`.
    pub fn signed_one_time_keys(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> BTreeMap<String, SignedOneTimeKey> {
        self.one_time_keys
            .unpublished()
            .map(|key| {
                let key_b64 = key.public_key().to_base64();
                let payload = serde_json::json!({ "key": key_b64 }).to_string();

                let mut device_signatures = BTreeMap::new();
                device_signatures
                    .insert(format!("ed25519:{device_id}"), self.sign(payload.as_bytes()));
                let mut signatures = BTreeMap::new();
                signatures.insert(user_id.to_owned(), device_signatures);

                (
                    format!("signed_curve25519:{}", key_id_to_base64(key.id)),
                    SignedOneTimeKey {
                        key: key_b64,
                        signatures,
                    },
                )
            })
            .collect()
    }

    /// Marks every key currently in the pool as published, removing it from
    /// future [`Account::one_time_keys`] bundles.
    pub fn mark_keys_as_published(&mut self) {
        self.one_time_keys.mark_as_published();
    }

    /// Deletes the one-time key that `session`'s handshake consumed.
    /// Fails with [`Error::KeyNotFound`] if that key is not in the pool.
    pub fn remove_one_time_keys(&mut self, session: &Session) -> Result<(), Error> {
        self.one_time_keys
            .remove(&session.session_keys.one_time_key)
    }

    /// The fixed capacity of the one-time key pool.
    pub fn max_number_of_one_time_keys(&self) -> usize {
        MAX_ONE_TIME_KEYS
    }

    /// Establishes an outbound session to the device owning
    /// `their_identity_key`, consuming one of its published one-time keys.
    pub fn create_outbound_session(
        &self,
        their_identity_key: &str,
        their_one_time_key: &str,
    ) -> Result<Session, Error> {
        self.create_outbound_session_with_rng(their_identity_key, their_one_time_key, &mut OsRng)
    }

    /// Like [`Account::create_outbound_session`] with a caller-supplied
    /// random source.
    pub fn create_outbound_session_with_rng<R: TryRngCore>(
        &self,
        their_identity_key: &str,
        their_one_time_key: &str,
        rng: &mut R,
    ) -> Result<Session, Error> {
        if their_identity_key.is_empty() {
            return Err(Error::InvalidArgument("their identity key is empty"));
        }
        if their_one_time_key.is_empty() {
            return Err(Error::InvalidArgument("their one-time key is empty"));
        }

        let their_identity_key = Curve25519PublicKey::from_base64(their_identity_key)?;
        let their_one_time_key = Curve25519PublicKey::from_base64(their_one_time_key)?;

        Session::new_outbound(&self.identity_key, their_identity_key, their_one_time_key, rng)
    }

    /// Establishes an inbound session from a base64 pre-key envelope
    /// addressed to one of this account's one-time keys.
    ///
    /// The one-time key is looked up but not removed; callers delete it with
    /// [`Account::remove_one_time_keys`] once the session is kept.
    pub fn create_inbound_session(&self, message: &str) -> Result<Session, Error> {
        self.inbound_session(None, message)
    }

    /// Like [`Account::create_inbound_session`], additionally requiring the
    /// envelope's embedded identity key to equal `their_identity_key`.
    pub fn create_inbound_session_from(
        &self,
        their_identity_key: &str,
        message: &str,
    ) -> Result<Session, Error> {
        let their_identity_key = Curve25519PublicKey::from_base64(their_identity_key)?;
        self.inbound_session(Some(their_identity_key), message)
    }

    fn inbound_session(
        &self,
        their_identity_key: Option<Curve25519PublicKey>,
        message: &str,
    ) -> Result<Session, Error> {
        if message.is_empty() {
            return Err(Error::InvalidArgument("pre-key message is empty"));
        }

        let bytes = base64_decode(message)?;
        let envelope = PreKeyMessage::decode(&bytes)?;

        if let Some(expected) = their_identity_key
            && expected != envelope.identity_key
        {
            return Err(Error::BadMessageKeyId);
        }

        let one_time_key = self
            .one_time_keys
            .find(&envelope.one_time_key)
            .ok_or(Error::BadMessageKeyId)?;

        Session::new_inbound(&self.identity_key, one_time_key, &envelope)
    }

    /// Serializes the account into an encrypted, authenticated blob.
    pub fn pickle(&self, key: &[u8]) -> Result<String, Error> {
        pickle(&AccountPickle::from(self), key)
    }

    /// Restores an account from [`Account::pickle`] output. A wrong key
    /// fails with [`Error::BadAccountKey`].
    pub fn from_pickle(key: &[u8], pickle: &str) -> Result<Self, Error> {
        let record: AccountPickle = unpickle(pickle, key, Error::BadAccountKey)?;
        Ok(Self::from(record))
    }

    /// Destroys the account, zeroizing its key material. Consuming `self`
    /// makes use after clearing impossible.
    pub fn clear(self) {}
}

impl Zeroize for Account {
    fn zeroize(&mut self) {
        self.identity_key.zeroize();
        self.one_time_keys.zeroize();
        // SigningKey zeroizes itself on drop.
    }
}

impl ZeroizeOnDrop for Account {}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct OneTimeKeyPickle {
    id: u32,
    key: [u8; 32],
    published: bool,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct AccountPickle {
    identity_key: [u8; 32],
    signing_key: [u8; 32],
    one_time_keys: Vec<OneTimeKeyPickle>,
    next_key_id: u32,
}

impl From<&Account> for AccountPickle {
    fn from(account: &Account) -> Self {
        Self {
            identity_key: account.identity_key.to_bytes(),
            signing_key: account.signing_key.to_bytes(),
            one_time_keys: account
                .one_time_keys
                .keys
                .iter()
                .map(|key| OneTimeKeyPickle {
                    id: key.id,
                    key: key.key.to_bytes(),
                    published: key.published,
                })
                .collect(),
            next_key_id: account.one_time_keys.next_id,
        }
    }
}

impl From<AccountPickle> for Account {
    fn from(record: AccountPickle) -> Self {
        Self {
            identity_key: Curve25519SecretKey::from(record.identity_key),
            signing_key: signing_key_from_bytes(&record.signing_key),
            one_time_keys: OneTimeKeyStore {
                keys: record
                    .one_time_keys
                    .iter()
                    .map(|key| OneTimeKey {
                        id: key.id,
                        key: Curve25519SecretKey::from(key.key),
                        published: key.published,
                    })
                    .collect(),
                next_id: record.next_key_id,
            },
        }
    }
}
