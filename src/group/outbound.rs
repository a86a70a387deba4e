use crate::Error;
use crate::cipher::MessageKeys;
use crate::group::MESSAGE_KEYS_INFO;
use crate::group::message::{GroupMessage, SessionKey};
use crate::group::ratchet::{GroupRatchet, RATCHET_LENGTH};
use crate::pickle::{pickle, unpickle};
use crate::types::{base64_encode, signing_key_from_bytes};
use ed25519_dalek::{Signer, SigningKey};
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The sending half of a group session.
///
/// Owns the hash ratchet and the Ed25519 key that signs every message. The
/// current ratchet state is exported with [`session_key`] and handed to
/// participants, who feed it to [`InboundGroupSession`].
///
/// [`session_key`]: OutboundGroupSession::session_key
/// [`InboundGroupSession`]: crate::InboundGroupSession
pub struct OutboundGroupSession {
    ratchet: GroupRatchet,
    signing_key: SigningKey,
}

impl OutboundGroupSession {
    /// Creates a session with a fresh ratchet and signing key, drawing
    /// randomness from the operating system.
    pub fn new() -> Result<Self, Error> {
        Self::new_with_rng(&mut OsRng)
    }

    /// Like [`OutboundGroupSession::new`] with a caller-supplied random
    /// source.
    pub fn new_with_rng<R: TryRngCore>(rng: &mut R) -> Result<Self, Error> {
        let ratchet = GroupRatchet::generate(rng)?;

        let mut seed = Box::new([0u8; 32]);
        rng.try_fill_bytes(seed.as_mut_slice())
            .map_err(|_| Error::RandomSourceExhausted)?;
        let signing_key = signing_key_from_bytes(&seed);
        seed.zeroize();

        Ok(Self {
            ratchet,
            signing_key,
        })
    }

    /// An identifier for the session: the base64 public signing key. Both
    /// ends of the session derive the same id.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.verifying_key().as_bytes())
    }

    /// The index the next encrypted message will use.
    pub fn message_index(&self) -> u32 {
        self.ratchet.counter()
    }

    /// Encrypts `plaintext` at the current ratchet index and advances the
    /// ratchet. The index cannot be reused or rolled back.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> String {
        let keys = MessageKeys::derive(&self.ratchet.as_bytes(), MESSAGE_KEYS_INFO);

        let message = GroupMessage {
            message_index: self.ratchet.counter(),
            ciphertext: keys.encrypt(plaintext),
        };

        let mut bytes = message.to_mac_bytes();
        let tag = keys.mac(&bytes);
        bytes.extend_from_slice(&tag);
        let signature = self.signing_key.sign(&bytes);
        bytes.extend_from_slice(&signature.to_bytes());

        self.ratchet.advance();

        base64_encode(bytes)
    }

    /// Exports the current ratchet state, signed, for handing to a new
    /// participant. A holder can decrypt from [`message_index`] onwards.
    ///
    /// [`message_index`]: OutboundGroupSession::message_index
    pub fn session_key(&self) -> String {
        let session_key = SessionKey {
            message_index: self.ratchet.counter(),
            ratchet: self.ratchet.as_bytes(),
            signing_key: self.signing_key.verifying_key(),
        };

        let mut bytes = session_key.to_signed_prefix();
        let signature = self.signing_key.sign(&bytes);
        bytes.extend_from_slice(&signature.to_bytes());

        base64_encode(bytes)
    }

    /// Serializes the session into an encrypted, authenticated blob.
    pub fn pickle(&self, key: &[u8]) -> Result<String, Error> {
        pickle(&OutboundGroupSessionPickle::from(self), key)
    }

    /// Restores a session from [`OutboundGroupSession::pickle`] output. A
    /// wrong key fails with [`Error::BadSessionKey`].
    pub fn from_pickle(key: &[u8], pickle: &str) -> Result<Self, Error> {
        let record: OutboundGroupSessionPickle = unpickle(pickle, key, Error::BadSessionKey)?;
        Ok(Self::from(record))
    }

    /// Destroys the session, zeroizing its key material. Consuming `self`
    /// makes use after clearing impossible.
    pub fn clear(self) {}
}

impl Zeroize for OutboundGroupSession {
    fn zeroize(&mut self) {
        self.ratchet.zeroize();
        // SigningKey zeroizes itself on drop.
    }
}

impl ZeroizeOnDrop for OutboundGroupSession {}

pub(crate) fn ratchet_to_parts(bytes: [u8; RATCHET_LENGTH]) -> [[u8; 32]; 4] {
    let mut parts = [[0u8; 32]; 4];
    for (part, chunk) in parts.iter_mut().zip(bytes.chunks_exact(32)) {
        part.copy_from_slice(chunk);
    }
    parts
}

pub(crate) fn ratchet_from_parts(parts: &[[u8; 32]; 4]) -> [u8; RATCHET_LENGTH] {
    let mut bytes = [0u8; RATCHET_LENGTH];
    for (chunk, part) in bytes.chunks_exact_mut(32).zip(parts) {
        chunk.copy_from_slice(part);
    }
    bytes
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct OutboundGroupSessionPickle {
    ratchet: [[u8; 32]; 4],
    counter: u32,
    signing_key: [u8; 32],
}

impl From<&OutboundGroupSession> for OutboundGroupSessionPickle {
    fn from(session: &OutboundGroupSession) -> Self {
        Self {
            ratchet: ratchet_to_parts(session.ratchet.as_bytes()),
            counter: session.ratchet.counter(),
            signing_key: session.signing_key.to_bytes(),
        }
    }
}

impl From<OutboundGroupSessionPickle> for OutboundGroupSession {
    fn from(record: OutboundGroupSessionPickle) -> Self {
        Self {
            ratchet: GroupRatchet::from_bytes(&ratchet_from_parts(&record.ratchet), record.counter),
            signing_key: signing_key_from_bytes(&record.signing_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_index_increments_per_encrypt() {
        let mut session = OutboundGroupSession::new().unwrap();
        assert_eq!(session.message_index(), 0);

        session.encrypt(b"one");
        session.encrypt(b"two");
        assert_eq!(session.message_index(), 2);
    }

    #[test]
    fn test_session_key_reflects_current_index() {
        let mut session = OutboundGroupSession::new().unwrap();
        session.encrypt(b"skip me");

        let bytes = crate::types::base64_decode(&session.session_key()).unwrap();
        let session_key = SessionKey::from_signed_bytes(&bytes).unwrap();
        assert_eq!(session_key.message_index, 1);
    }

    #[test]
    fn test_pickle_round_trip() {
        let mut session = OutboundGroupSession::new().unwrap();
        session.encrypt(b"advance");

        let blob = session.pickle(b"group key").unwrap();
        let restored = OutboundGroupSession::from_pickle(b"group key", &blob).unwrap();

        assert_eq!(restored.session_id(), session.session_id());
        assert_eq!(restored.message_index(), session.message_index());
        assert_eq!(restored.session_key(), session.session_key());
    }

    #[test]
    fn test_wrong_pickle_key_fails() {
        let session = OutboundGroupSession::new().unwrap();
        let blob = session.pickle(b"right").unwrap();

        assert!(matches!(
            OutboundGroupSession::from_pickle(b"wrong", &blob),
            Err(Error::BadSessionKey)
        ));
    }
}
