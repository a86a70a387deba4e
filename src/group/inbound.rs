use crate::Error;
use crate::cipher::MessageKeys;
use crate::group::MESSAGE_KEYS_INFO;
use crate::group::message::{GroupMessage, SessionKey};
use crate::group::outbound::{ratchet_from_parts, ratchet_to_parts};
use crate::group::ratchet::GroupRatchet;
use crate::pickle::{pickle, unpickle};
use crate::types::{base64_decode, base64_encode, verifying_key_from_bytes};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The receiving half of a group session.
///
/// Initialized from a sender's exported ratchet state, it can decrypt every
/// message whose index is at or past that state's index, and nothing
/// earlier; the hash ratchet cannot run backward.
pub struct InboundGroupSession {
    /// The state this receiver was given, kept immutable so that any index
    /// at or past [`first_known_index`] can be re-derived and re-exported.
    ///
    /// [`first_known_index`]: InboundGroupSession::first_known_index
    initial_ratchet: GroupRatchet,
    /// The furthest state reached so far; in-order decryption advances from
    /// here instead of replaying from the initial state.
    latest_ratchet: GroupRatchet,
    signing_key: VerifyingKey,
    signing_key_verified: bool,
}

impl core::fmt::Debug for InboundGroupSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InboundGroupSession").finish_non_exhaustive()
    }
}

impl InboundGroupSession {
    /// Initializes from a signed session key produced by
    /// [`OutboundGroupSession::session_key`].
    ///
    /// [`OutboundGroupSession::session_key`]: crate::OutboundGroupSession::session_key
    pub fn new(session_key: &str) -> Result<Self, Error> {
        let bytes = base64_decode(session_key)?;
        let session_key = SessionKey::from_signed_bytes(&bytes)?;

        // The export carried a valid signature by the embedded key.
        Ok(Self::from_session_key(session_key, true))
    }

    /// Initializes from an unsigned export produced by
    /// [`InboundGroupSession::export`], for hand-off between devices. The
    /// signing key stays unverified until a message verifies against it.
    pub fn import(exported_key: &str) -> Result<Self, Error> {
        let bytes = base64_decode(exported_key)?;
        let session_key = SessionKey::from_export_bytes(&bytes)?;

        Ok(Self::from_session_key(session_key, false))
    }

    fn from_session_key(session_key: SessionKey, verified: bool) -> Self {
        let ratchet = GroupRatchet::from_bytes(&session_key.ratchet, session_key.message_index);

        Self {
            initial_ratchet: ratchet.clone(),
            latest_ratchet: ratchet,
            signing_key: session_key.signing_key,
            signing_key_verified: verified,
        }
    }

    /// The same identifier [`OutboundGroupSession::session_id`] reports for
    /// the sending half.
    ///
    /// [`OutboundGroupSession::session_id`]: crate::OutboundGroupSession::session_id
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.as_bytes())
    }

    /// The earliest message index this session can decrypt.
    pub fn first_known_index(&self) -> u32 {
        self.initial_ratchet.counter()
    }

    /// Whether the signing key has been proven: either the session key was
    /// itself signed, or a message has since verified against it.
    pub fn is_verified(&self) -> bool {
        self.signing_key_verified
    }

    /// Decrypts a base64 group message, returning the plaintext and the
    /// message index. Out-of-order and repeated indices at or past
    /// [`InboundGroupSession::first_known_index`] are fine; anything
    /// earlier fails with [`Error::UnknownMessageIndex`].
    pub fn decrypt(&mut self, message: &str) -> Result<(Vec<u8>, u32), Error> {
        let bytes = base64_decode(message)?;
        let (parsed, spans) = GroupMessage::decode(&bytes)?;

        self.signing_key
            .verify_strict(spans.signed, &spans.signature)
            .map_err(|_| Error::SignatureMismatch)?;

        if parsed.message_index < self.first_known_index() {
            return Err(Error::UnknownMessageIndex);
        }

        let ratchet = self.ratchet_at(parsed.message_index);
        let keys = MessageKeys::derive(&ratchet.as_bytes(), MESSAGE_KEYS_INFO);
        keys.verify_mac(spans.mac_covered, spans.mac)?;
        let plaintext = keys.decrypt(&parsed.ciphertext)?;

        // Commit only after the message authenticated.
        if ratchet.counter() >= self.latest_ratchet.counter() {
            self.latest_ratchet = ratchet;
        }
        self.signing_key_verified = true;

        Ok((plaintext, parsed.message_index))
    }

    /// Derives the ratchet state at `index` from the nearest anchor at or
    /// below it. The caller guarantees `index >= first_known_index`.
    fn ratchet_at(&self, index: u32) -> GroupRatchet {
        let anchor = if index >= self.latest_ratchet.counter() {
            &self.latest_ratchet
        } else {
            &self.initial_ratchet
        };

        let mut ratchet = anchor.clone();
        if index > ratchet.counter() {
            ratchet.advance_to(index);
        }
        ratchet
    }

    /// Re-exports the ratchet state at `index` in the unsigned hand-off
    /// format. Fails with [`Error::UnknownMessageIndex`] for indices before
    /// [`InboundGroupSession::first_known_index`].
    pub fn export(&self, index: u32) -> Result<String, Error> {
        if index < self.first_known_index() {
            return Err(Error::UnknownMessageIndex);
        }

        let ratchet = self.ratchet_at(index);
        let session_key = SessionKey {
            message_index: index,
            ratchet: ratchet.as_bytes(),
            signing_key: self.signing_key,
        };

        Ok(base64_encode(session_key.to_export_bytes()))
    }

    /// Serializes the session into an encrypted, authenticated blob.
    pub fn pickle(&self, key: &[u8]) -> Result<String, Error> {
        pickle(&InboundGroupSessionPickle::from(self), key)
    }

    /// Restores a session from [`InboundGroupSession::pickle`] output. A
    /// wrong key fails with [`Error::BadSessionKey`].
    pub fn from_pickle(key: &[u8], pickle: &str) -> Result<Self, Error> {
        let record: InboundGroupSessionPickle = unpickle(pickle, key, Error::BadSessionKey)?;
        Self::try_from(record)
    }

    /// Destroys the session, zeroizing its key material. Consuming `self`
    /// makes use after clearing impossible.
    pub fn clear(self) {}
}

impl Zeroize for InboundGroupSession {
    fn zeroize(&mut self) {
        self.initial_ratchet.zeroize();
        self.latest_ratchet.zeroize();
    }
}

impl ZeroizeOnDrop for InboundGroupSession {}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct InboundGroupSessionPickle {
    initial_ratchet: [[u8; 32]; 4],
    initial_counter: u32,
    latest_ratchet: [[u8; 32]; 4],
    latest_counter: u32,
    signing_key: [u8; 32],
    signing_key_verified: bool,
}

impl From<&InboundGroupSession> for InboundGroupSessionPickle {
    fn from(session: &InboundGroupSession) -> Self {
        Self {
            initial_ratchet: ratchet_to_parts(session.initial_ratchet.as_bytes()),
            initial_counter: session.initial_ratchet.counter(),
            latest_ratchet: ratchet_to_parts(session.latest_ratchet.as_bytes()),
            latest_counter: session.latest_ratchet.counter(),
            signing_key: *session.signing_key.as_bytes(),
            signing_key_verified: session.signing_key_verified,
        }
    }
}

impl TryFrom<InboundGroupSessionPickle> for InboundGroupSession {
    type Error = Error;

    fn try_from(record: InboundGroupSessionPickle) -> Result<Self, Error> {
        let signing_key =
            verifying_key_from_bytes(&record.signing_key).map_err(|_| Error::CorruptPickle)?;

        Ok(Self {
            initial_ratchet: GroupRatchet::from_bytes(
                &ratchet_from_parts(&record.initial_ratchet),
                record.initial_counter,
            ),
            latest_ratchet: GroupRatchet::from_bytes(
                &ratchet_from_parts(&record.latest_ratchet),
                record.latest_counter,
            ),
            signing_key,
            signing_key_verified: record.signing_key_verified,
        })
    }
}
