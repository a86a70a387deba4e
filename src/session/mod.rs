//! Two-party encrypted sessions built on a triple Diffie-Hellman handshake
//! and the double ratchet.

mod chain;
mod messages;
mod ratchet;

pub use messages::MessageType;
pub(crate) use messages::{PreKeyMessage, RatchetMessage};

use crate::Error;
use crate::pickle::{pickle, unpickle};
use crate::session::chain::Chain;
use crate::session::ratchet::{DoubleRatchet, ReceiverChain, SkippedMessageKey};
use crate::types::{Curve25519PublicKey, Curve25519SecretKey, base64_decode, base64_encode};
use hkdf::Hkdf;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

const ROOT_INFO: &[u8] = b"OLM_ROOT";

/// The three public keys that identify a session: the initiator's identity
/// key, the initiator's ephemeral base key and the responder's one-time key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionKeys {
    pub(crate) identity_key: Curve25519PublicKey,
    pub(crate) base_key: Curve25519PublicKey,
    pub(crate) one_time_key: Curve25519PublicKey,
}

impl SessionKeys {
    fn session_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.identity_key.as_bytes());
        hasher.update(self.base_key.as_bytes());
        hasher.update(self.one_time_key.as_bytes());

        base64_encode(hasher.finalize())
    }
}

/// Derives the 64-byte shared secret (root key and initial chain key) from
/// the three handshake DH outputs.
fn kdf_shared_secret(parts: [x25519_dalek::SharedSecret; 3]) -> Box<[u8; 64]> {
    let mut ikm = Box::new([0u8; 96]);
    ikm[0..32].copy_from_slice(parts[0].as_bytes());
    ikm[32..64].copy_from_slice(parts[1].as_bytes());
    ikm[64..96].copy_from_slice(parts[2].as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, ikm.as_slice());
    let mut shared_secret = Box::new([0u8; 64]);
    hkdf.expand(ROOT_INFO, shared_secret.as_mut_slice())
        .expect("HKDF expansion failed");
    ikm.zeroize();

    shared_secret
}

/// An established two-party session.
///
/// Constructed through [`Account::create_outbound_session`] on the
/// initiating side or [`Account::create_inbound_session`] on the responding
/// side; both ends then exchange messages with [`encrypt`] and [`decrypt`].
///
/// A session is not safe for concurrent mutation; callers serialize access.
///
/// [`Account::create_outbound_session`]: crate::Account::create_outbound_session
/// [`Account::create_inbound_session`]: crate::Account::create_inbound_session
/// [`encrypt`]: Session::encrypt
/// [`decrypt`]: Session::decrypt
pub struct Session {
    pub(crate) session_keys: SessionKeys,
    ratchet: DoubleRatchet,
    received_message: bool,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new_outbound<R: TryRngCore>(
        identity_key: &Curve25519SecretKey,
        their_identity_key: Curve25519PublicKey,
        their_one_time_key: Curve25519PublicKey,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let base_key = Curve25519SecretKey::generate(rng)?;
        let ratchet_key = Curve25519SecretKey::generate(rng)?;

        let shared_secret = kdf_shared_secret([
            identity_key.dh(&their_one_time_key),
            base_key.dh(&their_identity_key),
            base_key.dh(&their_one_time_key),
        ]);

        let session_keys = SessionKeys {
            identity_key: identity_key.public_key(),
            base_key: base_key.public_key(),
            one_time_key: their_one_time_key,
        };

        Ok(Self {
            session_keys,
            ratchet: DoubleRatchet::new_outbound(shared_secret, ratchet_key),
            received_message: false,
        })
    }

    /// Establishes the responding side from a parsed pre-key envelope and
    /// the secret halves of the keys it references. The embedded ratchet
    /// message is decrypted as a consistency check; the message key it used
    /// stays available for a subsequent [`Session::decrypt`] call.
    pub(crate) fn new_inbound(
        identity_key: &Curve25519SecretKey,
        one_time_key: &Curve25519SecretKey,
        message: &PreKeyMessage,
    ) -> Result<Self, Error> {
        let shared_secret = kdf_shared_secret([
            one_time_key.dh(&message.identity_key),
            identity_key.dh(&message.base_key),
            one_time_key.dh(&message.base_key),
        ]);

        let (inner, _, _) = RatchetMessage::decode(&message.message)?;
        let ratchet = DoubleRatchet::new_inbound(shared_secret, inner.ratchet_key);

        // Authenticate the envelope before committing to the session. Run
        // against a throwaway copy so the message key is not consumed.
        let mut probe = ratchet.clone();
        probe.decrypt(&message.message)?;

        let session_keys = SessionKeys {
            identity_key: message.identity_key,
            base_key: message.base_key,
            one_time_key: message.one_time_key,
        };

        Ok(Self {
            session_keys,
            ratchet,
            // The consistency check above is a received message; this side
            // never needs to emit a pre-key envelope.
            received_message: true,
        })
    }

    /// An identifier shared by both ends of the session, derived from the
    /// three handshake public keys.
    pub fn session_id(&self) -> String {
        self.session_keys.session_id()
    }

    /// Whether this session has successfully decrypted at least one message.
    /// Until it has, [`Session::encrypt`] keeps emitting pre-key envelopes.
    pub fn has_received_message(&self) -> bool {
        self.received_message
    }

    /// Encrypts `plaintext`, returning the message type and the base64
    /// envelope. Empty plaintext is accepted.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<(MessageType, String), Error> {
        self.encrypt_with_rng(plaintext, &mut OsRng)
    }

    /// Like [`Session::encrypt`] with a caller-supplied random source. The
    /// source is only drawn from when a fresh ratchet key pair is needed,
    /// which happens at most once per received ratchet step.
    pub fn encrypt_with_rng<R: TryRngCore>(
        &mut self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<(MessageType, String), Error> {
        let message = self.ratchet.encrypt(plaintext, rng)?;

        if self.received_message {
            Ok((MessageType::Message, base64_encode(message)))
        } else {
            let envelope = PreKeyMessage {
                one_time_key: self.session_keys.one_time_key,
                base_key: self.session_keys.base_key,
                identity_key: self.session_keys.identity_key,
                message,
            };

            Ok((MessageType::PreKey, base64_encode(envelope.encode())))
        }
    }

    /// Decrypts a base64 envelope of the given type. On failure the session
    /// state is unchanged; on success the consumed message key is erased, so
    /// replaying the same envelope fails.
    pub fn decrypt(&mut self, message_type: MessageType, message: &str) -> Result<Vec<u8>, Error> {
        let bytes = base64_decode(message)?;

        let plaintext = match message_type {
            MessageType::PreKey => {
                let envelope = PreKeyMessage::decode(&bytes)?;
                let envelope_keys = SessionKeys {
                    identity_key: envelope.identity_key,
                    base_key: envelope.base_key,
                    one_time_key: envelope.one_time_key,
                };
                if envelope_keys != self.session_keys {
                    return Err(Error::BadMessageKeyId);
                }

                self.ratchet.decrypt(&envelope.message)?
            }
            MessageType::Message => self.ratchet.decrypt(&bytes)?,
        };

        self.received_message = true;
        Ok(plaintext)
    }

    /// Checks whether a pre-key envelope targets this session, without
    /// mutating any state. Fails only on malformed input.
    pub fn matches_inbound_session(&self, message: &str) -> Result<bool, Error> {
        let bytes = base64_decode(message)?;
        let envelope = PreKeyMessage::decode(&bytes)?;

        Ok(SessionKeys {
            identity_key: envelope.identity_key,
            base_key: envelope.base_key,
            one_time_key: envelope.one_time_key,
        } == self.session_keys)
    }

    /// Like [`Session::matches_inbound_session`], additionally requiring the
    /// envelope's identity key to equal `their_identity_key`.
    pub fn matches_inbound_session_from(
        &self,
        their_identity_key: &str,
        message: &str,
    ) -> Result<bool, Error> {
        let their_identity_key = Curve25519PublicKey::from_base64(their_identity_key)?;
        if their_identity_key != self.session_keys.identity_key {
            return Ok(false);
        }

        self.matches_inbound_session(message)
    }

    /// Serializes the session into an encrypted, authenticated blob.
    pub fn pickle(&self, key: &[u8]) -> Result<String, Error> {
        pickle(&SessionPickle::from(self), key)
    }

    /// Restores a session from [`Session::pickle`] output. A wrong key fails
    /// with [`Error::BadSessionKey`].
    pub fn from_pickle(key: &[u8], pickle: &str) -> Result<Self, Error> {
        let record: SessionPickle = unpickle(pickle, key, Error::BadSessionKey)?;
        Ok(Self::from(record))
    }

    /// Destroys the session, zeroizing its key material. Consuming `self`
    /// makes use after clearing impossible.
    pub fn clear(self) {}
}

impl Zeroize for Session {
    fn zeroize(&mut self) {
        self.ratchet.zeroize();
    }
}

impl ZeroizeOnDrop for Session {}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct ChainPickle {
    chain_key: [u8; 32],
    index: u32,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct ReceiverChainPickle {
    ratchet_key: [u8; 32],
    chain_key: [u8; 32],
    index: u32,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SkippedMessageKeyPickle {
    ratchet_key: [u8; 32],
    index: u32,
    message_key: [u8; 32],
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SessionPickle {
    identity_key: [u8; 32],
    base_key: [u8; 32],
    one_time_key: [u8; 32],
    root_key: [u8; 32],
    sending_ratchet_key: Option<[u8; 32]>,
    sending_chain: Option<ChainPickle>,
    receiver_chains: Vec<ReceiverChainPickle>,
    skipped_message_keys: Vec<SkippedMessageKeyPickle>,
    received_message: bool,
}

impl From<&Session> for SessionPickle {
    fn from(session: &Session) -> Self {
        let ratchet = &session.ratchet;

        Self {
            identity_key: session.session_keys.identity_key.to_bytes(),
            base_key: session.session_keys.base_key.to_bytes(),
            one_time_key: session.session_keys.one_time_key.to_bytes(),
            root_key: *ratchet.root_key,
            sending_ratchet_key: ratchet
                .sending_ratchet_key
                .as_ref()
                .map(Curve25519SecretKey::to_bytes),
            sending_chain: ratchet.sending_chain.as_ref().map(|chain| ChainPickle {
                chain_key: *chain.chain_key,
                index: chain.index,
            }),
            receiver_chains: ratchet
                .receiver_chains
                .iter()
                .map(|receiver| ReceiverChainPickle {
                    ratchet_key: receiver.ratchet_key.to_bytes(),
                    chain_key: *receiver.chain.chain_key,
                    index: receiver.chain.index,
                })
                .collect(),
            skipped_message_keys: ratchet
                .skipped_message_keys
                .iter()
                .map(|skipped| SkippedMessageKeyPickle {
                    ratchet_key: skipped.ratchet_key.to_bytes(),
                    index: skipped.index,
                    message_key: *skipped.message_key,
                })
                .collect(),
            received_message: session.received_message,
        }
    }
}

impl From<SessionPickle> for Session {
    fn from(record: SessionPickle) -> Self {
        let ratchet = DoubleRatchet {
            root_key: Box::new(record.root_key),
            sending_ratchet_key: record
                .sending_ratchet_key
                .map(Curve25519SecretKey::from),
            sending_chain: record.sending_chain.as_ref().map(|chain| Chain {
                chain_key: Box::new(chain.chain_key),
                index: chain.index,
            }),
            receiver_chains: record
                .receiver_chains
                .iter()
                .map(|receiver| ReceiverChain {
                    ratchet_key: Curve25519PublicKey::from(receiver.ratchet_key),
                    chain: Chain {
                        chain_key: Box::new(receiver.chain_key),
                        index: receiver.index,
                    },
                })
                .collect(),
            skipped_message_keys: record
                .skipped_message_keys
                .iter()
                .map(|skipped| SkippedMessageKey {
                    ratchet_key: Curve25519PublicKey::from(skipped.ratchet_key),
                    index: skipped.index,
                    message_key: Box::new(skipped.message_key),
                })
                .collect(),
        };

        Self {
            session_keys: SessionKeys {
                identity_key: Curve25519PublicKey::from(record.identity_key),
                base_key: Curve25519PublicKey::from(record.base_key),
                one_time_key: Curve25519PublicKey::from(record.one_time_key),
            },
            ratchet,
            received_message: record.received_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_sessions() -> (Session, Session) {
        let alice_identity = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let bob_identity = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let bob_one_time = Curve25519SecretKey::generate(&mut OsRng).unwrap();

        let mut alice = Session::new_outbound(
            &alice_identity,
            bob_identity.public_key(),
            bob_one_time.public_key(),
            &mut OsRng,
        )
        .unwrap();

        let (message_type, message) = alice.encrypt(b"establishment").unwrap();
        assert_eq!(message_type, MessageType::PreKey);

        let bytes = base64_decode(&message).unwrap();
        let envelope = PreKeyMessage::decode(&bytes).unwrap();
        let mut bob = Session::new_inbound(&bob_identity, &bob_one_time, &envelope).unwrap();

        assert_eq!(
            bob.decrypt(MessageType::PreKey, &message).unwrap(),
            b"establishment"
        );

        (alice, bob)
    }

    #[test]
    fn test_session_ids_agree() {
        let (alice, bob) = create_sessions();
        assert_eq!(alice.session_id(), bob.session_id());
    }

    #[test]
    fn test_pre_key_until_reply_received() {
        let (mut alice, mut bob) = create_sessions();

        // No reply yet, so the initiator keeps sending pre-key envelopes.
        let (message_type, _) = alice.encrypt(b"still handshaking").unwrap();
        assert_eq!(message_type, MessageType::PreKey);

        let (reply_type, reply) = bob.encrypt(b"ack").unwrap();
        assert_eq!(reply_type, MessageType::Message);
        assert_eq!(alice.decrypt(reply_type, &reply).unwrap(), b"ack");

        let (message_type, _) = alice.encrypt(b"settled").unwrap();
        assert_eq!(message_type, MessageType::Message);
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let (mut alice, mut bob) = create_sessions();

        let (message_type, message) = alice.encrypt(b"").unwrap();
        assert_eq!(bob.decrypt(message_type, &message).unwrap(), b"");
    }

    #[test]
    fn test_matches_inbound_session() {
        let alice_identity = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let bob_identity = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let bob_one_time = Curve25519SecretKey::generate(&mut OsRng).unwrap();

        let mut alice = Session::new_outbound(
            &alice_identity,
            bob_identity.public_key(),
            bob_one_time.public_key(),
            &mut OsRng,
        )
        .unwrap();
        let (_, message) = alice.encrypt(b"hi").unwrap();

        let bytes = base64_decode(&message).unwrap();
        let envelope = PreKeyMessage::decode(&bytes).unwrap();
        let bob = Session::new_inbound(&bob_identity, &bob_one_time, &envelope).unwrap();

        assert!(bob.matches_inbound_session(&message).unwrap());
        assert!(
            bob.matches_inbound_session_from(
                &alice_identity.public_key().to_base64(),
                &message
            )
            .unwrap()
        );
        assert!(
            !bob.matches_inbound_session_from(
                &bob_identity.public_key().to_base64(),
                &message
            )
            .unwrap()
        );
    }

    #[test]
    fn test_wrong_envelope_keys_are_rejected() {
        let (_, mut bob) = create_sessions();

        // An unrelated initiator's pre-key envelope must not decrypt here.
        let other_identity = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let stranger_identity = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let stranger_one_time = Curve25519SecretKey::generate(&mut OsRng).unwrap();
        let mut stranger = Session::new_outbound(
            &other_identity,
            stranger_identity.public_key(),
            stranger_one_time.public_key(),
            &mut OsRng,
        )
        .unwrap();
        let (message_type, message) = stranger.encrypt(b"hello?").unwrap();

        assert_eq!(
            bob.decrypt(message_type, &message),
            Err(Error::BadMessageKeyId)
        );
    }

    #[test]
    fn test_pickle_round_trip() {
        let (mut alice, mut bob) = create_sessions();

        let blob = alice.pickle(b"session key").unwrap();
        let mut restored = Session::from_pickle(b"session key", &blob).unwrap();

        assert_eq!(restored.session_id(), alice.session_id());

        // The restored session continues the ratchet where it left off.
        let (message_type, message) = restored.encrypt(b"from the past").unwrap();
        assert_eq!(
            bob.decrypt(message_type, &message).unwrap(),
            b"from the past"
        );

        let (reply_type, reply) = bob.encrypt(b"noted").unwrap();
        assert_eq!(alice.decrypt(reply_type, &reply).unwrap(), b"noted");
    }

    #[test]
    fn test_wrong_pickle_key_fails() {
        let (alice, _) = create_sessions();

        let blob = alice.pickle(b"right").unwrap();
        assert!(matches!(
            Session::from_pickle(b"wrong", &blob),
            Err(Error::BadSessionKey)
        ));
    }
}
