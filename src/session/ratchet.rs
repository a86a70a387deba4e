use crate::Error;
use crate::cipher::MessageKeys;
use crate::session::chain::Chain;
use crate::session::messages::RatchetMessage;
use crate::types::{Curve25519PublicKey, Curve25519SecretKey};
use hkdf::Hkdf;
use rand::TryRngCore;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Superseded receiving chains kept around for late messages.
const MAX_RECEIVER_CHAINS: usize = 5;
/// Cached message keys for out-of-order delivery within a chain.
const MAX_SKIPPED_MESSAGE_KEYS: usize = 40;
/// Largest forward jump within a chain we are willing to derive.
const MAX_MESSAGE_GAP: u32 = 2000;

const RATCHET_INFO: &[u8] = b"OLM_RATCHET";
const MESSAGE_KEYS_INFO: &[u8] = b"OLM_KEYS";

/// Advances the root key with a fresh Diffie-Hellman output, yielding the
/// next root key and the chain key for the new chain.
fn kdf_ratchet(root_key: &[u8; 32], dh_output: SharedSecret) -> (Box<[u8; 32]>, Box<[u8; 32]>) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output.as_bytes());

    let mut okm = Box::new([0u8; 64]);
    hkdf.expand(RATCHET_INFO, okm.as_mut_slice())
        .expect("HKDF expansion failed");

    let mut new_root_key = Box::new([0u8; 32]);
    let mut chain_key = Box::new([0u8; 32]);
    new_root_key.copy_from_slice(&okm[0..32]);
    chain_key.copy_from_slice(&okm[32..64]);
    okm.zeroize();

    (new_root_key, chain_key)
}

#[derive(Clone)]
pub(crate) struct ReceiverChain {
    pub(crate) ratchet_key: Curve25519PublicKey,
    pub(crate) chain: Chain,
}

#[derive(Clone)]
pub(crate) struct SkippedMessageKey {
    pub(crate) ratchet_key: Curve25519PublicKey,
    pub(crate) index: u32,
    pub(crate) message_key: Box<[u8; 32]>,
}

impl Zeroize for SkippedMessageKey {
    fn zeroize(&mut self) {
        self.message_key.zeroize();
    }
}

impl ZeroizeOnDrop for SkippedMessageKey {}

/// The Olm double ratchet.
///
/// A symmetric chain ratchet derives one message key per message; receiving
/// a message under a ratchet key we have not seen triggers an asymmetric
/// step that replaces the root key and retires the sending chain, giving
/// both forward secrecy and break-in recovery.
#[derive(Clone)]
pub(crate) struct DoubleRatchet {
    pub(crate) root_key: Box<[u8; 32]>,
    /// Our current ratchet key pair. `None` only on an inbound session that
    /// has not sent yet.
    pub(crate) sending_ratchet_key: Option<Curve25519SecretKey>,
    /// The active sending chain; retired (set to `None`) by a received
    /// ratchet step, re-created with a fresh ratchet key on the next send.
    pub(crate) sending_chain: Option<Chain>,
    /// Receiving chains, newest first.
    pub(crate) receiver_chains: Vec<ReceiverChain>,
    /// Message keys skipped over within receiving chains, oldest first.
    pub(crate) skipped_message_keys: Vec<SkippedMessageKey>,
}

impl DoubleRatchet {
    /// Ratchet for the initiator. The shared secret supplies the initial
    /// root key and sending chain; `ratchet_key` is the initiator's first
    /// ratchet key pair.
    pub(crate) fn new_outbound(
        mut shared_secret: Box<[u8; 64]>,
        ratchet_key: Curve25519SecretKey,
    ) -> Self {
        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        root_key.copy_from_slice(&shared_secret[0..32]);
        chain_key.copy_from_slice(&shared_secret[32..64]);
        shared_secret.zeroize();

        Self {
            root_key,
            sending_ratchet_key: Some(ratchet_key),
            sending_chain: Some(Chain::new(chain_key)),
            receiver_chains: Vec::new(),
            skipped_message_keys: Vec::new(),
        }
    }

    /// Ratchet for the responder. The chain half of the shared secret is
    /// the initiator's sending chain, keyed by the ratchet key embedded in
    /// the first message.
    pub(crate) fn new_inbound(
        mut shared_secret: Box<[u8; 64]>,
        their_ratchet_key: Curve25519PublicKey,
    ) -> Self {
        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        root_key.copy_from_slice(&shared_secret[0..32]);
        chain_key.copy_from_slice(&shared_secret[32..64]);
        shared_secret.zeroize();

        Self {
            root_key,
            sending_ratchet_key: None,
            sending_chain: None,
            receiver_chains: vec![ReceiverChain {
                ratchet_key: their_ratchet_key,
                chain: Chain::new(chain_key),
            }],
            skipped_message_keys: Vec::new(),
        }
    }

    /// Encrypts `plaintext` into a complete ratchet message (body plus MAC).
    ///
    /// The random source is touched only when the sending chain has to be
    /// re-created after a received ratchet step; a failed draw leaves the
    /// ratchet unchanged.
    pub(crate) fn encrypt<R: TryRngCore>(
        &mut self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, Error> {
        if self.sending_chain.is_none() {
            let remote_key = self
                .receiver_chains
                .first()
                .map(|receiver| receiver.ratchet_key)
                .ok_or(Error::Internal("sending chain retired with no receiver chain"))?;

            let ratchet_key = Curve25519SecretKey::generate(rng)?;
            let (root_key, chain_key) = kdf_ratchet(&self.root_key, ratchet_key.dh(&remote_key));

            self.root_key = root_key;
            self.sending_ratchet_key = Some(ratchet_key);
            self.sending_chain = Some(Chain::new(chain_key));
        }

        let (ratchet_key, chain_index, mut message_key) =
            match (&self.sending_ratchet_key, &mut self.sending_chain) {
                (Some(key), Some(chain)) => {
                    let index = chain.index;
                    (key.public_key(), index, chain.next())
                }
                _ => return Err(Error::Internal("sending chain missing its ratchet key")),
            };

        let keys = MessageKeys::derive(message_key.as_slice(), MESSAGE_KEYS_INFO);
        message_key.zeroize();

        let message = RatchetMessage {
            ratchet_key,
            chain_index,
            ciphertext: keys.encrypt(plaintext),
        };

        let mut bytes = message.to_mac_bytes();
        let tag = keys.mac(&bytes);
        bytes.extend_from_slice(&tag);

        Ok(bytes)
    }

    /// Decrypts a ratchet message. Any failure leaves the ratchet exactly
    /// as it was; success irreversibly consumes the message key.
    pub(crate) fn decrypt(&mut self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let (message, covered, tag) = RatchetMessage::decode(bytes)?;

        // Revert to the old state if anything past parsing fails.
        let old_state = self.clone();
        match self.decrypt_inner(&message, covered, tag) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => {
                *self = old_state;
                Err(err)
            }
        }
    }

    fn decrypt_inner(
        &mut self,
        message: &RatchetMessage,
        covered: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, Error> {
        // A key we skipped over earlier?
        if let Some(position) = self.skipped_message_keys.iter().position(|skipped| {
            skipped.ratchet_key == message.ratchet_key && skipped.index == message.chain_index
        }) {
            let keys = MessageKeys::derive(
                self.skipped_message_keys[position].message_key.as_slice(),
                MESSAGE_KEYS_INFO,
            );
            keys.verify_mac(covered, tag)?;
            let plaintext = keys.decrypt(&message.ciphertext)?;

            // Consumed for good; a replay can no longer be decrypted.
            self.skipped_message_keys.remove(position);
            return Ok(plaintext);
        }

        if let Some(position) = self
            .receiver_chains
            .iter()
            .position(|receiver| receiver.ratchet_key == message.ratchet_key)
        {
            return self.decrypt_with_chain(position, message, covered, tag);
        }

        // A ratchet key we have not seen: perform the asymmetric step.
        let Some(our_ratchet_key) = &self.sending_ratchet_key else {
            // An honest peer cannot have ratcheted before we ever sent.
            return Err(Error::BadMessageMac);
        };

        let (root_key, chain_key) =
            kdf_ratchet(&self.root_key, our_ratchet_key.dh(&message.ratchet_key));

        self.root_key = root_key;
        self.receiver_chains.insert(
            0,
            ReceiverChain {
                ratchet_key: message.ratchet_key,
                chain: Chain::new(chain_key),
            },
        );
        self.receiver_chains.truncate(MAX_RECEIVER_CHAINS);
        // The peer moved on; our next send must start a fresh chain.
        self.sending_chain = None;

        self.decrypt_with_chain(0, message, covered, tag)
    }

    fn decrypt_with_chain(
        &mut self,
        position: usize,
        message: &RatchetMessage,
        covered: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let current_index = self.receiver_chains[position].chain.index;

        if message.chain_index < current_index {
            // The key for this index was already consumed or discarded.
            return Err(Error::UnknownMessageIndex);
        }
        if message.chain_index - current_index > MAX_MESSAGE_GAP {
            return Err(Error::UnknownMessageIndex);
        }

        while self.receiver_chains[position].chain.index < message.chain_index {
            let index = self.receiver_chains[position].chain.index;
            let message_key = self.receiver_chains[position].chain.next();
            self.skipped_message_keys.push(SkippedMessageKey {
                ratchet_key: message.ratchet_key,
                index,
                message_key,
            });
        }
        if self.skipped_message_keys.len() > MAX_SKIPPED_MESSAGE_KEYS {
            let excess = self.skipped_message_keys.len() - MAX_SKIPPED_MESSAGE_KEYS;
            self.skipped_message_keys.drain(0..excess);
        }

        let mut message_key = self.receiver_chains[position].chain.next();
        let keys = MessageKeys::derive(message_key.as_slice(), MESSAGE_KEYS_INFO);
        message_key.zeroize();

        keys.verify_mac(covered, tag)?;
        keys.decrypt(&message.ciphertext)
    }
}

impl Zeroize for DoubleRatchet {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        if let Some(key) = self.sending_ratchet_key.as_mut() {
            key.zeroize();
        }
        if let Some(chain) = self.sending_chain.as_mut() {
            chain.zeroize();
        }
        for receiver in &mut self.receiver_chains {
            receiver.chain.zeroize();
        }
        for skipped in &mut self.skipped_message_keys {
            skipped.zeroize();
        }
        self.skipped_message_keys.clear();
    }
}

impl ZeroizeOnDrop for DoubleRatchet {}
