use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Seed byte for deriving the message key of the current step.
const MESSAGE_KEY_SEED: &[u8] = &[0x01];
/// Seed byte for advancing the chain key.
const CHAIN_KEY_SEED: &[u8] = &[0x02];

/// Symmetric chain ratchet. Every step yields one message key and
/// irreversibly replaces the chain key.
#[derive(Clone)]
pub(crate) struct Chain {
    pub(crate) chain_key: Box<[u8; 32]>,
    pub(crate) index: u32,
}

impl Zeroize for Chain {
    fn zeroize(&mut self) {
        self.chain_key.as_mut().zeroize();
    }
}

impl ZeroizeOnDrop for Chain {}

impl Chain {
    pub(crate) fn new(chain_key: Box<[u8; 32]>) -> Self {
        Self {
            chain_key,
            index: 0,
        }
    }

    /// Advances the chain and returns the message key for the step that was
    /// just consumed.
    pub(crate) fn next(&mut self) -> Box<[u8; 32]> {
        let mut message_mac = <HmacSha256 as Mac>::new_from_slice(self.chain_key.as_slice())
            .expect("HMAC initialization failed");
        message_mac.update(MESSAGE_KEY_SEED);
        let message_result = message_mac.finalize().into_bytes();

        let mut chain_mac = <HmacSha256 as Mac>::new_from_slice(self.chain_key.as_slice())
            .expect("HMAC initialization failed");
        chain_mac.update(CHAIN_KEY_SEED);
        let chain_result = chain_mac.finalize().into_bytes();

        self.chain_key.copy_from_slice(&chain_result);
        self.index = self.index.wrapping_add(1);

        let mut message_key = Box::new([0u8; 32]);
        message_key.copy_from_slice(&message_result);
        message_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_deterministic_and_one_way() {
        let mut a = Chain::new(Box::new([9u8; 32]));
        let mut b = Chain::new(Box::new([9u8; 32]));

        let key_a = a.next();
        let key_b = b.next();
        assert_eq!(key_a, key_b);
        assert_eq!(a.index, 1);

        // The chain key moved on and no longer equals the seed.
        assert_ne!(a.chain_key.as_slice(), &[9u8; 32]);
        // Message keys differ step to step.
        assert_ne!(a.next(), key_a);
    }
}
