//! Wire framing for two-party messages.
//!
//! Both envelopes open with a version byte followed by tagged
//! length-delimited fields. A ratchet message is terminated by a truncated
//! MAC over everything that precedes it; a pre-key envelope carries a
//! complete ratchet message as its payload and needs no MAC of its own.

use crate::Error;
use crate::cipher::MAC_LENGTH;
use crate::types::Curve25519PublicKey;
use crate::wire::{Decoder, encode_bytes, encode_varint};

pub(crate) const MESSAGE_VERSION: u8 = 3;

const RATCHET_KEY_TAG: u8 = 0x0A;
const CHAIN_INDEX_TAG: u8 = 0x10;
const CIPHERTEXT_TAG: u8 = 0x22;

const ONE_TIME_KEY_TAG: u8 = 0x0A;
const BASE_KEY_TAG: u8 = 0x12;
const IDENTITY_KEY_TAG: u8 = 0x1A;
const INNER_MESSAGE_TAG: u8 = 0x22;

/// The two message types of the protocol. The first messages of a session
/// are `PreKey` envelopes carrying the handshake material; once the sender
/// has received a reply, plain `Message` envelopes are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    PreKey = 0,
    Message = 1,
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::PreKey => 0,
            MessageType::Message => 1,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(MessageType::PreKey),
            1 => Ok(MessageType::Message),
            _ => Err(Error::BadMessageFormat),
        }
    }
}

/// The ratchet message proper: the sender's current ratchet key, the index
/// of the message key within that chain, and the ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RatchetMessage {
    pub(crate) ratchet_key: Curve25519PublicKey,
    pub(crate) chain_index: u32,
    pub(crate) ciphertext: Vec<u8>,
}

impl RatchetMessage {
    /// Serializes the message body. The caller appends the MAC computed
    /// over exactly these bytes.
    pub(crate) fn to_mac_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.ciphertext.len() + 48);
        buffer.push(MESSAGE_VERSION);
        encode_bytes(&mut buffer, RATCHET_KEY_TAG, self.ratchet_key.as_bytes());
        buffer.push(CHAIN_INDEX_TAG);
        encode_varint(&mut buffer, self.chain_index);
        encode_bytes(&mut buffer, CIPHERTEXT_TAG, &self.ciphertext);

        buffer
    }

    /// Splits `bytes` into the parsed message, the span the MAC covers and
    /// the trailing MAC.
    pub(crate) fn decode(bytes: &[u8]) -> Result<(Self, &[u8], &[u8]), Error> {
        if bytes.len() < 1 + MAC_LENGTH {
            return Err(Error::BadMessageFormat);
        }

        let (covered, mac) = bytes.split_at(bytes.len() - MAC_LENGTH);
        let mut decoder = Decoder::new(covered);

        if decoder.byte()? != MESSAGE_VERSION {
            return Err(Error::BadMessageFormat);
        }

        let mut ratchet_key = None;
        let mut chain_index = None;
        let mut ciphertext = None;

        while !decoder.is_empty() {
            match decoder.byte()? {
                RATCHET_KEY_TAG => ratchet_key = Some(decoder.key_field()?),
                CHAIN_INDEX_TAG => chain_index = Some(decoder.varint()?),
                CIPHERTEXT_TAG => ciphertext = Some(decoder.bytes_field()?.to_vec()),
                _ => return Err(Error::BadMessageFormat),
            }
        }

        let message = Self {
            ratchet_key: ratchet_key.ok_or(Error::BadMessageFormat)?,
            chain_index: chain_index.ok_or(Error::BadMessageFormat)?,
            ciphertext: ciphertext.ok_or(Error::BadMessageFormat)?,
        };

        Ok((message, covered, mac))
    }
}

/// The handshake envelope wrapped around the first ratchet messages of a
/// session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PreKeyMessage {
    pub(crate) one_time_key: Curve25519PublicKey,
    pub(crate) base_key: Curve25519PublicKey,
    pub(crate) identity_key: Curve25519PublicKey,
    pub(crate) message: Vec<u8>,
}

impl PreKeyMessage {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.message.len() + 128);
        buffer.push(MESSAGE_VERSION);
        encode_bytes(&mut buffer, ONE_TIME_KEY_TAG, self.one_time_key.as_bytes());
        encode_bytes(&mut buffer, BASE_KEY_TAG, self.base_key.as_bytes());
        encode_bytes(&mut buffer, IDENTITY_KEY_TAG, self.identity_key.as_bytes());
        encode_bytes(&mut buffer, INNER_MESSAGE_TAG, &self.message);

        buffer
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut decoder = Decoder::new(bytes);

        if decoder.byte()? != MESSAGE_VERSION {
            return Err(Error::BadMessageFormat);
        }

        let mut one_time_key = None;
        let mut base_key = None;
        let mut identity_key = None;
        let mut message = None;

        while !decoder.is_empty() {
            match decoder.byte()? {
                ONE_TIME_KEY_TAG => one_time_key = Some(decoder.key_field()?),
                BASE_KEY_TAG => base_key = Some(decoder.key_field()?),
                IDENTITY_KEY_TAG => identity_key = Some(decoder.key_field()?),
                INNER_MESSAGE_TAG => message = Some(decoder.bytes_field()?.to_vec()),
                _ => return Err(Error::BadMessageFormat),
            }
        }

        Ok(Self {
            one_time_key: one_time_key.ok_or(Error::BadMessageFormat)?,
            base_key: base_key.ok_or(Error::BadMessageFormat)?,
            identity_key: identity_key.ok_or(Error::BadMessageFormat)?,
            message: message.ok_or(Error::BadMessageFormat)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Curve25519PublicKey {
        Curve25519PublicKey::from([byte; 32])
    }

    #[test]
    fn test_ratchet_message_round_trip() {
        let message = RatchetMessage {
            ratchet_key: key(1),
            chain_index: 300,
            ciphertext: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };

        let mut bytes = message.to_mac_bytes();
        bytes.extend_from_slice(&[0u8; MAC_LENGTH]);

        let (decoded, covered, mac) = RatchetMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.ratchet_key, key(1));
        assert_eq!(decoded.chain_index, 300);
        assert_eq!(decoded.ciphertext, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(covered.len(), bytes.len() - MAC_LENGTH);
        assert_eq!(mac, &[0u8; MAC_LENGTH]);
    }

    #[test]
    fn test_pre_key_message_round_trip() {
        let message = PreKeyMessage {
            one_time_key: key(1),
            base_key: key(2),
            identity_key: key(3),
            message: vec![9, 9, 9],
        };

        let decoded = PreKeyMessage::decode(&message.encode()).unwrap();
        assert_eq!(decoded.one_time_key, key(1));
        assert_eq!(decoded.base_key, key(2));
        assert_eq!(decoded.identity_key, key(3));
        assert_eq!(decoded.message, vec![9, 9, 9]);
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        assert!(RatchetMessage::decode(&[MESSAGE_VERSION]).is_err());
        assert!(PreKeyMessage::decode(&[]).is_err());

        let message = PreKeyMessage {
            one_time_key: key(1),
            base_key: key(2),
            identity_key: key(3),
            message: vec![1],
        };
        let bytes = message.encode();
        assert_eq!(
            PreKeyMessage::decode(&bytes[..bytes.len() - 1]),
            Err(Error::BadMessageFormat)
        );
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let message = PreKeyMessage {
            one_time_key: key(1),
            base_key: key(2),
            identity_key: key(3),
            message: vec![1],
        };
        let mut bytes = message.encode();
        bytes[0] = 2;

        assert_eq!(PreKeyMessage::decode(&bytes), Err(Error::BadMessageFormat));
    }
}
