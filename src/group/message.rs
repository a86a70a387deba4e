//! Wire framing for group messages and session key exports.

use crate::Error;
use crate::cipher::MAC_LENGTH;
use crate::group::ratchet::RATCHET_LENGTH;
use crate::types::verifying_key_from_bytes;
use crate::wire::{Decoder, encode_bytes, encode_varint};
use ed25519_dalek::ed25519::SignatureBytes;
use ed25519_dalek::{Signature, SIGNATURE_LENGTH, VerifyingKey};

pub(crate) const GROUP_MESSAGE_VERSION: u8 = 3;

const MESSAGE_INDEX_TAG: u8 = 0x08;
const CIPHERTEXT_TAG: u8 = 0x12;

/// Version byte of a signed session key export, handed to new participants.
const SESSION_KEY_VERSION: u8 = 2;
/// Version byte of an unsigned export produced by an inbound session.
const EXPORTED_KEY_VERSION: u8 = 1;

const SESSION_KEY_LENGTH: usize = 1 + 4 + RATCHET_LENGTH + 32 + SIGNATURE_LENGTH;
const EXPORTED_KEY_LENGTH: usize = 1 + 4 + RATCHET_LENGTH + 32;

/// A group message body: the ratchet index and the ciphertext. On the wire
/// it is followed by a truncated MAC over the body and an Ed25519 signature
/// over both body and MAC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GroupMessage {
    pub(crate) message_index: u32,
    pub(crate) ciphertext: Vec<u8>,
}

impl GroupMessage {
    /// Serializes the body. The caller appends the MAC and the signature.
    pub(crate) fn to_mac_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.ciphertext.len() + 16);
        buffer.push(GROUP_MESSAGE_VERSION);
        buffer.push(MESSAGE_INDEX_TAG);
        encode_varint(&mut buffer, self.message_index);
        encode_bytes(&mut buffer, CIPHERTEXT_TAG, &self.ciphertext);

        buffer
    }

    /// Splits `bytes` into the parsed body, the span the MAC covers, the
    /// MAC, the span the signature covers and the signature.
    pub(crate) fn decode(bytes: &[u8]) -> Result<(Self, Spans<'_>), Error> {
        if bytes.len() < 1 + MAC_LENGTH + SIGNATURE_LENGTH {
            return Err(Error::BadMessageFormat);
        }

        let (signed, signature) = bytes.split_at(bytes.len() - SIGNATURE_LENGTH);
        let (mac_covered, mac) = signed.split_at(signed.len() - MAC_LENGTH);

        let mut decoder = Decoder::new(mac_covered);
        if decoder.byte()? != GROUP_MESSAGE_VERSION {
            return Err(Error::BadMessageFormat);
        }

        let mut message_index = None;
        let mut ciphertext = None;

        while !decoder.is_empty() {
            match decoder.byte()? {
                MESSAGE_INDEX_TAG => message_index = Some(decoder.varint()?),
                CIPHERTEXT_TAG => ciphertext = Some(decoder.bytes_field()?.to_vec()),
                _ => return Err(Error::BadMessageFormat),
            }
        }

        let message = Self {
            message_index: message_index.ok_or(Error::BadMessageFormat)?,
            ciphertext: ciphertext.ok_or(Error::BadMessageFormat)?,
        };

        let signature: [u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| Error::BadMessageFormat)?;

        Ok((
            message,
            Spans {
                mac_covered,
                mac,
                signed,
                signature: Signature::from_bytes(&SignatureBytes::from(signature)),
            },
        ))
    }
}

/// The authenticated spans of a decoded group message.
pub(crate) struct Spans<'a> {
    pub(crate) mac_covered: &'a [u8],
    pub(crate) mac: &'a [u8],
    pub(crate) signed: &'a [u8],
    pub(crate) signature: Signature,
}

/// The decoded content of a session key export, signed or not.
pub(crate) struct SessionKey {
    pub(crate) message_index: u32,
    pub(crate) ratchet: [u8; RATCHET_LENGTH],
    pub(crate) signing_key: VerifyingKey,
}

impl SessionKey {
    /// Lays out the signed export minus its trailing signature:
    /// `version || index || ratchet || signing key`.
    pub(crate) fn to_signed_prefix(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SESSION_KEY_LENGTH);
        bytes.push(SESSION_KEY_VERSION);
        bytes.extend_from_slice(&self.message_index.to_be_bytes());
        bytes.extend_from_slice(&self.ratchet);
        bytes.extend_from_slice(self.signing_key.as_bytes());

        bytes
    }

    /// Lays out the unsigned export used for session hand-off.
    pub(crate) fn to_export_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(EXPORTED_KEY_LENGTH);
        bytes.push(EXPORTED_KEY_VERSION);
        bytes.extend_from_slice(&self.message_index.to_be_bytes());
        bytes.extend_from_slice(&self.ratchet);
        bytes.extend_from_slice(self.signing_key.as_bytes());

        bytes
    }

    /// Parses a signed export and verifies its embedded signature.
    pub(crate) fn from_signed_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SESSION_KEY_LENGTH || bytes[0] != SESSION_KEY_VERSION {
            return Err(Error::BadMessageFormat);
        }

        let (signed, signature) = bytes.split_at(bytes.len() - SIGNATURE_LENGTH);
        let session_key = Self::parse_body(signed)?;

        let signature: [u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| Error::BadMessageFormat)?;
        let signature = Signature::from_bytes(&SignatureBytes::from(signature));
        session_key
            .signing_key
            .verify_strict(signed, &signature)
            .map_err(|_| Error::SignatureMismatch)?;

        Ok(session_key)
    }

    /// Parses an unsigned export.
    pub(crate) fn from_export_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != EXPORTED_KEY_LENGTH || bytes[0] != EXPORTED_KEY_VERSION {
            return Err(Error::BadMessageFormat);
        }

        Self::parse_body(bytes)
    }

    fn parse_body(bytes: &[u8]) -> Result<Self, Error> {
        let message_index = u32::from_be_bytes(
            bytes[1..5].try_into().map_err(|_| Error::BadMessageFormat)?,
        );
        let ratchet: [u8; RATCHET_LENGTH] = bytes[5..5 + RATCHET_LENGTH]
            .try_into()
            .map_err(|_| Error::BadMessageFormat)?;
        let signing_key_bytes: [u8; 32] = bytes[5 + RATCHET_LENGTH..]
            .try_into()
            .map_err(|_| Error::BadMessageFormat)?;

        Ok(Self {
            message_index,
            ratchet,
            signing_key: verifying_key_from_bytes(&signing_key_bytes)?,
        })
    }
}
