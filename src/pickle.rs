//! Authenticated, encrypted, versioned serialization shared by every
//! stateful entity ("pickling").
//!
//! Layout of a pickle blob, before base64: `version || ciphertext || mac`.
//! The cipher and MAC keys are expanded from the caller-supplied key bytes;
//! an empty key is degenerate but accepted.

use crate::Error;
use crate::cipher::{MAC_LENGTH, MessageKeys};
use crate::types::{base64_decode, base64_encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use zeroize::Zeroize;

const PICKLE_VERSION: u8 = 1;
const PICKLE_INFO: &[u8] = b"TUMBLER_PICKLE_KEYS";

/// Serializes `record`, encrypts it under `key` and returns the base64 blob.
pub(crate) fn pickle<T: Serialize>(record: &T, key: &[u8]) -> Result<String, Error> {
    let mut payload = serde_json::to_vec(record)
        .map_err(|_| Error::Internal("pickle record serialization failed"))?;
    let keys = MessageKeys::derive(key, PICKLE_INFO);

    let mut blob = Vec::with_capacity(1 + payload.len() + 16 + MAC_LENGTH);
    blob.push(PICKLE_VERSION);
    blob.extend_from_slice(&keys.encrypt(&payload));
    payload.zeroize();
    let tag = keys.mac(&blob);
    blob.extend_from_slice(&tag);

    Ok(base64_encode(blob))
}

/// Reverses [`pickle`]. The MAC is verified before any field is decoded;
/// a MAC mismatch is reported as `wrong_key_error` so that accounts and
/// sessions can surface their own taxonomy entry.
pub(crate) fn unpickle<T: DeserializeOwned>(
    pickle: &str,
    key: &[u8],
    wrong_key_error: Error,
) -> Result<T, Error> {
    let blob = base64_decode(pickle).map_err(|_| Error::CorruptPickle)?;
    if blob.len() < 1 + MAC_LENGTH {
        return Err(Error::CorruptPickle);
    }
    if blob[0] != PICKLE_VERSION {
        return Err(Error::CorruptPickle);
    }

    let (body, tag) = blob.split_at(blob.len() - MAC_LENGTH);
    let keys = MessageKeys::derive(key, PICKLE_INFO);
    keys.verify_mac(body, tag)
        .map_err(|_| wrong_key_error.clone())?;

    let mut payload = keys.decrypt(&body[1..]).map_err(|_| wrong_key_error)?;

    let record = serde_json::from_slice(&payload).map_err(|_| Error::CorruptPickle);
    payload.zeroize();
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
    struct Record {
        key: [u8; 32],
        counter: u32,
    }

    fn record() -> Record {
        Record {
            key: [3u8; 32],
            counter: 17,
        }
    }

    #[test]
    fn test_round_trip() {
        let blob = pickle(&record(), b"a passphrase").unwrap();
        let restored: Record = unpickle(&blob, b"a passphrase", Error::BadSessionKey).unwrap();

        assert_eq!(restored, record());
    }

    #[test]
    fn test_empty_key_is_accepted() {
        let blob = pickle(&record(), b"").unwrap();
        let restored: Record = unpickle(&blob, b"", Error::BadSessionKey).unwrap();

        assert_eq!(restored, record());
    }

    #[test]
    fn test_wrong_key_fails_with_callers_error() {
        let blob = pickle(&record(), b"right").unwrap();

        let result: Result<Record, Error> = unpickle(&blob, b"wrong", Error::BadAccountKey);
        assert_eq!(result, Err(Error::BadAccountKey));
    }

    #[test]
    fn test_corrupted_blob_is_rejected() {
        let blob = pickle(&record(), b"key").unwrap();

        // Flip a character in the middle of the blob.
        let mut corrupted = blob.into_bytes();
        let mid = corrupted.len() / 2;
        corrupted[mid] = if corrupted[mid] == b'A' { b'B' } else { b'A' };
        let corrupted = String::from_utf8(corrupted).unwrap();

        let result: Result<Record, Error> = unpickle(&corrupted, b"key", Error::BadSessionKey);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let result: Result<Record, Error> = unpickle("AAAA", b"key", Error::BadSessionKey);
        assert_eq!(result, Err(Error::CorruptPickle));
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let blob = pickle(&record(), b"key").unwrap();
        let mut raw = base64_decode(&blob).unwrap();
        raw[0] = 99;

        // Re-MAC so only the version check can fail.
        let keys = MessageKeys::derive(b"key", PICKLE_INFO);
        let body_len = raw.len() - MAC_LENGTH;
        let tag = keys.mac(&raw[..body_len]);
        raw[body_len..].copy_from_slice(&tag);

        let result: Result<Record, Error> =
            unpickle(&base64_encode(raw), b"key", Error::BadSessionKey);
        assert_eq!(result, Err(Error::CorruptPickle));
    }
}
