//! Stateless helpers: hashing and signature verification.

use crate::Error;
use crate::types::{base64_encode, signature_from_base64, verifying_key_from_base64};
use sha2::{Digest, Sha256};

/// SHA-256 digest of `input`, as unpadded base64.
pub fn sha256(input: &[u8]) -> String {
    base64_encode(Sha256::digest(input))
}

/// Verifies an Ed25519 signature. `public_key` and `signature` are unpadded
/// base64; an invalid signature fails with [`Error::SignatureMismatch`].
pub fn ed25519_verify(public_key: &str, message: &[u8], signature: &str) -> Result<(), Error> {
    let public_key = verifying_key_from_base64(public_key)?;
    let signature = signature_from_base64(signature)?;

    public_key
        .verify_strict(message, &signature)
        .map_err(|_| Error::SignatureMismatch)
}
