use crate::Error;
use crate::types::base64_decode;
use ed25519_dalek::ed25519::SignatureBytes;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

pub(crate) fn signing_key_from_bytes(bytes: &[u8; 32]) -> SigningKey {
    SigningKey::from_bytes(bytes)
}

pub(crate) fn verifying_key_from_bytes(bytes: &[u8; 32]) -> Result<VerifyingKey, Error> {
    VerifyingKey::from_bytes(bytes).map_err(|_| Error::InvalidKey)
}

pub(crate) fn verifying_key_from_base64(input: &str) -> Result<VerifyingKey, Error> {
    let bytes = base64_decode(input).map_err(|_| Error::InvalidKey)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidKey)?;

    verifying_key_from_bytes(&bytes)
}

pub(crate) fn signature_from_base64(input: &str) -> Result<Signature, Error> {
    let bytes = base64_decode(input).map_err(|_| Error::InvalidKey)?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|_| Error::InvalidKey)?;

    Ok(Signature::from_bytes(&SignatureBytes::from(bytes)))
}
